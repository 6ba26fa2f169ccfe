use std::ops::Range;

use crate::cloud::{CloudView, PointCloud};
use crate::error::{check_index, EngineError, Result};

/// Several clouds concatenated into one coordinate arena.
///
/// `offsets` has one entry per cloud plus a trailing total, so cloud `i`
/// occupies points `offsets[i]..offsets[i + 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    dim: usize,
    coords: Vec<f32>,
    feature_dim: Option<usize>,
    features: Vec<f32>,
    offsets: Vec<usize>,
}

impl Batch {
    pub fn build(clouds: Vec<PointCloud>) -> Result<Self> {
        let mut batch = Batch {
            dim: clouds.first().map(|cloud| cloud.dim()).unwrap_or(0),
            coords: Vec::with_capacity(clouds.iter().map(|cloud| cloud.coords().len()).sum()),
            feature_dim: clouds
                .first()
                .and_then(|cloud| cloud.features().map(|features| features.dim)),
            features: Vec::new(),
            offsets: vec![0],
        };
        for (idx, cloud) in clouds.into_iter().enumerate() {
            batch
                .push(cloud)
                .map_err(|err| EngineError::invalid(format!("cloud {idx}: {err}")))?;
        }
        Ok(batch)
    }

    pub fn from_parts(dim: usize, coords: Vec<f32>, offsets: Vec<usize>) -> Result<Self> {
        if dim == 0 {
            return Err(EngineError::malformed("point dimension must be at least 1"));
        }
        if coords.len() % dim != 0 {
            return Err(EngineError::malformed(format!(
                "coordinate buffer of length {} is not a multiple of dimension {dim}",
                coords.len()
            )));
        }
        let total = coords.len() / dim;
        if offsets.first() != Some(&0) {
            return Err(EngineError::malformed("offset table must start at 0"));
        }
        if let Some(pair) = offsets.windows(2).find(|pair| pair[1] <= pair[0]) {
            return Err(EngineError::malformed(format!(
                "offset table is not strictly increasing at {}..{}",
                pair[0], pair[1]
            )));
        }
        if offsets.last() != Some(&total) {
            return Err(EngineError::malformed(format!(
                "offset table ends at {:?}, buffer holds {total} points",
                offsets.last()
            )));
        }
        if coords.iter().any(|value| !value.is_finite()) {
            return Err(EngineError::invalid("batch contains non-finite coordinates"));
        }
        Ok(Self {
            dim,
            coords,
            feature_dim: None,
            features: Vec::new(),
            offsets,
        })
    }

    /// Appends a cloud; requires exclusive access, so no index built over this
    /// batch can outlive the call.
    pub fn push(&mut self, cloud: PointCloud) -> Result<usize> {
        if self.is_empty() && self.coords.is_empty() {
            self.dim = cloud.dim();
            self.feature_dim = cloud.features().map(|features| features.dim);
        }
        if cloud.dim() != self.dim {
            return Err(EngineError::invalid(format!(
                "dimension {} does not match batch dimension {}",
                cloud.dim(),
                self.dim
            )));
        }
        let feature_dim = cloud.features().map(|features| features.dim);
        if feature_dim != self.feature_dim {
            return Err(EngineError::invalid(format!(
                "feature dimension {feature_dim:?} does not match batch {:?}",
                self.feature_dim
            )));
        }
        if cloud.is_empty() {
            return Err(EngineError::invalid("empty clouds cannot be batched"));
        }

        let len = cloud.len();
        let (_, coords, features) = cloud.into_parts();
        self.coords.extend_from_slice(&coords);
        if let Some(features) = features {
            self.features.extend_from_slice(&features.values);
        }
        let end = self.total_points() + len;
        self.offsets.push(end);
        Ok(self.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn total_points(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn coords(&self) -> &[f32] {
        &self.coords
    }

    pub fn cloud_range(&self, batch_index: usize) -> Result<Range<usize>> {
        check_index(batch_index, self.len())?;
        Ok(self.offsets[batch_index]..self.offsets[batch_index + 1])
    }

    pub fn cloud_sizes(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    pub fn cloud(&self, batch_index: usize) -> Result<CloudView<'_>> {
        let range = self.cloud_range(batch_index)?;
        let coords = &self.coords[range.start * self.dim..range.end * self.dim];
        let features = self
            .feature_dim
            .map(|dim| (dim, &self.features[range.start * dim..range.end * dim]));
        Ok(CloudView {
            dim: self.dim,
            coords,
            features,
            offset: range.start,
        })
    }

    pub fn clouds(&self) -> impl Iterator<Item = CloudView<'_>> + '_ {
        (0..self.len()).filter_map(move |idx| self.cloud(idx).ok())
    }

    pub fn to_global(&self, batch_index: usize, local: usize) -> Result<usize> {
        let range = self.cloud_range(batch_index)?;
        check_index(local, range.len())?;
        Ok(range.start + local)
    }

    /// Maps a global point index back to `(cloud, local index)`.
    pub fn locate(&self, global: usize) -> Result<(usize, usize)> {
        check_index(global, self.total_points())?;
        let cloud = self.offsets.partition_point(|&start| start <= global) - 1;
        Ok((cloud, global - self.offsets[cloud]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_cloud(len: usize, x0: f32) -> PointCloud {
        let positions: Vec<[f32; 3]> = (0..len).map(|i| [x0 + i as f32, 0.0, 0.0]).collect();
        PointCloud::from_positions(&positions).unwrap()
    }

    #[test]
    fn offsets_partition_the_buffer() {
        let batch = Batch::build(vec![line_cloud(5, 0.0), line_cloud(3, 10.0), line_cloud(1, 20.0)])
            .unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.offsets(), &[0, 5, 8, 9]);
        assert_eq!(batch.cloud_sizes().iter().sum::<usize>(), batch.total_points());
        assert_eq!(batch.coords().len(), batch.total_points() * 3);
        assert_eq!(batch.cloud_range(1).unwrap(), 5..8);
        for idx in 0..batch.len() - 1 {
            assert_eq!(
                batch.cloud_range(idx).unwrap().end,
                batch.cloud_range(idx + 1).unwrap().start
            );
        }
    }

    #[test]
    fn views_do_not_leak_across_clouds() {
        let batch = Batch::build(vec![line_cloud(5, 0.0), line_cloud(3, 10.0)]).unwrap();
        let view = batch.cloud(1).unwrap();
        assert_eq!(view.len(), 3);
        assert_eq!(view.point(0), &[10.0, 0.0, 0.0]);
        assert_eq!(view.to_global(2).unwrap(), 7);
        assert!(matches!(
            view.to_global(3),
            Err(EngineError::OutOfRange { index: 3, len: 3 })
        ));
        assert_eq!(batch.locate(5).unwrap(), (1, 0));
        assert_eq!(batch.locate(4).unwrap(), (0, 4));
        assert!(batch.locate(8).is_err());
    }

    #[test]
    fn cloud_range_out_of_range() {
        let batch = Batch::build(vec![line_cloud(2, 0.0)]).unwrap();
        assert_eq!(
            batch.cloud_range(1),
            Err(EngineError::OutOfRange { index: 1, len: 1 })
        );
    }

    #[test]
    fn mixed_dimensions_are_rejected() {
        let flat = PointCloud::from_rows(&[[0.0f32, 0.0]]).unwrap();
        let err = Batch::build(vec![line_cloud(2, 0.0), flat]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn offset_tables_are_validated() {
        let coords = vec![0.0; 12];
        assert!(Batch::from_parts(3, coords.clone(), vec![0, 2, 4]).is_ok());
        let empty_range = Batch::from_parts(3, coords.clone(), vec![0, 2, 2, 4]).unwrap_err();
        assert!(empty_range.is_structural());
        assert!(Batch::from_parts(3, coords.clone(), vec![1, 4]).is_err());
        assert!(Batch::from_parts(3, coords, vec![0, 3]).is_err());
    }

    #[test]
    fn features_follow_their_cloud() {
        let a = line_cloud(2, 0.0).with_features(1, vec![1.0, 2.0]).unwrap();
        let b = line_cloud(1, 5.0).with_features(1, vec![3.0]).unwrap();
        let batch = Batch::build(vec![a, b]).unwrap();
        let view = batch.cloud(1).unwrap();
        assert_eq!(view.feature(0), Some(&[3.0][..]));

        let bare = line_cloud(1, 9.0);
        let err = Batch::build(vec![line_cloud(1, 0.0).with_features(1, vec![0.0]).unwrap(), bare]);
        assert!(err.is_err());
    }

    #[test]
    fn empty_batch_is_valid() {
        let batch = Batch::build(Vec::new()).unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.total_points(), 0);
    }
}

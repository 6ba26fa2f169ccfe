use glam::Vec3;

use crate::error::{check_index, EngineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    pub dim: usize,
    pub values: Vec<f32>,
}

/// One point cloud with a flat coordinate buffer of `len * dim` values.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    dim: usize,
    coords: Vec<f32>,
    features: Option<Features>,
}

impl PointCloud {
    pub fn new(dim: usize, coords: Vec<f32>) -> Result<Self> {
        if dim == 0 {
            return Err(EngineError::invalid("point dimension must be at least 1"));
        }
        if coords.is_empty() {
            return Err(EngineError::invalid("point cloud is empty"));
        }
        if coords.len() % dim != 0 {
            return Err(EngineError::invalid(format!(
                "coordinate buffer of length {} is not a multiple of dimension {dim}",
                coords.len()
            )));
        }
        if let Some(pos) = coords.iter().position(|value| !value.is_finite()) {
            return Err(EngineError::invalid(format!(
                "non-finite coordinate at point {}",
                pos / dim
            )));
        }
        Ok(Self {
            dim,
            coords,
            features: None,
        })
    }

    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Err(EngineError::invalid("point cloud is empty"));
        };
        let dim = first.as_ref().len();
        let mut coords = Vec::with_capacity(rows.len() * dim);
        for (idx, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != dim {
                return Err(EngineError::invalid(format!(
                    "point {idx} has dimension {}, expected {dim}",
                    row.len()
                )));
            }
            coords.extend_from_slice(row);
        }
        Self::new(dim, coords)
    }

    pub fn from_positions(positions: &[[f32; 3]]) -> Result<Self> {
        let coords = positions.iter().flat_map(|p| p.iter().copied()).collect();
        Self::new(3, coords)
    }

    pub fn with_features(mut self, dim: usize, values: Vec<f32>) -> Result<Self> {
        if dim == 0 || values.len() != self.len() * dim {
            return Err(EngineError::invalid(format!(
                "feature buffer of length {} does not match {} points of dimension {dim}",
                values.len(),
                self.len()
            )));
        }
        self.features = Some(Features { dim, values });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.coords.len() / self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn coords(&self) -> &[f32] {
        &self.coords
    }

    pub fn features(&self) -> Option<&Features> {
        self.features.as_ref()
    }

    pub fn view(&self) -> CloudView<'_> {
        CloudView {
            dim: self.dim,
            coords: &self.coords,
            features: self
                .features
                .as_ref()
                .map(|features| (features.dim, features.values.as_slice())),
            offset: 0,
        }
    }

    pub(crate) fn into_parts(self) -> (usize, Vec<f32>, Option<Features>) {
        (self.dim, self.coords, self.features)
    }
}

/// Borrowed window onto one cloud's slice of a coordinate arena.
///
/// Indices passed to and returned from a view are cloud-local; `offset` is the
/// cloud's start inside the owning batch buffer.
#[derive(Debug, Clone, Copy)]
pub struct CloudView<'a> {
    pub(crate) dim: usize,
    pub(crate) coords: &'a [f32],
    pub(crate) features: Option<(usize, &'a [f32])>,
    pub(crate) offset: usize,
}

impl<'a> CloudView<'a> {
    pub fn len(&self) -> usize {
        self.coords.len() / self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn point(&self, index: usize) -> &'a [f32] {
        let start = index * self.dim;
        &self.coords[start..start + self.dim]
    }

    pub fn checked_point(&self, index: usize) -> Result<&'a [f32]> {
        check_index(index, self.len())?;
        Ok(self.point(index))
    }

    pub fn feature(&self, index: usize) -> Option<&'a [f32]> {
        let (dim, values) = self.features?;
        let start = index * dim;
        values.get(start..start + dim)
    }

    pub fn to_global(&self, local: usize) -> Result<usize> {
        check_index(local, self.len())?;
        Ok(self.offset + local)
    }

    /// First three coordinates, zero-filled for lower dimensions.
    #[inline]
    pub(crate) fn spatial(&self, index: usize) -> Vec3 {
        spatial_of(self.point(index))
    }

    #[inline]
    pub(crate) fn sq_distance_to(&self, index: usize, query: &[f32]) -> f32 {
        sq_distance(self.point(index), query)
    }
}

#[inline]
pub(crate) fn sq_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[inline]
pub(crate) fn spatial_of(point: &[f32]) -> Vec3 {
    Vec3::new(
        point.first().copied().unwrap_or(0.0),
        point.get(1).copied().unwrap_or(0.0),
        point.get(2).copied().unwrap_or(0.0),
    )
}

pub(crate) fn domain_bounds(view: &CloudView<'_>, domain: &[usize]) -> (Vec3, Vec3) {
    let mut iter = domain.iter().copied();
    let first = iter.next().map(|idx| view.spatial(idx)).unwrap_or(Vec3::ZERO);
    let mut min = first;
    let mut max = first;
    for idx in iter {
        let p = view.spatial(idx);
        min = min.min(p);
        max = max.max(p);
    }
    (min, max)
}

/// Average point spacing of the domain estimated from its bounding box.
pub(crate) fn estimate_spacing(view: &CloudView<'_>, domain: &[usize]) -> f32 {
    if domain.len() <= 1 {
        return 1.0;
    }
    let (min, max) = domain_bounds(view, domain);
    let extent = max - min;
    let mut axes = [extent.x.abs(), extent.y.abs(), extent.z.abs()];
    axes.sort_by(|a, b| a.total_cmp(b));
    let count = domain.len() as f32;
    let mut spacing = 0.0;
    let volume = axes[0] * axes[1] * axes[2];
    if volume.is_finite() && volume > 1.0e-6 {
        spacing = (volume / count).cbrt();
    } else if axes[1] > 1.0e-6 {
        spacing = ((axes[1] * axes[2]) / count).sqrt();
    } else if axes[2] > 1.0e-6 {
        spacing = axes[2] / count;
    }
    if !spacing.is_finite() || spacing <= 1.0e-6 {
        spacing = 1.0;
    }
    spacing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inconsistent_rows() {
        let rows: Vec<Vec<f32>> = vec![vec![0.0, 0.0, 0.0], vec![1.0, 1.0]];
        let err = PointCloud::from_rows(rows.as_slice()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn rejects_empty_and_ragged_buffers() {
        assert!(PointCloud::new(3, Vec::new()).is_err());
        assert!(PointCloud::new(3, vec![0.0; 4]).is_err());
        assert!(PointCloud::new(0, vec![0.0; 3]).is_err());
        assert!(PointCloud::new(2, vec![0.0, f32::NAN]).is_err());
    }

    #[test]
    fn feature_count_must_match_points() {
        let cloud = PointCloud::from_positions(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]).unwrap();
        assert!(cloud.clone().with_features(2, vec![0.0; 3]).is_err());
        let cloud = cloud.with_features(2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(cloud.view().feature(1), Some(&[3.0, 4.0][..]));
    }

    #[test]
    fn view_checks_local_range() {
        let cloud = PointCloud::from_rows(&[[0.0f32, 1.0], [2.0, 3.0]]).unwrap();
        let view = cloud.view();
        assert_eq!(view.len(), 2);
        assert_eq!(view.point(1), &[2.0, 3.0]);
        assert_eq!(view.spatial(1), Vec3::new(2.0, 3.0, 0.0));
        assert_eq!(
            view.checked_point(2),
            Err(EngineError::OutOfRange { index: 2, len: 2 })
        );
    }

    #[test]
    fn spacing_of_flat_grid_uses_area() {
        let mut rows = Vec::new();
        for y in 0..10 {
            for x in 0..10 {
                rows.push([x as f32, y as f32, 0.0]);
            }
        }
        let cloud = PointCloud::from_positions(&rows).unwrap();
        let domain: Vec<usize> = (0..cloud.len()).collect();
        let spacing = estimate_spacing(&cloud.view(), &domain);
        assert!((spacing - 0.9).abs() < 1.0e-4);
    }
}

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::batch::Batch;
use crate::cloud::CloudView;
use crate::config::{EngineConfig, Padding};
use crate::error::{check_index, EngineError, Result};
use crate::parallel::{map_indexed, CLOUD_THRESHOLD, QUERY_THRESHOLD};
use crate::spatial::{NeighborSet, SpatialIndex};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborMode {
    Radius { radius: f32 },
    Knn { k: usize },
}

impl NeighborMode {
    pub fn validate(&self) -> Result<()> {
        match *self {
            NeighborMode::Radius { radius } if !radius.is_finite() || radius < 0.0 => {
                Err(EngineError::invalid(format!(
                    "radius must be finite and non-negative, got {radius}"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Fixed result length the padding policy fills up to, if any.
    fn pad_target(&self, config: &EngineConfig) -> Option<usize> {
        match *self {
            NeighborMode::Knn { k } => Some(k),
            NeighborMode::Radius { .. } => config.max_neighbors,
        }
    }
}

/// Neighbor sets of one cloud, in the order its queries were supplied.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudNeighbors {
    pub cloud: usize,
    pub queries: Vec<usize>,
    pub sets: Vec<NeighborSet>,
}

impl CloudNeighbors {
    pub fn truncated_count(&self) -> usize {
        self.sets.iter().filter(|set| set.truncated).count()
    }

    pub fn underfilled_count(&self) -> usize {
        self.sets.iter().filter(|set| set.underfilled).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchNeighbors {
    pub clouds: Vec<Result<CloudNeighbors>>,
}

impl BatchNeighbors {
    pub fn failures(&self) -> impl Iterator<Item = (usize, &EngineError)> {
        self.clouds
            .iter()
            .enumerate()
            .filter_map(|(idx, result)| result.as_ref().err().map(|err| (idx, err)))
    }
}

/// Resolves the neighbors of every query list against its own cloud.
///
/// A list per cloud is required; a mismatch is a caller bug and fails the
/// whole call. Any other failure is reported for its cloud only.
pub fn query_batch(
    batch: &Batch,
    queries_per_cloud: &[Vec<usize>],
    mode: NeighborMode,
    config: &EngineConfig,
) -> Result<BatchNeighbors> {
    if queries_per_cloud.len() != batch.len() {
        return Err(EngineError::malformed(format!(
            "{} query lists supplied for {} clouds",
            queries_per_cloud.len(),
            batch.len()
        )));
    }
    config.validate()?;
    mode.validate()?;

    let clouds = map_indexed(batch.len(), CLOUD_THRESHOLD, |cloud| {
        let result = batch.cloud(cloud).and_then(|view| {
            let sets = query_cloud(view, None, &queries_per_cloud[cloud], mode, config)?;
            Ok(CloudNeighbors {
                cloud,
                queries: queries_per_cloud[cloud].clone(),
                sets,
            })
        });
        if let Err(err) = &result {
            warn!(cloud, %err, "neighbor query failed");
        }
        result
    });
    Ok(BatchNeighbors { clouds })
}

/// Builds one index over `domain` (the whole cloud when `None`) and answers
/// every query against it. Queries and results are cloud-local indices.
pub fn query_cloud(
    view: CloudView<'_>,
    domain: Option<&[usize]>,
    queries: &[usize],
    mode: NeighborMode,
    config: &EngineConfig,
) -> Result<Vec<NeighborSet>> {
    mode.validate()?;
    let len = view.len();
    for &query in queries {
        check_index(query, len)?;
    }
    if queries.is_empty() {
        return Ok(Vec::new());
    }

    let index = match domain {
        Some(domain) => SpatialIndex::build_over(view, domain, config)?,
        None => SpatialIndex::build(view, config)?,
    };
    let pad_target = mode.pad_target(config);

    let sets = map_indexed(queries.len(), QUERY_THRESHOLD, |slot| -> Result<NeighborSet> {
        let query = queries[slot];
        let mut set = match mode {
            NeighborMode::Radius { radius } => index.query_radius_of(query, radius)?,
            NeighborMode::Knn { k } => index.query_knn_of(query, k)?,
        };
        apply_padding(&mut set, query, pad_target, config.padding);
        Ok(set)
    });
    let sets = sets.into_iter().collect::<Result<Vec<_>>>()?;
    debug!(
        queries = queries.len(),
        indexed = index.len(),
        "resolved neighbor queries"
    );
    Ok(sets)
}

fn apply_padding(set: &mut NeighborSet, query: usize, target: Option<usize>, padding: Padding) {
    let Some(target) = target else {
        return;
    };
    match padding {
        Padding::None => {}
        Padding::RepeatSelf => set.pad_to(target, query),
        Padding::ZeroIndex => set.pad_to(target, 0),
    }
}

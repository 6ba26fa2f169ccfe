use std::collections::BTreeMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cloud::{domain_bounds, sq_distance, CloudView};
use crate::error::{check_index, EngineError, Result};
use crate::parallel::for_each_indexed_mut;
use crate::random::XorShift64;
use crate::spatial::cell_key;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoxelRepresentative {
    #[default]
    First,
    CentroidNearest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FpsStart {
    #[default]
    First,
    Index(usize),
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    Random {
        #[serde(default)]
        with_replacement: bool,
    },
    Voxel {
        /// Cell edge; non-positive derives one from the target count.
        #[serde(default)]
        cell_size: f32,
        #[serde(default)]
        representative: VoxelRepresentative,
    },
    FarthestPoint {
        #[serde(default)]
        start: FpsStart,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetCount {
    Count(usize),
    Ratio(f32),
}

impl TargetCount {
    pub fn resolve(&self, available: usize) -> Result<usize> {
        match *self {
            TargetCount::Count(count) => Ok(count),
            TargetCount::Ratio(ratio) => {
                if !ratio.is_finite() || ratio <= 0.0 || ratio > 1.0 {
                    return Err(EngineError::invalid(format!(
                        "sampling ratio must be in (0, 1], got {ratio}"
                    )));
                }
                Ok(((available as f32 * ratio).round() as usize).max(1))
            }
        }
    }
}

/// Retained subset of a cloud as cloud-local indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleSelection {
    pub indices: Vec<usize>,
    /// False for variable-yield strategies whose size need not equal the target.
    pub exact: bool,
}

impl SampleSelection {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn to_global(&self, view: &CloudView<'_>) -> Result<Vec<usize>> {
        self.indices.iter().map(|&idx| view.to_global(idx)).collect()
    }
}

pub fn sample(
    view: CloudView<'_>,
    strategy: &SamplingStrategy,
    target_count: usize,
    seed: u64,
) -> Result<SampleSelection> {
    let domain: Vec<usize> = (0..view.len()).collect();
    sample_from(view, &domain, strategy, target_count, seed)
}

/// Samples from `domain`, a subset of the cloud given as cloud-local indices.
/// Repeated domain entries count once.
pub fn sample_from(
    view: CloudView<'_>,
    domain: &[usize],
    strategy: &SamplingStrategy,
    target_count: usize,
    seed: u64,
) -> Result<SampleSelection> {
    let mut seen = vec![false; view.len()];
    let mut unique = Vec::with_capacity(domain.len());
    for &idx in domain {
        check_index(idx, view.len())?;
        if !std::mem::replace(&mut seen[idx], true) {
            unique.push(idx);
        }
    }
    let domain = unique.as_slice();
    if domain.is_empty() {
        return Err(EngineError::invalid("cannot sample from an empty point set"));
    }

    let selection = match *strategy {
        SamplingStrategy::Random { with_replacement } => SampleSelection {
            indices: random_sample(domain, target_count, with_replacement, seed)?,
            exact: true,
        },
        SamplingStrategy::Voxel {
            cell_size,
            representative,
        } => SampleSelection {
            indices: voxel_sample(&view, domain, cell_size, target_count, representative)?,
            exact: false,
        },
        SamplingStrategy::FarthestPoint { start } => {
            let start = match start {
                FpsStart::First => domain[0],
                FpsStart::Index(idx) => check_index(idx, view.len())?,
                FpsStart::Random => domain[XorShift64::new(seed).next_below(domain.len())],
            };
            SampleSelection {
                indices: farthest_point_sample(&view, domain, target_count, start)?,
                exact: true,
            }
        }
    };
    debug!(
        available = domain.len(),
        target = target_count,
        selected = selection.len(),
        "sampled point set"
    );
    Ok(selection)
}

fn random_sample(
    domain: &[usize],
    target: usize,
    with_replacement: bool,
    seed: u64,
) -> Result<Vec<usize>> {
    let mut rng = XorShift64::new(seed);
    if with_replacement {
        return Ok((0..target)
            .map(|_| domain[rng.next_below(domain.len())])
            .collect());
    }
    if target > domain.len() {
        return Err(EngineError::invalid(format!(
            "cannot draw {target} points without replacement from {}",
            domain.len()
        )));
    }
    let mut pool = domain.to_vec();
    for slot in 0..target {
        let pick = slot + rng.next_below(pool.len() - slot);
        pool.swap(slot, pick);
    }
    pool.truncate(target);
    Ok(pool)
}

fn voxel_sample(
    view: &CloudView<'_>,
    domain: &[usize],
    cell_size: f32,
    target: usize,
    representative: VoxelRepresentative,
) -> Result<Vec<usize>> {
    let (min, max) = domain_bounds(view, domain);
    let mut cell_size = cell_size;
    if !cell_size.is_finite() || cell_size <= 1.0e-6 {
        if target == 0 {
            return Err(EngineError::invalid(
                "voxel sampling needs a cell size or a target count",
            ));
        }
        cell_size = derive_cell_size(max - min, target);
    }
    let inv_cell = 1.0 / cell_size;

    let mut cells: BTreeMap<(i32, i32, i32), Vec<usize>> = BTreeMap::new();
    for &idx in domain {
        let key = cell_key(view.spatial(idx), min, inv_cell);
        cells.entry(key).or_default().push(idx);
    }

    let mut selected: Vec<usize> = cells
        .values()
        .map(|members| match representative {
            VoxelRepresentative::First => members[0],
            VoxelRepresentative::CentroidNearest => centroid_nearest(view, members),
        })
        .collect();
    selected.sort_unstable();
    selected.dedup();
    Ok(selected)
}

/// Cell edge giving roughly `target` occupied cells over the occupied extent.
fn derive_cell_size(extent: Vec3, target: usize) -> f32 {
    let mut axes: Vec<f32> = [extent.x, extent.y, extent.z]
        .into_iter()
        .filter(|axis| *axis > 1.0e-6)
        .collect();
    if axes.is_empty() {
        return 1.0;
    }
    axes.sort_by(|a, b| a.total_cmp(b));
    let measure: f32 = axes.iter().product();
    let size = (measure / target as f32).powf(1.0 / axes.len() as f32);
    if size.is_finite() && size > 1.0e-6 {
        size
    } else {
        1.0
    }
}

fn centroid_nearest(view: &CloudView<'_>, members: &[usize]) -> usize {
    let dim = view.dim();
    let mut centroid = vec![0.0f32; dim];
    for &idx in members {
        for (sum, value) in centroid.iter_mut().zip(view.point(idx)) {
            *sum += value;
        }
    }
    let inv = 1.0 / members.len() as f32;
    centroid.iter_mut().for_each(|value| *value *= inv);

    let mut best = members[0];
    let mut best_dist = f32::INFINITY;
    for &idx in members {
        let dist = sq_distance(view.point(idx), &centroid);
        if dist < best_dist || (dist == best_dist && idx < best) {
            best = idx;
            best_dist = dist;
        }
    }
    best
}

/// Greedy farthest point sampling over `domain`, starting at `start`.
///
/// Each step picks the point whose distance to the selected set is largest,
/// preferring the smallest index on ties.
pub fn farthest_point_sample(
    view: &CloudView<'_>,
    domain: &[usize],
    target: usize,
    start: usize,
) -> Result<Vec<usize>> {
    for &idx in domain {
        check_index(idx, view.len())?;
    }
    if target > domain.len() {
        return Err(EngineError::invalid(format!(
            "cannot select {target} points from {}",
            domain.len()
        )));
    }
    if target == 0 {
        return Ok(Vec::new());
    }

    let Some(mut current) = domain.iter().position(|&idx| idx == start) else {
        return Err(EngineError::invalid(format!(
            "start index {start} is not part of the sampled set"
        )));
    };

    let mut selected = Vec::with_capacity(target);
    // Chosen slots hold -1; duplicates of a chosen point keep 0 and stay eligible.
    let mut min_dist = vec![f32::INFINITY; domain.len()];
    loop {
        selected.push(domain[current]);
        min_dist[current] = -1.0;
        if selected.len() == target {
            break;
        }

        let anchor = view.point(domain[current]);
        for_each_indexed_mut(&mut min_dist, |slot, dist| {
            if *dist >= 0.0 {
                let d = sq_distance(view.point(domain[slot]), anchor);
                if d < *dist {
                    *dist = d;
                }
            }
        });

        let mut best: Option<(usize, f32)> = None;
        for (slot, &dist) in min_dist.iter().enumerate() {
            if dist < 0.0 {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_slot, best_dist)) => {
                    dist > best_dist || (dist == best_dist && domain[slot] < domain[best_slot])
                }
            };
            if better {
                best = Some((slot, dist));
            }
        }
        match best {
            Some((slot, _)) => current = slot,
            None => break,
        }
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::PointCloud;

    fn random_cloud(len: usize, seed: u64) -> PointCloud {
        let mut rng = XorShift64::new(seed);
        let coords = (0..len * 3).map(|_| rng.next_f32() * 10.0).collect();
        PointCloud::new(3, coords).unwrap()
    }

    #[test]
    fn fps_is_greedy_optimal_and_deterministic() {
        let cloud = random_cloud(200, 4);
        let view = cloud.view();
        let strategy = SamplingStrategy::FarthestPoint {
            start: FpsStart::First,
        };
        let first = sample(view, &strategy, 32, 1).unwrap();
        let again = sample(view, &strategy, 32, 99).unwrap();
        assert_eq!(first, again);
        assert_eq!(first.len(), 32);
        assert!(first.exact);

        let mut unique = first.indices.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 32);

        for step in 1..first.len() {
            let chosen = &first.indices[..step];
            let min_to = |idx: usize| {
                chosen
                    .iter()
                    .map(|&c| sq_distance(view.point(idx), view.point(c)))
                    .fold(f32::INFINITY, f32::min)
            };
            let picked = min_to(first.indices[step]);
            for idx in 0..view.len() {
                if !chosen.contains(&idx) {
                    assert!(picked >= min_to(idx));
                }
            }
        }
    }

    #[test]
    fn fps_large_cloud_matches_sequential_greedy() {
        let cloud = random_cloud(2000, 17);
        let view = cloud.view();
        let picked = farthest_point_sample(&view, &(0..2000).collect::<Vec<_>>(), 64, 0).unwrap();

        let mut expected = vec![0];
        let mut min_dist = vec![f32::INFINITY; view.len()];
        while expected.len() < 64 {
            let anchor = view.point(expected[expected.len() - 1]);
            for (idx, dist) in min_dist.iter_mut().enumerate() {
                *dist = dist.min(sq_distance(view.point(idx), anchor));
            }
            let mut best = None;
            for (idx, &dist) in min_dist.iter().enumerate() {
                if expected.contains(&idx) {
                    continue;
                }
                if best.map_or(true, |(_, best_dist)| dist > best_dist) {
                    best = Some((idx, dist));
                }
            }
            expected.push(best.unwrap().0);
        }
        assert_eq!(picked, expected);
    }

    #[test]
    fn fps_ties_prefer_smallest_index() {
        let cloud = PointCloud::from_positions(&[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [-1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
        ])
        .unwrap();
        let picked = farthest_point_sample(&cloud.view(), &[0, 1, 2, 3], 3, 0).unwrap();
        assert_eq!(picked, vec![0, 1, 2]);
    }

    #[test]
    fn fps_handles_duplicates_and_exact_size() {
        let cloud = PointCloud::from_positions(&[[2.0, 2.0, 2.0]; 5]).unwrap();
        let strategy = SamplingStrategy::FarthestPoint {
            start: FpsStart::Index(3),
        };
        let picked = sample(cloud.view(), &strategy, 5, 0).unwrap();
        assert_eq!(picked.indices, vec![3, 0, 1, 2, 4]);
        let err = sample(cloud.view(), &strategy, 6, 0).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn fps_respects_domain() {
        let cloud = random_cloud(50, 8);
        let domain: Vec<usize> = (10..30).collect();
        let strategy = SamplingStrategy::FarthestPoint {
            start: FpsStart::Random,
        };
        let picked = sample_from(cloud.view(), &domain, &strategy, 20, 5).unwrap();
        let mut sorted = picked.indices.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, domain);

        let outside = SamplingStrategy::FarthestPoint {
            start: FpsStart::Index(3),
        };
        assert!(sample_from(cloud.view(), &domain, &outside, 4, 0).is_err());
    }

    #[test]
    fn random_sampling_is_seeded_and_unique() {
        let cloud = random_cloud(40, 2);
        let strategy = SamplingStrategy::Random {
            with_replacement: false,
        };
        let a = sample(cloud.view(), &strategy, 15, 42).unwrap();
        let b = sample(cloud.view(), &strategy, 15, 42).unwrap();
        let c = sample(cloud.view(), &strategy, 15, 43).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        let mut unique = a.indices.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 15);
        assert!(a.indices.iter().all(|&idx| idx < 40));

        assert!(sample(cloud.view(), &strategy, 41, 1).is_err());
        let replace = SamplingStrategy::Random {
            with_replacement: true,
        };
        assert_eq!(sample(cloud.view(), &replace, 100, 1).unwrap().len(), 100);
    }

    #[test]
    fn voxel_keeps_one_point_per_cell() {
        let cloud = PointCloud::from_positions(&[
            [0.1, 0.1, 0.1],
            [0.2, 0.3, 0.1],
            [1.5, 0.2, 0.0],
            [1.6, 0.1, 0.4],
            [3.2, 3.3, 3.4],
        ])
        .unwrap();
        let strategy = SamplingStrategy::Voxel {
            cell_size: 1.0,
            representative: VoxelRepresentative::First,
        };
        let first = sample(cloud.view(), &strategy, 0, 0).unwrap();
        assert_eq!(first.indices, vec![0, 2, 4]);
        assert!(!first.exact);
        assert_eq!(sample(cloud.view(), &strategy, 0, 0).unwrap(), first);

        let view = cloud.view();
        let (min, _) = domain_bounds(&view, &[0, 1, 2, 3, 4]);
        let mut keys: Vec<_> = first
            .indices
            .iter()
            .map(|&idx| cell_key(view.spatial(idx), min, 1.0))
            .collect();
        keys.dedup();
        assert_eq!(keys.len(), first.len());

        let centroid = SamplingStrategy::Voxel {
            cell_size: 1.0,
            representative: VoxelRepresentative::CentroidNearest,
        };
        let picked = sample(cloud.view(), &centroid, 0, 0).unwrap();
        assert_eq!(picked.len(), 3);
    }

    #[test]
    fn voxel_centroid_nearest_differs_from_first() {
        let cloud = PointCloud::from_positions(&[
            [0.0, 0.0, 0.0],
            [0.5, 0.5, 0.5],
            [0.9, 0.9, 0.9],
            [2.5, 0.2, 0.2],
        ])
        .unwrap();
        let first = SamplingStrategy::Voxel {
            cell_size: 1.0,
            representative: VoxelRepresentative::First,
        };
        let centroid = SamplingStrategy::Voxel {
            cell_size: 1.0,
            representative: VoxelRepresentative::CentroidNearest,
        };
        assert_eq!(sample(cloud.view(), &first, 0, 0).unwrap().indices, vec![0, 3]);
        assert_eq!(sample(cloud.view(), &centroid, 0, 0).unwrap().indices, vec![1, 3]);
    }

    #[test]
    fn voxel_derives_cell_size_from_target() {
        let mut rows = Vec::new();
        for z in 0..4 {
            for y in 0..4 {
                for x in 0..4 {
                    rows.push([x as f32, y as f32, z as f32]);
                }
            }
        }
        let cloud = PointCloud::from_positions(&rows).unwrap();
        let strategy = SamplingStrategy::Voxel {
            cell_size: 0.0,
            representative: VoxelRepresentative::First,
        };
        let picked = sample(cloud.view(), &strategy, 8, 0).unwrap();
        assert!(!picked.is_empty() && picked.len() < rows.len());
        assert!(sample(cloud.view(), &strategy, 0, 0).is_err());
    }

    #[test]
    fn ratio_targets_resolve() {
        assert_eq!(TargetCount::Ratio(0.5).resolve(9).unwrap(), 5);
        assert_eq!(TargetCount::Ratio(0.01).resolve(9).unwrap(), 1);
        assert_eq!(TargetCount::Count(3).resolve(9).unwrap(), 3);
        assert!(TargetCount::Ratio(1.5).resolve(9).is_err());
    }
}

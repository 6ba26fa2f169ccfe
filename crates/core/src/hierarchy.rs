#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;
#[cfg(target_arch = "wasm32")]
use web_time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::batch::Batch;
use crate::cloud::CloudView;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::parallel::{map_indexed, CLOUD_THRESHOLD};
use crate::progress::{ProgressEvent, RunControl};
use crate::query::{query_cloud, NeighborMode};
use crate::random::XorShift64;
use crate::sampling::{sample_from, SampleSelection, SamplingStrategy, TargetCount};
use crate::spatial::NeighborSet;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerSpec {
    pub strategy: SamplingStrategy,
    pub target: TargetCount,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryDirection {
    /// Each newly sampled point looks up its neighbors among the previous level.
    #[default]
    SampleToPrevious,
    /// Each previous-level point looks up its neighbors among the new sample.
    PreviousToSample,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NeighborSpec {
    pub mode: NeighborMode,
    #[serde(default)]
    pub direction: QueryDirection,
}

/// One downsampling stage. Without a sampler the previous level's points are
/// kept as they are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelSpec {
    pub sampler: Option<SamplerSpec>,
    pub neighbors: Option<NeighborSpec>,
}

impl LevelSpec {
    pub fn sample(strategy: SamplingStrategy, target: TargetCount) -> Self {
        Self {
            sampler: Some(SamplerSpec { strategy, target }),
            neighbors: None,
        }
    }

    pub fn neighbors(mode: NeighborMode) -> Self {
        Self {
            sampler: None,
            neighbors: Some(NeighborSpec {
                mode,
                direction: QueryDirection::default(),
            }),
        }
    }

    pub fn with_neighbors(mut self, mode: NeighborMode, direction: QueryDirection) -> Self {
        self.neighbors = Some(NeighborSpec { mode, direction });
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LevelResult {
    pub level: usize,
    /// Points retained by this level, cloud-local.
    pub sample: SampleSelection,
    /// Query points of the neighbor step, in the order of `neighbors`.
    pub queries: Vec<usize>,
    pub neighbors: Option<Vec<NeighborSet>>,
    pub duration_ms: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloudHierarchy {
    pub cloud: usize,
    pub levels: Vec<LevelResult>,
    pub duration_ms: f32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cloud {cloud} failed at level {level}: {error}")]
pub struct LevelFailure {
    pub cloud: usize,
    pub level: usize,
    #[source]
    pub error: EngineError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyReport {
    pub clouds: Vec<std::result::Result<CloudHierarchy, LevelFailure>>,
}

impl HierarchyReport {
    pub fn failures(&self) -> impl Iterator<Item = &LevelFailure> {
        self.clouds.iter().filter_map(|result| result.as_ref().err())
    }

    pub fn level(&self, cloud: usize, level: usize) -> Result<&LevelResult> {
        let outcome = self.clouds.get(cloud).ok_or(EngineError::OutOfRange {
            index: cloud,
            len: self.clouds.len(),
        })?;
        let hierarchy = outcome.as_ref().map_err(|failure| failure.error.clone())?;
        hierarchy.levels.get(level).ok_or(EngineError::OutOfRange {
            index: level,
            len: hierarchy.levels.len(),
        })
    }

    /// Sampled indices of one level as offsets into the batch buffer.
    pub fn global_sample(&self, batch: &Batch, cloud: usize, level: usize) -> Result<Vec<usize>> {
        let view = batch.cloud(cloud)?;
        self.level(cloud, level)?.sample.to_global(&view)
    }

    /// Neighbor lists of one level as offsets into the batch buffer.
    pub fn global_neighbors(
        &self,
        batch: &Batch,
        cloud: usize,
        level: usize,
    ) -> Result<Option<Vec<Vec<usize>>>> {
        let view = batch.cloud(cloud)?;
        let Some(sets) = &self.level(cloud, level)?.neighbors else {
            return Ok(None);
        };
        sets.iter()
            .map(|set| {
                set.indices
                    .iter()
                    .map(|&idx| view.to_global(idx))
                    .collect::<Result<Vec<usize>>>()
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}

/// Runs every level for every cloud. Levels of one cloud run in order, each
/// consuming the points the previous level kept; clouds run concurrently and
/// a failing cloud does not stop its siblings.
pub fn build_hierarchy(
    batch: &Batch,
    levels: &[LevelSpec],
    config: &EngineConfig,
    control: &RunControl,
) -> Result<HierarchyReport> {
    config.validate()?;
    for level in levels {
        if let Some(neighbors) = &level.neighbors {
            neighbors.mode.validate()?;
        }
    }

    let clouds = map_indexed(batch.len(), CLOUD_THRESHOLD, |cloud| {
        let result = batch
            .cloud(cloud)
            .map_err(|error| LevelFailure {
                cloud,
                level: 0,
                error,
            })
            .and_then(|view| build_cloud(view, cloud, levels, config, control));
        if let Err(failure) = &result {
            warn!(
                cloud = failure.cloud,
                level = failure.level,
                error = %failure.error,
                "hierarchy construction failed"
            );
        }
        result
    });
    Ok(HierarchyReport { clouds })
}

fn build_cloud(
    view: CloudView<'_>,
    cloud: usize,
    levels: &[LevelSpec],
    config: &EngineConfig,
    control: &RunControl,
) -> std::result::Result<CloudHierarchy, LevelFailure> {
    let start = Instant::now();
    control.emit(ProgressEvent::Start { cloud });

    let mut rng = XorShift64::for_cloud(config.seed, cloud);
    let mut previous: Vec<usize> = (0..view.len()).collect();
    let mut results = Vec::with_capacity(levels.len());
    let mut outcome = Ok(());

    for (level, spec) in levels.iter().enumerate() {
        if control.is_cancelled() {
            outcome = Err(LevelFailure {
                cloud,
                level,
                error: EngineError::Cancelled,
            });
            break;
        }
        let level_seed = rng.next_u64();
        match build_level(view, &previous, spec, config, level_seed) {
            Ok(mut result) => {
                result.level = level;
                debug!(
                    cloud,
                    level,
                    retained = result.sample.len(),
                    duration_ms = result.duration_ms,
                    "built hierarchy level"
                );
                previous = result.sample.indices.clone();
                results.push(result);
                control.emit(ProgressEvent::Advance {
                    cloud,
                    fraction: (level + 1) as f32 / levels.len() as f32,
                });
            }
            Err(error) => {
                outcome = Err(LevelFailure {
                    cloud,
                    level,
                    error,
                });
                break;
            }
        }
    }

    control.emit(ProgressEvent::Finish { cloud });
    outcome.map(|()| CloudHierarchy {
        cloud,
        levels: results,
        duration_ms: start.elapsed().as_secs_f32() * 1000.0,
    })
}

fn build_level(
    view: CloudView<'_>,
    previous: &[usize],
    spec: &LevelSpec,
    config: &EngineConfig,
    seed: u64,
) -> Result<LevelResult> {
    let start = Instant::now();
    let sample = match &spec.sampler {
        Some(sampler) => {
            let target = sampler.target.resolve(previous.len())?;
            sample_from(view, previous, &sampler.strategy, target, seed)?
        }
        None => SampleSelection {
            indices: previous.to_vec(),
            exact: true,
        },
    };

    let (queries, neighbors) = match &spec.neighbors {
        Some(neighbors) => {
            let (queries, domain) = match neighbors.direction {
                QueryDirection::SampleToPrevious => (sample.indices.clone(), previous),
                QueryDirection::PreviousToSample => (previous.to_vec(), sample.indices.as_slice()),
            };
            let sets = query_cloud(view, Some(domain), &queries, neighbors.mode, config)?;
            (queries, Some(sets))
        }
        None => (Vec::new(), None),
    };

    Ok(LevelResult {
        level: 0,
        sample,
        queries,
        neighbors,
        duration_ms: start.elapsed().as_secs_f32() * 1000.0,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::cloud::PointCloud;
    use crate::progress::{CancelToken, ProgressSink};
    use crate::sampling::FpsStart;

    fn scenario_batch() -> Batch {
        let a = PointCloud::from_positions(&[
            [0.0, 0.0, 0.0],
            [0.5, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.5, 0.0, 0.0],
            [2.0, 0.0, 0.0],
        ])
        .unwrap();
        let b = PointCloud::from_positions(&[[10.0, 0.0, 0.0], [10.5, 0.0, 0.0], [11.0, 0.0, 0.0]])
            .unwrap();
        Batch::build(vec![a, b]).unwrap()
    }

    fn fps(target: usize) -> LevelSpec {
        LevelSpec::sample(
            SamplingStrategy::FarthestPoint {
                start: FpsStart::First,
            },
            TargetCount::Count(target),
        )
    }

    #[test]
    fn two_level_scenario_respects_cloud_ranges() {
        let batch = scenario_batch();
        let levels = [fps(3), LevelSpec::neighbors(NeighborMode::Radius { radius: 1.0 })];
        let report =
            build_hierarchy(&batch, &levels, &EngineConfig::default(), &RunControl::new()).unwrap();
        assert_eq!(report.failures().count(), 0);

        let a = report.clouds[0].as_ref().unwrap();
        assert_eq!(a.levels[0].sample.indices, vec![0, 4, 2]);
        let b = report.clouds[1].as_ref().unwrap();
        assert_eq!(b.levels[0].sample.indices, vec![0, 2, 1]);

        let neighbors = a.levels[1].neighbors.as_ref().unwrap();
        assert_eq!(a.levels[1].queries, vec![0, 4, 2]);
        assert_eq!(neighbors[0].indices, vec![0, 2]);
        assert_eq!(neighbors[2].indices, vec![2, 0, 4]);

        let global = report.global_neighbors(&batch, 1, 1).unwrap().unwrap();
        for list in &global {
            assert!(list.iter().all(|&idx| (5..8).contains(&idx)));
        }
        assert_eq!(report.global_sample(&batch, 1, 0).unwrap(), vec![5, 7, 6]);
    }

    #[test]
    fn failing_cloud_reports_level_and_spares_siblings() {
        let batch = scenario_batch();
        let levels = [fps(4), LevelSpec::neighbors(NeighborMode::Knn { k: 2 })];
        let report =
            build_hierarchy(&batch, &levels, &EngineConfig::default(), &RunControl::new()).unwrap();
        assert!(report.clouds[0].is_ok());
        let failure = report.clouds[1].as_ref().unwrap_err();
        assert_eq!((failure.cloud, failure.level), (1, 0));
        assert!(matches!(failure.error, EngineError::InvalidInput(_)));
        assert!(report.global_sample(&batch, 1, 0).is_err());

        let levels = [fps(3), fps(3), fps(3)];
        let report =
            build_hierarchy(&batch, &levels, &EngineConfig::default(), &RunControl::new()).unwrap();
        assert!(report.failures().next().is_none());
        let levels = [fps(3), fps(2), fps(3)];
        let report =
            build_hierarchy(&batch, &levels, &EngineConfig::default(), &RunControl::new()).unwrap();
        assert_eq!(report.failures().map(|f| f.level).collect::<Vec<_>>(), vec![2, 2]);
    }

    #[test]
    fn later_levels_sample_from_previous_points() {
        let batch = scenario_batch();
        let levels = [
            fps(4),
            LevelSpec::sample(
                SamplingStrategy::Random {
                    with_replacement: false,
                },
                TargetCount::Ratio(0.5),
            ),
        ];
        let report =
            build_hierarchy(&batch, &levels, &EngineConfig::default(), &RunControl::new()).unwrap();
        let a = report.clouds[0].as_ref().unwrap();
        let first = &a.levels[0].sample.indices;
        let second = &a.levels[1].sample.indices;
        assert_eq!(second.len(), 2);
        assert!(second.iter().all(|idx| first.contains(idx)));
    }

    #[test]
    fn previous_to_sample_direction_queries_old_points() {
        let batch = scenario_batch();
        let levels = [fps(2).with_neighbors(
            NeighborMode::Knn { k: 1 },
            QueryDirection::PreviousToSample,
        )];
        let report =
            build_hierarchy(&batch, &levels, &EngineConfig::default(), &RunControl::new()).unwrap();
        let a = report.clouds[0].as_ref().unwrap();
        let level = &a.levels[0];
        assert_eq!(level.sample.indices, vec![0, 4]);
        assert_eq!(level.queries, vec![0, 1, 2, 3, 4]);
        let nearest: Vec<usize> = level
            .neighbors
            .as_ref()
            .unwrap()
            .iter()
            .map(|set| set.indices[0])
            .collect();
        assert_eq!(nearest, vec![0, 0, 0, 4, 4]);
    }

    #[test]
    fn cancellation_stops_before_next_level() {
        let batch = scenario_batch();
        let token = CancelToken::new();
        token.cancel();
        let control = RunControl::new().with_cancel(token);
        let report =
            build_hierarchy(&batch, &[fps(2)], &EngineConfig::default(), &control).unwrap();
        for (cloud, outcome) in report.clouds.iter().enumerate() {
            assert_eq!(
                outcome.as_ref().unwrap_err(),
                &LevelFailure {
                    cloud,
                    level: 0,
                    error: EngineError::Cancelled
                }
            );
        }
    }

    #[test]
    fn progress_brackets_each_cloud() {
        let batch = scenario_batch();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink: ProgressSink = {
            let events = Arc::clone(&events);
            Arc::new(move |event: ProgressEvent| events.lock().unwrap().push(event))
        };
        let control = RunControl::new().with_progress(sink);
        build_hierarchy(&batch, &[fps(2), fps(1)], &EngineConfig::default(), &control).unwrap();

        let events = events.lock().unwrap();
        for cloud in 0..2 {
            let mine: Vec<&ProgressEvent> = events
                .iter()
                .filter(|event| match event {
                    ProgressEvent::Start { cloud: c }
                    | ProgressEvent::Advance { cloud: c, .. }
                    | ProgressEvent::Finish { cloud: c } => *c == cloud,
                })
                .collect();
            assert_eq!(mine.len(), 4);
            assert_eq!(mine[0], &ProgressEvent::Start { cloud });
            assert_eq!(
                mine[2],
                &ProgressEvent::Advance {
                    cloud,
                    fraction: 1.0
                }
            );
            assert_eq!(mine[3], &ProgressEvent::Finish { cloud });
        }
    }

    #[test]
    fn level_specs_parse_from_json() {
        let json = r#"[
            {"sampler": {"strategy": {"farthest_point": {"start": "first"}}, "target": {"count": 3}}},
            {"neighbors": {"mode": {"radius": {"radius": 1.0}}}}
        ]"#;
        let levels: Vec<LevelSpec> = serde_json::from_str(json).unwrap();
        assert_eq!(levels[0], fps(3));
        assert_eq!(
            levels[1],
            LevelSpec::neighbors(NeighborMode::Radius { radius: 1.0 })
        );
    }
}

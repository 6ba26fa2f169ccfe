mod batch;
mod cloud;
mod config;
mod error;
mod hierarchy;
mod parallel;
mod patch;
mod plan;
mod progress;
mod query;
mod random;
mod sampling;
mod spatial;

pub use batch::Batch;
pub use cloud::{CloudView, Features, PointCloud};
pub use config::{CellSize, EngineConfig, IndexBackend, Padding, DEFAULT_LEAF_SIZE, DEFAULT_SEED};
pub use error::{EngineError, Result};
pub use hierarchy::{
    build_hierarchy, CloudHierarchy, HierarchyReport, LevelFailure, LevelResult, LevelSpec,
    NeighborSpec, QueryDirection, SamplerSpec,
};
pub use patch::{ball_patch, bounding_box, GridPatches};
pub use plan::{CloudSpec, Plan};
pub use progress::{CancelToken, ProgressEvent, ProgressSink, RunControl};
pub use query::{query_batch, query_cloud, BatchNeighbors, CloudNeighbors, NeighborMode};
pub use sampling::{
    farthest_point_sample, sample, sample_from, FpsStart, SampleSelection, SamplingStrategy,
    TargetCount, VoxelRepresentative,
};
pub use spatial::{GridIndex, IndexStructure, KdTree, NeighborSet, SpatialIndex};

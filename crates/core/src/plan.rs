use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::cloud::PointCloud;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::hierarchy::LevelSpec;

/// One cloud of a plan, either a flat buffer or a list of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CloudSpec {
    Flat { dim: usize, coords: Vec<f32> },
    Points { points: Vec<Vec<f32>> },
}

impl CloudSpec {
    pub fn to_cloud(&self) -> Result<PointCloud> {
        match self {
            CloudSpec::Flat { dim, coords } => PointCloud::new(*dim, coords.clone()),
            CloudSpec::Points { points } => PointCloud::from_rows(points.as_slice()),
        }
    }
}

/// A batch of clouds together with the hierarchy to build over it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub clouds: Vec<CloudSpec>,
    #[serde(default)]
    pub config: EngineConfig,
    #[serde(default)]
    pub levels: Vec<LevelSpec>,
}

impl Plan {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|err| EngineError::invalid(format!("bad plan: {err}")))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| EngineError::invalid(err.to_string()))
    }

    pub fn batch(&self) -> Result<Batch> {
        let clouds = self
            .clouds
            .iter()
            .map(CloudSpec::to_cloud)
            .collect::<Result<Vec<_>>>()?;
        Batch::build(clouds)
    }
}

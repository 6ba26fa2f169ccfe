use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub const DEFAULT_LEAF_SIZE: usize = 16;
pub const DEFAULT_SEED: u64 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    #[default]
    Grid,
    Tree,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellSize {
    #[default]
    Auto,
    Fixed(f32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    #[default]
    None,
    RepeatSelf,
    ZeroIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub index_backend: IndexBackend,
    pub cell_size: CellSize,
    pub leaf_size: usize,
    pub max_neighbors: Option<usize>,
    pub self_include: bool,
    pub padding: Padding,
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_backend: IndexBackend::Grid,
            cell_size: CellSize::Auto,
            leaf_size: DEFAULT_LEAF_SIZE,
            max_neighbors: None,
            self_include: true,
            padding: Padding::None,
            seed: DEFAULT_SEED,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: IndexBackend) -> Self {
        self.index_backend = backend;
        self
    }

    pub fn with_cell_size(mut self, cell_size: CellSize) -> Self {
        self.cell_size = cell_size;
        self
    }

    pub fn with_max_neighbors(mut self, max_neighbors: Option<usize>) -> Self {
        self.max_neighbors = max_neighbors;
        self
    }

    pub fn with_self_include(mut self, self_include: bool) -> Self {
        self.self_include = self_include;
        self
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let CellSize::Fixed(size) = self.cell_size {
            if !size.is_finite() || size <= 0.0 {
                return Err(EngineError::invalid(format!(
                    "cell size must be positive and finite, got {size}"
                )));
            }
        }
        if self.leaf_size == 0 {
            return Err(EngineError::invalid("leaf size must be at least 1"));
        }
        if self.max_neighbors == Some(0) {
            return Err(EngineError::invalid("max_neighbors must be at least 1"));
        }
        Ok(())
    }
}

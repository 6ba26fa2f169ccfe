mod grid;
mod kdtree;
mod neighbors;


use tracing::debug;

use crate::cloud::{estimate_spacing, CloudView};
use crate::config::{CellSize, EngineConfig, IndexBackend};
use crate::error::{check_index, EngineError, Result};

pub(crate) use grid::cell_key;
pub use grid::GridIndex;
pub use kdtree::KdTree;
use neighbors::{sort_candidates, KnnHeap};
pub use neighbors::NeighborSet;

/// Multiple of the estimated spacing used as the automatic grid cell edge.
const AUTO_CELL_FACTOR: f32 = 2.0;

#[derive(Debug, Clone)]
pub enum IndexStructure {
    Grid(GridIndex),
    Tree(KdTree),
}

/// Read-only spatial index over (a subset of) one cloud.
///
/// The index borrows the cloud's coordinates and stores only indices, so it
/// can be shared across threads and cannot outlive a mutation of the batch.
#[derive(Debug, Clone)]
pub struct SpatialIndex<'a> {
    view: CloudView<'a>,
    structure: IndexStructure,
    self_include: bool,
    max_neighbors: Option<usize>,
}

impl<'a> SpatialIndex<'a> {
    pub fn build(view: CloudView<'a>, config: &EngineConfig) -> Result<Self> {
        let domain: Vec<usize> = (0..view.len()).collect();
        Self::build_members(view, domain, config)
    }

    /// Indexes only `domain` (cloud-local indices); queries may still be
    /// issued from any point of the cloud.
    pub fn build_over(
        view: CloudView<'a>,
        domain: &[usize],
        config: &EngineConfig,
    ) -> Result<Self> {
        let len = view.len();
        for &idx in domain {
            check_index(idx, len)?;
        }
        let mut members = domain.to_vec();
        members.sort_unstable();
        members.dedup();
        Self::build_members(view, members, config)
    }

    fn build_members(
        view: CloudView<'a>,
        members: Vec<usize>,
        config: &EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        if members.is_empty() {
            return Err(EngineError::invalid("cannot index an empty point set"));
        }
        let structure = match config.index_backend {
            IndexBackend::Grid => {
                let cell_size = match config.cell_size {
                    CellSize::Fixed(size) => size,
                    CellSize::Auto => estimate_spacing(&view, &members) * AUTO_CELL_FACTOR,
                };
                let grid = GridIndex::build(&view, members, cell_size);
                debug!(
                    points = grid.len(),
                    cells = grid.occupied_cells(),
                    cell_size = grid.cell_size(),
                    "built grid index"
                );
                IndexStructure::Grid(grid)
            }
            IndexBackend::Tree => {
                let tree = KdTree::build(&view, members, config.leaf_size);
                debug!(points = tree.len(), depth = tree.depth(), "built k-d tree");
                IndexStructure::Tree(tree)
            }
        };
        Ok(Self {
            view,
            structure,
            self_include: config.self_include,
            max_neighbors: config.max_neighbors,
        })
    }

    pub fn view(&self) -> &CloudView<'a> {
        &self.view
    }

    pub fn structure(&self) -> &IndexStructure {
        &self.structure
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        match &self.structure {
            IndexStructure::Grid(grid) => grid.len(),
            IndexStructure::Tree(tree) => tree.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn query_radius(&self, point: &[f32], radius: f32) -> Result<NeighborSet> {
        self.check_query(point)?;
        self.radius_excluding(point, radius, None)
    }

    pub fn query_knn(&self, point: &[f32], k: usize) -> Result<NeighborSet> {
        self.check_query(point)?;
        Ok(self.knn_excluding(point, k, None))
    }

    /// Radius query around cloud point `index`; the point itself is kept only
    /// when `self_include` is set.
    pub fn query_radius_of(&self, index: usize, radius: f32) -> Result<NeighborSet> {
        let point = self.view.checked_point(index)?;
        self.radius_excluding(point, radius, self.excluded(index))
    }

    pub fn query_knn_of(&self, index: usize, k: usize) -> Result<NeighborSet> {
        let point = self.view.checked_point(index)?;
        Ok(self.knn_excluding(point, k, self.excluded(index)))
    }

    fn excluded(&self, index: usize) -> Option<usize> {
        (!self.self_include).then_some(index)
    }

    fn check_query(&self, point: &[f32]) -> Result<()> {
        if point.len() != self.view.dim() {
            return Err(EngineError::invalid(format!(
                "query has dimension {}, cloud has {}",
                point.len(),
                self.view.dim()
            )));
        }
        if point.iter().any(|value| !value.is_finite()) {
            return Err(EngineError::invalid("query point has non-finite coordinates"));
        }
        Ok(())
    }

    fn radius_excluding(
        &self,
        point: &[f32],
        radius: f32,
        exclude: Option<usize>,
    ) -> Result<NeighborSet> {
        if !radius.is_finite() || radius < 0.0 {
            return Err(EngineError::invalid(format!(
                "radius must be finite and non-negative, got {radius}"
            )));
        }
        let sq_radius = radius * radius;
        let mut candidates = Vec::new();
        match &self.structure {
            IndexStructure::Grid(grid) => {
                grid.radius(&self.view, point, sq_radius, radius, exclude, &mut candidates)
            }
            IndexStructure::Tree(tree) => {
                tree.radius(&self.view, point, sq_radius, exclude, &mut candidates)
            }
        }
        sort_candidates(&mut candidates);
        let mut truncated = false;
        if let Some(cap) = self.max_neighbors {
            if candidates.len() > cap {
                candidates.truncate(cap);
                truncated = true;
            }
        }
        let mut set = NeighborSet::from_sorted(candidates);
        set.truncated = truncated;
        Ok(set)
    }

    fn knn_excluding(&self, point: &[f32], k: usize, exclude: Option<usize>) -> NeighborSet {
        if k == 0 {
            return NeighborSet::default();
        }
        let mut heap = KnnHeap::new(k);
        match &self.structure {
            IndexStructure::Grid(grid) => grid.knn(&self.view, point, exclude, &mut heap),
            IndexStructure::Tree(tree) => tree.knn(&self.view, point, exclude, &mut heap),
        }
        let mut set = NeighborSet::from_sorted(heap.into_sorted());
        set.underfilled = set.len() < k;
        set
    }
}

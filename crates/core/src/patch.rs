use glam::{Vec2, Vec3};

use crate::cloud::{domain_bounds, CloudView};
use crate::error::{EngineError, Result};
use crate::spatial::{NeighborSet, SpatialIndex};

/// Per-axis min and max over the first three coordinates of every point.
pub fn bounding_box(view: &CloudView<'_>) -> (Vec3, Vec3) {
    let domain: Vec<usize> = (0..view.len()).collect();
    domain_bounds(view, &domain)
}

/// Overlapping XY blocks tiling a cloud. Neighboring blocks share a band of
/// width `context`, and a block's inner region drops `context` from each side.
#[derive(Debug, Clone)]
pub struct GridPatches<'a> {
    view: CloudView<'a>,
    min: Vec2,
    max: Vec2,
    block: Vec2,
    stride: Vec2,
    context: f32,
    blocks_x: usize,
    blocks_y: usize,
}

impl<'a> GridPatches<'a> {
    pub fn new(view: CloudView<'a>, block: [f32; 2], context: f32) -> Result<Self> {
        if view.is_empty() {
            return Err(EngineError::invalid("cannot cut patches from an empty cloud"));
        }
        let block = Vec2::from(block);
        if !block.is_finite() || !context.is_finite() || context < 0.0 {
            return Err(EngineError::invalid(format!(
                "invalid patch block {block} with context {context}"
            )));
        }
        let stride = block - Vec2::splat(context);
        if stride.min_element() <= 0.0 {
            return Err(EngineError::invalid(format!(
                "patch context {context} leaves no stride inside block {block}"
            )));
        }

        let (min, max) = bounding_box(&view);
        let (min, max) = (min.truncate(), max.truncate());
        let extent = max - min;
        let blocks_x = ((extent.x / stride.x).ceil() as usize).max(1);
        let blocks_y = ((extent.y / stride.y).ceil() as usize).max(1);
        Ok(Self {
            view,
            min,
            max,
            block,
            stride,
            context,
            blocks_x,
            blocks_y,
        })
    }

    pub fn len(&self) -> usize {
        self.blocks_x * self.blocks_y
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn grid_shape(&self) -> (usize, usize) {
        (self.blocks_y, self.blocks_x)
    }

    /// XY bounds of patch `patch`, clipped to the cloud's extent.
    pub fn block_bounds(&self, patch: usize) -> Result<(Vec2, Vec2)> {
        if patch >= self.len() {
            return Err(EngineError::OutOfRange {
                index: patch,
                len: self.len(),
            });
        }
        let (row, col) = (patch / self.blocks_x, patch % self.blocks_x);
        let start = self.min + Vec2::new(col as f32, row as f32) * self.stride;
        let end = (start + self.block).min(self.max);
        Ok((start, end))
    }

    pub fn inner_bounds(&self, patch: usize) -> Result<(Vec2, Vec2)> {
        let (start, end) = self.block_bounds(patch)?;
        let context = Vec2::splat(self.context);
        Ok((start + context, end - context))
    }

    pub fn block_indices(&self, patch: usize) -> Result<Vec<usize>> {
        let (lo, hi) = self.block_bounds(patch)?;
        Ok(self.indices_within(lo, hi))
    }

    pub fn inner_indices(&self, patch: usize) -> Result<Vec<usize>> {
        let (lo, hi) = self.inner_bounds(patch)?;
        Ok(self.indices_within(lo, hi))
    }

    fn indices_within(&self, lo: Vec2, hi: Vec2) -> Vec<usize> {
        (0..self.view.len())
            .filter(|&idx| {
                let p = self.view.spatial(idx).truncate();
                p.cmpge(lo).all() && p.cmple(hi).all()
            })
            .collect()
    }
}

/// Ball of points around cloud point `center`.
pub fn ball_patch(index: &SpatialIndex<'_>, center: usize, radius: f32) -> Result<NeighborSet> {
    index.query_radius_of(center, radius)
}

use std::collections::HashMap;

use glam::Vec3;

use crate::cloud::{domain_bounds, spatial_of, CloudView};

use super::neighbors::{Candidate, KnnHeap};

type CellKey = (i32, i32, i32);

/// Keeps the number of cells along any axis within i32 range.
const MAX_CELLS_PER_AXIS: f32 = 1.0e6;

/// Uniform grid over the first three coordinates of a domain.
///
/// `order` is the domain sorted by cell; each occupied cell maps to a
/// contiguous slice of it.
#[derive(Debug, Clone)]
pub struct GridIndex {
    cell_size: f32,
    inv_cell: f32,
    origin: Vec3,
    order: Vec<usize>,
    cells: HashMap<CellKey, (usize, usize)>,
    min_cell: CellKey,
    max_cell: CellKey,
}

impl GridIndex {
    pub(crate) fn build(view: &CloudView<'_>, members: Vec<usize>, cell_size: f32) -> Self {
        let (min, max) = domain_bounds(view, &members);
        let longest = (max - min).max_element();
        let cell_size = cell_size.max(longest / MAX_CELLS_PER_AXIS).max(1.0e-6);
        let inv_cell = 1.0 / cell_size;

        let mut keyed: Vec<(CellKey, usize)> = members
            .into_iter()
            .map(|idx| (cell_key(view.spatial(idx), min, inv_cell), idx))
            .collect();
        keyed.sort_unstable();

        let mut cells = HashMap::new();
        let mut order = Vec::with_capacity(keyed.len());
        let mut min_cell = (i32::MAX, i32::MAX, i32::MAX);
        let mut max_cell = (i32::MIN, i32::MIN, i32::MIN);
        let mut run_start = 0usize;
        for (pos, &(key, idx)) in keyed.iter().enumerate() {
            order.push(idx);
            let last_of_run = keyed.get(pos + 1).map_or(true, |next| next.0 != key);
            if last_of_run {
                cells.insert(key, (run_start, pos + 1));
                run_start = pos + 1;
                min_cell = (min_cell.0.min(key.0), min_cell.1.min(key.1), min_cell.2.min(key.2));
                max_cell = (max_cell.0.max(key.0), max_cell.1.max(key.1), max_cell.2.max(key.2));
            }
        }

        Self {
            cell_size,
            inv_cell,
            origin: min,
            order,
            cells,
            min_cell,
            max_cell,
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    fn cell_members(&self, key: &CellKey) -> &[usize] {
        match self.cells.get(key) {
            Some(&(start, end)) => &self.order[start..end],
            None => &[],
        }
    }

    pub(crate) fn radius(
        &self,
        view: &CloudView<'_>,
        query: &[f32],
        sq_radius: f32,
        radius: f32,
        exclude: Option<usize>,
        out: &mut Vec<Candidate>,
    ) {
        let q = spatial_of(query);
        let lo = cell_key(q - Vec3::splat(radius), self.origin, self.inv_cell);
        let hi = cell_key(q + Vec3::splat(radius), self.origin, self.inv_cell);
        // One extra cell per side: `q ± r` may round past a point lying on
        // a cell boundary at exactly distance `r`.
        let lo = (
            lo.0.saturating_sub(1).max(self.min_cell.0),
            lo.1.saturating_sub(1).max(self.min_cell.1),
            lo.2.saturating_sub(1).max(self.min_cell.2),
        );
        let hi = (
            hi.0.saturating_add(1).min(self.max_cell.0),
            hi.1.saturating_add(1).min(self.max_cell.1),
            hi.2.saturating_add(1).min(self.max_cell.2),
        );
        if lo.0 > hi.0 || lo.1 > hi.1 || lo.2 > hi.2 {
            return;
        }

        let mut visit = |members: &[usize]| {
            for &idx in members {
                if Some(idx) == exclude {
                    continue;
                }
                let sq_dist = view.sq_distance_to(idx, query);
                if sq_dist <= sq_radius {
                    out.push(Candidate { sq_dist, index: idx });
                }
            }
        };

        let volume = span(lo.0, hi.0) * span(lo.1, hi.1) * span(lo.2, hi.2);
        if volume > self.cells.len() as u64 {
            for (key, &(start, end)) in &self.cells {
                if inside(*key, lo, hi) {
                    visit(&self.order[start..end]);
                }
            }
            return;
        }
        for z in lo.2..=hi.2 {
            for y in lo.1..=hi.1 {
                for x in lo.0..=hi.0 {
                    visit(self.cell_members(&(x, y, z)));
                }
            }
        }
    }

    pub(crate) fn knn(
        &self,
        view: &CloudView<'_>,
        query: &[f32],
        exclude: Option<usize>,
        heap: &mut KnnHeap,
    ) {
        let q = spatial_of(query);
        let center = cell_key(q, self.origin, self.inv_cell);
        let c = [center.0 as i64, center.1 as i64, center.2 as i64];
        let min = [self.min_cell.0 as i64, self.min_cell.1 as i64, self.min_cell.2 as i64];
        let max = [self.max_cell.0 as i64, self.max_cell.1 as i64, self.max_cell.2 as i64];
        let qa = [q.x, q.y, q.z];
        let oa = [self.origin.x, self.origin.y, self.origin.z];

        let push_members = |members: &[usize], heap: &mut KnnHeap| {
            for &idx in members {
                if Some(idx) == exclude {
                    continue;
                }
                heap.push(Candidate {
                    sq_dist: view.sq_distance_to(idx, query),
                    index: idx,
                });
            }
        };

        // Shells closer than the occupied box are empty.
        let mut shell = (0..3)
            .map(|a| (min[a] - c[a]).max(c[a] - max[a]).max(0))
            .max()
            .unwrap_or(0);

        loop {
            let lo: [i64; 3] = std::array::from_fn(|a| (c[a] - shell).max(min[a]));
            let hi: [i64; 3] = std::array::from_fn(|a| (c[a] + shell).min(max[a]));
            let volume: i64 = (0..3).map(|a| (hi[a] - lo[a] + 1).max(0)).product();

            if volume as u64 > 2 * self.cells.len() as u64 {
                for (key, &(start, end)) in &self.cells {
                    if chebyshev(*key, c) >= shell {
                        push_members(&self.order[start..end], heap);
                    }
                }
                return;
            }

            for z in lo[2]..=hi[2] {
                for y in lo[1]..=hi[1] {
                    for x in lo[0]..=hi[0] {
                        let ring = (x - c[0]).abs().max((y - c[1]).abs()).max((z - c[2]).abs());
                        if ring != shell {
                            continue;
                        }
                        push_members(self.cell_members(&(x as i32, y as i32, z as i32)), heap);
                    }
                }
            }

            // Distance from the query to the nearest face of the searched cube
            // that still has occupied cells beyond it.
            let mut bound = f32::INFINITY;
            for a in 0..3 {
                if c[a] - shell > min[a] {
                    let face = oa[a] + (c[a] - shell) as f32 * self.cell_size;
                    bound = bound.min(qa[a] - face);
                }
                if c[a] + shell < max[a] {
                    let face = oa[a] + (c[a] + shell + 1) as f32 * self.cell_size;
                    bound = bound.min(face - qa[a]);
                }
            }
            if bound.is_infinite() {
                return;
            }
            let bound = (bound - self.cell_size * 1.0e-4).max(0.0);
            if heap.is_full() && heap.worst_sq_dist() < bound * bound {
                return;
            }
            shell += 1;
        }
    }
}

pub(crate) fn cell_key(position: Vec3, min: Vec3, inv_cell: f32) -> CellKey {
    let shifted = (position - min) * inv_cell;
    (
        shifted.x.floor() as i32,
        shifted.y.floor() as i32,
        shifted.z.floor() as i32,
    )
}

fn span(lo: i32, hi: i32) -> u64 {
    (hi as i64 - lo as i64 + 1).max(0) as u64
}

fn inside(key: CellKey, lo: CellKey, hi: CellKey) -> bool {
    (lo.0..=hi.0).contains(&key.0)
        && (lo.1..=hi.1).contains(&key.1)
        && (lo.2..=hi.2).contains(&key.2)
}

fn chebyshev(key: CellKey, center: [i64; 3]) -> i64 {
    (key.0 as i64 - center[0])
        .abs()
        .max((key.1 as i64 - center[1]).abs())
        .max((key.2 as i64 - center[2]).abs())
}

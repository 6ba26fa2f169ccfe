use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Neighbors of one query point, nearest first with ties broken by index.
///
/// Indices are cloud-local. Slots added by padding sit at the end and carry an
/// infinite squared distance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborSet {
    pub indices: Vec<usize>,
    pub sq_distances: Vec<f32>,
    /// A `max_neighbors` cap dropped at least one point inside the radius.
    pub truncated: bool,
    /// Fewer candidates existed than the requested `k`.
    pub underfilled: bool,
    pub padded: usize,
}

impl NeighborSet {
    pub(crate) fn from_sorted(candidates: Vec<Candidate>) -> Self {
        let mut indices = Vec::with_capacity(candidates.len());
        let mut sq_distances = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            indices.push(candidate.index);
            sq_distances.push(candidate.sq_dist);
        }
        Self {
            indices,
            sq_distances,
            truncated: false,
            underfilled: false,
            padded: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Neighbors actually found, excluding padding.
    pub fn found(&self) -> &[usize] {
        &self.indices[..self.indices.len() - self.padded]
    }

    pub fn pad_to(&mut self, target: usize, sentinel: usize) {
        while self.indices.len() < target {
            self.indices.push(sentinel);
            self.sq_distances.push(f32::INFINITY);
            self.padded += 1;
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub sq_dist: f32,
    pub index: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sq_dist
            .total_cmp(&other.sq_dist)
            .then(self.index.cmp(&other.index))
    }
}

/// Bounded max-heap keeping the `k` best candidates seen so far.
pub(crate) struct KnnHeap {
    k: usize,
    heap: BinaryHeap<Candidate>,
}

impl KnnHeap {
    pub(crate) fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.saturating_add(1).min(4096)),
        }
    }

    pub(crate) fn push(&mut self, candidate: Candidate) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(worst) = self.heap.peek() {
            if candidate < *worst {
                self.heap.pop();
                self.heap.push(candidate);
            }
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    /// Squared distance a new candidate must not exceed to be accepted.
    pub(crate) fn worst_sq_dist(&self) -> f32 {
        if self.is_full() {
            self.heap.peek().map(|c| c.sq_dist).unwrap_or(f32::INFINITY)
        } else {
            f32::INFINITY
        }
    }

    pub(crate) fn into_sorted(self) -> Vec<Candidate> {
        self.heap.into_sorted_vec()
    }
}

pub(crate) fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_unstable();
}

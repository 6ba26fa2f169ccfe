use crate::cloud::CloudView;

use super::neighbors::{Candidate, KnnHeap};

const NO_CHILD: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct KdNode {
    start: u32,
    end: u32,
    axis: u32,
    split: f32,
    left: u32,
    right: u32,
}

impl KdNode {
    fn is_leaf(&self) -> bool {
        self.left == NO_CHILD
    }
}

/// Median-split k-d tree over all coordinate axes, stored as a flat node
/// array plus a permutation of the indexed domain.
#[derive(Debug, Clone)]
pub struct KdTree {
    order: Vec<usize>,
    nodes: Vec<KdNode>,
}

impl KdTree {
    pub(crate) fn build(view: &CloudView<'_>, mut members: Vec<usize>, leaf_size: usize) -> Self {
        let mut nodes = Vec::with_capacity(2 * members.len() / leaf_size.max(1) + 1);
        let len = members.len();
        build_node(view, &mut members, 0, len, leaf_size.max(1), &mut nodes);
        Self {
            order: members,
            nodes,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[KdNode], node: u32) -> usize {
            let n = nodes[node as usize];
            if n.is_leaf() {
                1
            } else {
                1 + walk(nodes, n.left).max(walk(nodes, n.right))
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    pub(crate) fn radius(
        &self,
        view: &CloudView<'_>,
        query: &[f32],
        sq_radius: f32,
        exclude: Option<usize>,
        out: &mut Vec<Candidate>,
    ) {
        if self.nodes.is_empty() {
            return;
        }
        let mut stack = vec![0u32];
        while let Some(node) = stack.pop() {
            let node = self.nodes[node as usize];
            if node.is_leaf() {
                for &idx in &self.order[node.start as usize..node.end as usize] {
                    if Some(idx) == exclude {
                        continue;
                    }
                    let sq_dist = view.sq_distance_to(idx, query);
                    if sq_dist <= sq_radius {
                        out.push(Candidate { sq_dist, index: idx });
                    }
                }
                continue;
            }
            let diff = query[node.axis as usize] - node.split;
            // Left holds coordinates <= split, right holds coordinates >= split.
            if diff <= 0.0 || diff * diff <= sq_radius {
                stack.push(node.left);
            }
            if diff >= 0.0 || diff * diff <= sq_radius {
                stack.push(node.right);
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
        if !self.nodes.is_empty() {
            self.knn_node(view, 0, query, exclude, heap);
        }
    }

    fn knn_node(
        &self,
        view: &CloudView<'_>,
        node: u32,
        query: &[f32],
        exclude: Option<usize>,
        heap: &mut KnnHeap,
    ) {
        let node = self.nodes[node as usize];
        if node.is_leaf() {
            for &idx in &self.order[node.start as usize..node.end as usize] {
                if Some(idx) == exclude {
                    continue;
                }
                heap.push(Candidate {
                    sq_dist: view.sq_distance_to(idx, query),
                    index: idx,
                });
            }
            return;
        }
        let diff = query[node.axis as usize] - node.split;
        let (near, far) = if diff <= 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };
        self.knn_node(view, near, query, exclude, heap);
        // Equal distances still descend so index tie-breaks stay exact.
        if diff * diff <= heap.worst_sq_dist() {
            self.knn_node(view, far, query, exclude, heap);
        }
    }
}

fn build_node(
    view: &CloudView<'_>,
    order: &mut [usize],
    start: usize,
    end: usize,
    leaf_size: usize,
    nodes: &mut Vec<KdNode>,
) -> u32 {
    let node_id = nodes.len() as u32;
    nodes.push(KdNode {
        start: start as u32,
        end: end as u32,
        axis: 0,
        split: 0.0,
        left: NO_CHILD,
        right: NO_CHILD,
    });
    if end - start <= leaf_size {
        return node_id;
    }

    let slice = &mut order[start..end];
    let (axis, spread) = widest_axis(view, slice);
    if spread <= 0.0 {
        return node_id;
    }

    let mid = slice.len() / 2;
    slice.select_nth_unstable_by(mid, |&a, &b| {
        view.point(a)[axis]
            .total_cmp(&view.point(b)[axis])
            .then(a.cmp(&b))
    });
    let split = view.point(slice[mid])[axis];

    let left = build_node(view, order, start, start + mid, leaf_size, nodes);
    let right = build_node(view, order, start + mid, end, leaf_size, nodes);
    let node = &mut nodes[node_id as usize];
    node.axis = axis as u32;
    node.split = split;
    node.left = left;
    node.right = right;
    node_id
}

fn widest_axis(view: &CloudView<'_>, members: &[usize]) -> (usize, f32) {
    let dim = view.dim();
    let mut lo = vec![f32::INFINITY; dim];
    let mut hi = vec![f32::NEG_INFINITY; dim];
    for &idx in members {
        for (axis, &value) in view.point(idx).iter().enumerate() {
            lo[axis] = lo[axis].min(value);
            hi[axis] = hi[axis].max(value);
        }
    }
    (0..dim)
        .map(|axis| (axis, hi[axis] - lo[axis]))
        .fold((0, f32::NEG_INFINITY), |best, cand| {
            if cand.1 > best.1 {
                cand
            } else {
                best
            }
        })
}

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

/// Below this many elements a sweep runs on the calling thread.
pub(crate) const PARALLEL_THRESHOLD: usize = 1024;

/// Query points per cloud before per-query fan-out pays off.
pub(crate) const QUERY_THRESHOLD: usize = 256;

/// Clouds are coarse units; fan out as soon as there are two.
pub(crate) const CLOUD_THRESHOLD: usize = 2;

pub(crate) fn for_each_indexed_mut<T, F>(slice: &mut [T], f: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Sync + Send,
{
    #[cfg(not(target_arch = "wasm32"))]
    {
        if slice.len() >= PARALLEL_THRESHOLD {
            slice
                .par_iter_mut()
                .enumerate()
                .for_each(|(idx, value)| f(idx, value));
            return;
        }
    }

    for (idx, value) in slice.iter_mut().enumerate() {
        f(idx, value);
    }
}

/// Ordered map over `0..len`; output slot `i` always holds `f(i)`.
pub(crate) fn map_indexed<T, F>(len: usize, threshold: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    #[cfg(not(target_arch = "wasm32"))]
    {
        if len >= threshold.max(1) {
            return (0..len).into_par_iter().map(&f).collect();
        }
    }
    #[cfg(target_arch = "wasm32")]
    let _ = threshold;

    (0..len).map(f).collect()
}

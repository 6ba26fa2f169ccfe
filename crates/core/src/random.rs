/// Small deterministic xorshift generator; sampling results must reproduce
/// exactly for a given seed on every platform.
#[derive(Debug, Clone)]
pub(crate) struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    pub(crate) fn new(seed: u64) -> Self {
        let seed = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        let mut rng = Self { state: seed };
        // Warm up so nearby seeds diverge quickly.
        for _ in 0..4 {
            rng.next_u64();
        }
        rng
    }

    /// Stream for one cloud of a batch, independent of how clouds are scheduled.
    pub(crate) fn for_cloud(seed: u64, cloud: usize) -> Self {
        Self::new(seed ^ (cloud as u64 + 1).wrapping_mul(0xA24B_AED4_963E_E407))
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform value in `0..bound`; `bound` must be non-zero.
    pub(crate) fn next_below(&mut self, bound: usize) -> usize {
        ((self.next_u64() as u128 * bound as u128) >> 64) as usize
    }

    #[cfg(test)]
    pub(crate) fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }
}

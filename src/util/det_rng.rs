//! Seeded xorshift64 generator for steal-victim selection.
//!
//! Not cryptographically secure. Each fork/join worker owns one, derived from
//! the pool's `steal_seed` and the worker index, so a given configuration
//! visits victims in a reproducible order.

/// A deterministic pseudo-random number generator using xorshift64.
#[derive(Debug, Clone)]
pub struct DetRng {
    state: u64,
}

impl DetRng {
    /// Creates a generator from `seed`. A zero seed is replaced with 1.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Derives the generator for worker `index` of a pool seeded with `seed`.
    #[must_use]
    pub const fn for_worker(seed: u64, index: usize) -> Self {
        // Spread consecutive indices across the state space.
        let mix = (index as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        Self::new(seed ^ mix)
    }

    /// Returns the next value.
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Returns a value in `[0, bound)`.
    ///
    /// # Panics
    ///
    /// Panics if `bound` is zero.
    #[allow(clippy::cast_possible_truncation)]
    pub fn next_usize(&mut self, bound: usize) -> usize {
        assert!(bound > 0, "bound must be non-zero");
        (self.next_u64() as usize) % bound
    }
}

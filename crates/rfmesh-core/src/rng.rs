//! Deterministic, forkable random stream.
//!
//! Every source of randomness in the simulation flows from one master
//! [`SimRng`] owned by the engine. Subsystems that need their own stream
//! (the radio medium's fading draws, each node's packet-id generation) get a
//! [`SimRng::fork`], so adding a new randomness consumer never perturbs the
//! sequences observed by existing ones.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Seeded PRNG with an explicit owner. Never constructed from OS entropy.
#[derive(Debug, Clone)]
pub struct SimRng {
    seed: u64,
    inner: SmallRng,
}

impl SimRng {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            inner: SmallRng::seed_from_u64(seed),
        }
    }

    /// The seed this stream was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Restore the stream to its initial sequence.
    pub fn reset(&mut self) {
        self.inner = SmallRng::seed_from_u64(self.seed);
    }

    /// Derive an independent child stream.
    ///
    /// The child's seed is drawn from this stream, so identically seeded
    /// parents produce identical forks, and sibling forks are independent.
    pub fn fork(&mut self) -> SimRng {
        SimRng::new(self.inner.next_u64())
    }

    /// Uniform value in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }

    /// Uniform value in [min, max). Panics if `min >= max`.
    pub fn next_range(&mut self, min: f64, max: f64) -> f64 {
        assert!(min < max, "empty range {min}..{max}");
        min + (max - min) * self.next_f64()
    }

    /// Uniform integer in [min, max] inclusive. Panics if `min > max`.
    pub fn next_int(&mut self, min: i64, max: i64) -> i64 {
        assert!(min <= max, "empty range {min}..={max}");
        self.inner.gen_range(min..=max)
    }

    /// Raw 32 bits, used for compact id suffixes.
    pub fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    /// Normal-distributed sample. A non-positive `std_dev` yields `mean`.
    pub fn next_gaussian(&mut self, mean: f64, std_dev: f64) -> f64 {
        if std_dev <= 0.0 {
            return mean;
        }
        let normal = Normal::new(mean, std_dev).expect("finite mean and positive sigma");
        normal.sample(&mut self.inner)
    }

    /// Fisher-Yates shuffle in place.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        slice.shuffle(&mut self.inner);
    }
}

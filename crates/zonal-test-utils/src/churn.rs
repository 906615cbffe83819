//! Seeded allocate/free/grow sequences.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::shadow::ShadowZone;

/// One step of a churn sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZoneOp {
    Allocate { size: usize },
    /// Free the nth live allocation, modulo the live count.
    Free { nth: usize },
    Grow { extra: usize },
}

/// Counts from a churn run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChurnSummary {
    pub allocations: usize,
    pub failed_allocations: usize,
    pub frees: usize,
    pub grows: usize,
}

/// Deterministic generator of [`ZoneOp`]s.
///
/// The same seed always yields the same sequence, so a failing soak run
/// can be replayed exactly.
pub struct Churn {
    rng: ChaCha8Rng,
    max_size: usize,
    free_ratio: f64,
    grow_ratio: f64,
}

impl Churn {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            max_size: 256,
            free_ratio: 0.45,
            grow_ratio: 0.0,
        }
    }

    /// Largest allocation request, in bytes.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    /// Probability that a step frees when something is live.
    pub fn with_free_ratio(mut self, ratio: f64) -> Self {
        self.free_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Probability that a step grows the zone.
    pub fn with_grow_ratio(mut self, ratio: f64) -> Self {
        self.grow_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn next_op(&mut self, live: usize) -> ZoneOp {
        if self.grow_ratio > 0.0 && self.rng.random_bool(self.grow_ratio) {
            return ZoneOp::Grow {
                extra: self.rng.random_range(1..=self.max_size * 4),
            };
        }
        if live > 0 && self.rng.random_bool(self.free_ratio) {
            return ZoneOp::Free {
                nth: self.rng.random_range(0..live),
            };
        }
        ZoneOp::Allocate {
            size: self.rng.random_range(0..=self.max_size),
        }
    }

    /// Apply `steps` ops to `shadow`, verifying after each one.
    ///
    /// Panics with the step number and op on the first verification
    /// failure.
    pub fn run(&mut self, shadow: &mut ShadowZone, steps: usize) -> ChurnSummary {
        let mut summary = ChurnSummary::default();
        for step in 0..steps {
            let op = self.next_op(shadow.live_count());
            apply(shadow, op, &mut summary);
            if let Err(e) = shadow.verify() {
                panic!("step {step} ({op:?}): {e}");
            }
        }
        summary
    }
}

/// Apply one op to `shadow`, updating the counts.
pub fn apply(shadow: &mut ShadowZone, op: ZoneOp, summary: &mut ChurnSummary) {
    match op {
        ZoneOp::Allocate { size } => match shadow.allocate(size) {
            Some(_) => summary.allocations += 1,
            None => summary.failed_allocations += 1,
        },
        ZoneOp::Free { nth } => {
            if shadow.free_nth(nth).is_some() {
                summary.frees += 1;
            }
        }
        ZoneOp::Grow { extra } => {
            let target = shadow.zone().capacity() + extra;
            shadow.grow(target);
            summary.grows += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = Churn::new(7);
        let mut b = Churn::new(7);
        for live in 0..64 {
            assert_eq!(a.next_op(live), b.next_op(live));
        }
    }

    #[test]
    fn nothing_live_never_frees() {
        let mut churn = Churn::new(1).with_free_ratio(1.0);
        for _ in 0..32 {
            assert!(matches!(churn.next_op(0), ZoneOp::Allocate { .. }));
        }
    }

    #[test]
    fn short_run_verifies() {
        let mut shadow = ShadowZone::create(4096);
        let summary = Churn::new(42).run(&mut shadow, 200);
        assert!(summary.allocations > 0);
        assert!(summary.frees > 0);
    }
}

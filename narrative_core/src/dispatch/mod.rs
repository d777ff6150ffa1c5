//! Turn dispatch - picking which character acts next.
//!
//! Selection is randomized. The random source is injected so callers can run with a
//! seeded generator, and every decision is made fresh from the roster and the recent
//! timeline; nothing is remembered between turns.

mod scoring;

pub use scoring::*;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Weighted random choice among `candidates`.
///
/// Returns `None` when the lists are empty or of different lengths. When the total weight
/// is not positive every candidate is equally likely. Otherwise a value is drawn from
/// `[0, total)` and weights are subtracted in order until the remainder reaches zero; the
/// last candidate absorbs any floating point shortfall.
pub fn choose_next<'a, T, R>(candidates: &'a [T], weights: &[f64], rng: &mut R) -> Option<&'a T>
where
    R: Rng + ?Sized,
{
    if candidates.is_empty() || candidates.len() != weights.len() {
        return None;
    }

    let total: f64 = weights.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return candidates.get(rng.gen_range(0..candidates.len()));
    }

    let mut remainder = rng.gen_range(0.0..total);
    for (candidate, weight) in candidates.iter().zip(weights) {
        remainder -= weight;
        if remainder <= 0.0 {
            return Some(candidate);
        }
    }

    candidates.last()
}

/// Owns the random source used for turn dispatch.
#[derive(Debug, Clone)]
pub struct TurnDispatcher<R = StdRng> {
    rng: R,
}

impl TurnDispatcher<StdRng> {
    /// Dispatcher seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    /// Dispatcher with a reproducible sequence of choices.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> TurnDispatcher<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Weighted choice; see [`choose_next`].
    pub fn choose_next<'a, T>(&mut self, candidates: &'a [T], weights: &[f64]) -> Option<&'a T> {
        choose_next(candidates, weights, &mut self.rng)
    }

    /// Pick a uniformly random element.
    pub fn choose_uniform<'a, T>(&mut self, candidates: &'a [T]) -> Option<&'a T> {
        if candidates.is_empty() {
            None
        } else {
            candidates.get(self.rng.gen_range(0..candidates.len()))
        }
    }
}

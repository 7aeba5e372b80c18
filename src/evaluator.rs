//! Miss computation and single-task simulation.

use rand::Rng;
use tracing::debug;

use crate::distribution::{generate_base, transform, DistributionVector};
use crate::error::{Result, SimError};
use crate::sampler::{sample_requests, sample_without_replacement};
use crate::sweep::{BaseSource, SimulationTask};

/// Requested items that are not cached, sorted and deduplicated.
pub fn misses(requested: &[usize], cached: &[usize]) -> Vec<usize> {
    let mut missed: Vec<usize> = requested
        .iter()
        .copied()
        .filter(|item| !cached.contains(item))
        .collect();
    missed.sort_unstable();
    missed.dedup();
    missed
}

/// Outcome of one simulated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserOutcome {
    pub cached: Vec<usize>,
    pub requested: Vec<usize>,
    pub missed: Vec<usize>,
    /// The cache draw found fewer eligible items than the cache size.
    pub truncated: bool,
}

/// Draw one user's cache and requests and compute their misses.
///
/// `cache_dist` is the derived caching distribution, `request_dist` the base
/// popularity distribution.
pub fn simulate_user<R: Rng + ?Sized>(
    request_dist: &[f64],
    cache_dist: &[f64],
    cache_size: usize,
    num_requests: usize,
    rng: &mut R,
    strict: bool,
) -> Result<UserOutcome> {
    if request_dist.len() != cache_dist.len() {
        return Err(SimError::LengthMismatch {
            left: request_dist.len(),
            right: cache_dist.len(),
        });
    }
    let cached = sample_without_replacement(cache_dist, cache_size, rng, strict)?;
    let truncated = cached.len() < cache_size;
    if truncated {
        debug!(
            cache_size,
            drawn = cached.len(),
            "Cache draw truncated to eligible items"
        );
    }
    let requested = sample_requests(request_dist, num_requests, rng, strict)?;
    let missed = misses(&requested, &cached);
    Ok(UserOutcome {
        cached,
        requested,
        missed,
        truncated,
    })
}

/// Per-user miss counts for one task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationResult {
    pub misses_per_user: Vec<usize>,
    /// How many users had their cache draw truncated.
    pub truncated_cache_draws: usize,
}

impl SimulationResult {
    pub fn total(&self) -> usize {
        self.misses_per_user.iter().sum()
    }

    /// Mean misses per user; 0 when there are no users.
    pub fn mean_per_user(&self) -> f64 {
        if self.misses_per_user.is_empty() {
            0.0
        } else {
            self.total() as f64 / self.misses_per_user.len() as f64
        }
    }
}

/// Build both distributions for `task` and simulate every user.
pub fn setup_and_simulate<R: Rng + ?Sized>(
    task: &SimulationTask,
    rng: &mut R,
) -> Result<SimulationResult> {
    let generated;
    let base: &DistributionVector = match &task.base {
        BaseSource::Provided(base) => base.as_ref(),
        BaseSource::Generate => {
            generated = generate_base(task.num_items, task.zipf_exponent, &task.eval, rng)?;
            &generated
        }
    };
    let cache_dist = transform(base, &task.formula, &task.formula_parameters(), &task.eval)?;

    let mut result = SimulationResult::default();
    for _ in 0..task.num_users {
        let outcome = simulate_user(
            base,
            &cache_dist,
            task.cache_size,
            task.num_requests,
            rng,
            task.eval.strict,
        )?;
        result.truncated_cache_draws += usize::from(outcome.truncated);
        result.misses_per_user.push(outcome.missed.len());
    }
    Ok(result)
}

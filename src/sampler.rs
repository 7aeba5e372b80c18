//! Weighted sampling of item indices without replacement.
//!
//! Uses exponential keys (Efraimidis–Spirakis): each eligible index gets the key
//! `ln(u) / w` for a uniform `u`, and the `count` largest keys win. The order of
//! the returned indices is the draw order.

use rand::Rng;

use crate::distribution::is_eligible;
use crate::error::{Result, SimError};

/// Tolerance on the total mass accepted in strict mode.
pub const STRICT_MASS_TOLERANCE: f64 = 1e-8;

fn validate_strict(dist: &[f64]) -> Result<()> {
    if let Some((index, p)) = dist
        .iter()
        .enumerate()
        .find(|(_, p)| !p.is_finite() || **p < 0.0)
    {
        return Err(SimError::Domain(format!(
            "entry {} at index {} is not a finite non-negative probability",
            p, index
        )));
    }
    let total: f64 = dist.iter().sum();
    if (total - 1.0).abs() > STRICT_MASS_TOLERANCE {
        return Err(SimError::Domain(format!(
            "probabilities sum to {}, expected 1",
            total
        )));
    }
    Ok(())
}

/// Draw up to `count` distinct indices weighted by `dist`.
///
/// When fewer than `count` entries are eligible, exactly the eligible ones are
/// drawn; this is not an error. Non-finite and non-positive entries are never
/// drawn. With `strict`, malformed entries or a total mass that is not 1 are a
/// [`SimError::Domain`] error.
pub fn sample_without_replacement<R: Rng + ?Sized>(
    dist: &[f64],
    count: usize,
    rng: &mut R,
    strict: bool,
) -> Result<Vec<usize>> {
    if strict {
        validate_strict(dist)?;
    }

    let mut keyed: Vec<(f64, usize)> = dist
        .iter()
        .enumerate()
        .filter(|(_, p)| is_eligible(**p))
        .map(|(index, p)| {
            let u: f64 = rng.random();
            (u.ln() / p, index)
        })
        .collect();

    let take = count.min(keyed.len());
    keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
    Ok(keyed.into_iter().take(take).map(|(_, index)| index).collect())
}

/// Draw exactly `count` distinct indices weighted by `dist`.
///
/// Unlike [`sample_without_replacement`] there is no fallback: too few eligible
/// entries is a [`SimError::DegenerateDistribution`].
pub fn sample_requests<R: Rng + ?Sized>(
    dist: &[f64],
    count: usize,
    rng: &mut R,
    strict: bool,
) -> Result<Vec<usize>> {
    let available = dist.iter().filter(|p| is_eligible(**p)).count();
    if available < count {
        return Err(SimError::DegenerateDistribution {
            requested: count,
            available,
        });
    }
    sample_without_replacement(dist, count, rng, strict)
}

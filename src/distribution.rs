//! Base popularity distributions and formula-derived caching distributions.
//!
//! The base distribution is always sorted non-increasing and normalized. A
//! derived distribution keeps the item order of its base and is normalized
//! only in non-strict mode.

use std::ops::Deref;

use rand::Rng;
use rand_distr::{Distribution, Zipf};
use serde::{Deserialize, Serialize};

use crate::error::{NumericFault, Result, SimError};
use crate::formula::{CompiledFormula, FormulaInputs, Parameters, Symbol};

/// How the base popularity weights are produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZipfMode {
    /// Closed form `(1/m)^skew` over the 0-based rank.
    #[default]
    Analytic,
    /// `length` draws from a Zipf distribution used as weights.
    Sampled,
}

/// Evaluation settings threaded into every distribution and sampling call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Fail on non-finite values instead of clamping or zeroing them.
    pub strict: bool,
    /// Base distribution generator.
    pub zipf_mode: ZipfMode,
}

/// A fixed-length probability vector over item ranks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DistributionVector(Vec<f64>);

impl DistributionVector {
    /// Wrap raw values without normalizing them.
    pub fn from_values(values: Vec<f64>) -> Self {
        Self(values)
    }

    /// Equal mass on every item.
    pub fn uniform(length: usize) -> Self {
        Self(vec![1.0 / length as f64; length])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }

    /// Sum of all entries.
    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Number of finite, strictly positive entries.
    pub fn eligible(&self) -> usize {
        self.0.iter().filter(|p| is_eligible(**p)).count()
    }

    /// Running sum of the entries.
    pub fn cumulative(&self) -> Vec<f64> {
        self.0
            .iter()
            .scan(0.0, |acc, p| {
                *acc += p;
                Some(*acc)
            })
            .collect()
    }

    fn normalized(mut self) -> Self {
        let total = self.total();
        self.0.iter_mut().for_each(|p| *p /= total);
        self
    }

    fn sorted_descending(mut self) -> Self {
        self.0.sort_by(|a, b| b.total_cmp(a));
        self
    }
}

impl Deref for DistributionVector {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.0
    }
}

impl From<Vec<f64>> for DistributionVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

pub(crate) fn is_eligible(p: f64) -> bool {
    p.is_finite() && p > 0.0
}

fn rank_index(length: usize) -> Vec<f64> {
    (0..length).map(|m| m as f64).collect()
}

fn check_finite(values: &[f64]) -> std::result::Result<(), NumericFault> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(NumericFault::NonFinite {
            index,
            value: values[index],
        }),
        None => Ok(()),
    }
}

/// Generate the base popularity distribution.
///
/// In [`ZipfMode::Analytic`] the weight of rank `m` is `(1/m)^skew`; the
/// singular weight at `m = 0` is clamped to 1 (or -1), unless `eval.strict` is
/// set, in which case it is a [`NumericFault::NonFinite`]. In
/// [`ZipfMode::Sampled`] the weights are draws from `rng`.
///
/// The result is normalized to sum 1 and sorted descending.
pub fn generate_base<R: Rng + ?Sized>(
    length: usize,
    skew: f64,
    eval: &EvaluationConfig,
    rng: &mut R,
) -> Result<DistributionVector> {
    let weights = match eval.zipf_mode {
        ZipfMode::Analytic => analytic_weights(length, skew, eval.strict)?,
        ZipfMode::Sampled => sampled_weights(length, skew, rng)?,
    };
    let base = DistributionVector(weights).normalized();
    if eval.strict {
        check_finite(&base)?;
    }
    Ok(base.sorted_descending())
}

fn analytic_weights(length: usize, skew: f64, strict: bool) -> Result<Vec<f64>> {
    let mut weights: Vec<f64> = (0..length)
        .map(|m| (1.0 / m as f64).powf(skew))
        .collect();
    if strict {
        check_finite(&weights)?;
    } else {
        for w in weights.iter_mut() {
            if *w == f64::INFINITY {
                *w = 1.0;
            } else if *w == f64::NEG_INFINITY {
                *w = -1.0;
            }
        }
    }
    Ok(weights)
}

fn sampled_weights<R: Rng + ?Sized>(length: usize, skew: f64, rng: &mut R) -> Result<Vec<f64>> {
    let zipf = Zipf::new(length as f64, skew).map_err(|e| NumericFault::InvalidSkew {
        skew,
        reason: e.to_string(),
    })?;
    Ok((0..length).map(|_| zipf.sample(rng)).collect())
}

/// Derive a caching distribution by evaluating `formula` over `base`.
///
/// The formula sees the rank index, the running sum of `base` and `base`
/// itself. Non-strict results are renormalized to sum 1, and a non-positive
/// or non-finite total yields all zeros, so renormalizing never flips signs. Strict results are returned
/// unnormalized after checking every value is finite and the total is
/// non-zero.
pub fn transform(
    base: &DistributionVector,
    formula: &CompiledFormula,
    params: &Parameters,
    eval: &EvaluationConfig,
) -> Result<DistributionVector> {
    let rank = rank_index(base.len());
    let cumulative = base.cumulative();
    let values = formula.evaluate(
        FormulaInputs {
            rank: &rank,
            cumulative: &cumulative,
            raw: base,
        },
        params,
    )?;
    let derived = DistributionVector(values);
    let total = derived.total();

    if eval.strict {
        check_finite(&derived)?;
        if total == 0.0 {
            return Err(NumericFault::ZeroMass.into());
        }
        return Ok(derived);
    }

    if total <= 0.0 || !total.is_finite() {
        return Ok(DistributionVector(vec![0.0; derived.len()]));
    }
    Ok(derived.normalized())
}

/// Evaluate `formula` pointwise over the rank index alone.
///
/// The formula may only reference `m` and named parameters. In non-strict
/// mode a point whose evaluation faults becomes `NaN`. The curve is neither
/// normalized nor sorted.
pub fn generate_custom(
    length: usize,
    formula: &CompiledFormula,
    params: &Parameters,
    eval: &EvaluationConfig,
) -> Result<DistributionVector> {
    for (symbol, name) in [(Symbol::Raw, "r"), (Symbol::Cumulative, "v")] {
        if formula.references(&symbol) {
            return Err(SimError::MissingParameter(name.to_string()));
        }
    }
    let slots = formula.resolve(params)?;

    let mut curve = Vec::with_capacity(length);
    for m in 0..length {
        let point = [m as f64];
        let value = formula
            .evaluate_resolved(
                FormulaInputs {
                    rank: &point,
                    cumulative: &[0.0],
                    raw: &[0.0],
                },
                &slots,
            )
            .map(|v| v[0]);
        match value {
            Ok(v) if eval.strict && !v.is_finite() => {
                return Err(NumericFault::NonFinite { index: m, value: v }.into());
            }
            Ok(v) => curve.push(v),
            Err(SimError::Numeric(_)) if !eval.strict => curve.push(f64::NAN),
            Err(e) => return Err(e),
        }
    }
    Ok(DistributionVector(curve))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::compile_raw;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(7)
    }

    fn alpha(value: f64) -> Parameters {
        Parameters::from([("alpha".to_string(), value)])
    }

    #[test]
    fn test_base_is_normalized_and_sorted() {
        let base = generate_base(50, 1.2, &EvaluationConfig::default(), &mut rng()).unwrap();
        assert_eq!(base.len(), 50);
        assert!((base.total() - 1.0).abs() < 1e-9);
        assert!(base.windows(2).all(|w| w[0] >= w[1]));
        assert!(base.iter().all(|p| *p >= 0.0));
    }

    #[test]
    fn test_base_clamps_rank_zero() {
        // weights 1, 1, 1/2 before normalization
        let base = generate_base(3, 1.0, &EvaluationConfig::default(), &mut rng()).unwrap();
        assert!((base[0] - 0.4).abs() < 1e-12);
        assert!((base[1] - 0.4).abs() < 1e-12);
        assert!((base[2] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_base_strict_rejects_singularity() {
        let eval = EvaluationConfig {
            strict: true,
            ..Default::default()
        };
        let err = generate_base(3, 1.0, &eval, &mut rng()).unwrap_err();
        assert!(matches!(
            err,
            SimError::Numeric(NumericFault::NonFinite { index: 0, .. })
        ));
    }

    #[test]
    fn test_base_sampled() {
        let eval = EvaluationConfig {
            zipf_mode: ZipfMode::Sampled,
            ..Default::default()
        };
        let base = generate_base(100, 1.1, &eval, &mut rng()).unwrap();
        assert!((base.total() - 1.0).abs() < 1e-9);
        assert!(base.windows(2).all(|w| w[0] >= w[1]));

        let err = generate_base(100, -1.0, &eval, &mut rng()).unwrap_err();
        assert!(matches!(
            err,
            SimError::Numeric(NumericFault::InvalidSkew { .. })
        ));
    }

    #[test]
    fn test_popularity_formula_keeps_uniform() {
        let formula = compile_raw(r"{p_r(m)^{1\over\alpha}}").unwrap();
        let base = DistributionVector::uniform(5);
        let derived =
            transform(&base, &formula, &alpha(1.0), &EvaluationConfig::default()).unwrap();
        assert!(derived.iter().all(|p| (p - 0.2).abs() < 1e-12));
    }

    #[test]
    fn test_canonical_formula_over_uniform_base() {
        // each item divided by its running sum: 1/(m+1), then renormalized
        let formula = compile_raw(
            r"{p_r(m)^{1\over\alpha}}\over{\sum_{n=1}^{m}{p_r(n)^{1\over\alpha}}}}",
        )
        .unwrap();
        let base = DistributionVector::uniform(5);
        let derived =
            transform(&base, &formula, &alpha(1.0), &EvaluationConfig::default()).unwrap();
        let harmonic: f64 = (1..=5).map(|k| 1.0 / k as f64).sum();
        for (m, p) in derived.iter().enumerate() {
            let expected = 1.0 / (m as f64 + 1.0) / harmonic;
            assert!((p - expected).abs() < 1e-12, "m={m}: {p} != {expected}");
        }
        assert!((derived.total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_transform_is_unsorted() {
        let formula = compile_raw("m").unwrap();
        let base = DistributionVector::uniform(4);
        let derived =
            transform(&base, &formula, &Parameters::new(), &EvaluationConfig::default())
                .unwrap();
        assert!(derived.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(derived[0], 0.0);
    }

    #[test]
    fn test_transform_zero_total_maps_to_zeros() {
        let formula = compile_raw("0r").unwrap();
        let base = DistributionVector::uniform(4);
        let derived =
            transform(&base, &formula, &Parameters::new(), &EvaluationConfig::default())
                .unwrap();
        assert_eq!(derived.as_slice(), &[0.0; 4]);
        assert_eq!(derived.eligible(), 0);
    }

    #[test]
    fn test_transform_negative_total_maps_to_zeros() {
        let formula = compile_raw("-r").unwrap();
        let base = DistributionVector::uniform(4);
        let derived =
            transform(&base, &formula, &Parameters::new(), &EvaluationConfig::default())
                .unwrap();
        assert_eq!(derived.as_slice(), &[0.0; 4]);
        assert_eq!(derived.eligible(), 0);

        // mixed signs with a positive total keep their sign
        let formula = compile_raw("3-2m").unwrap();
        let base = DistributionVector::uniform(3);
        let derived =
            transform(&base, &formula, &Parameters::new(), &EvaluationConfig::default())
                .unwrap();
        assert_eq!(derived[0], 1.0);
        assert!(derived[2] < 0.0);
        assert_eq!(derived.eligible(), 2);
    }

    #[test]
    fn test_transform_non_finite_total_maps_to_zeros() {
        let formula = compile_raw("1/m").unwrap();
        let base = DistributionVector::uniform(3);
        let derived =
            transform(&base, &formula, &Parameters::new(), &EvaluationConfig::default())
                .unwrap();
        assert_eq!(derived.as_slice(), &[0.0; 3]);
    }

    #[test]
    fn test_transform_strict() {
        let strict = EvaluationConfig {
            strict: true,
            ..Default::default()
        };
        let base = DistributionVector::uniform(3);

        let err = transform(&base, &compile_raw("1/m").unwrap(), &Parameters::new(), &strict)
            .unwrap_err();
        assert!(matches!(
            err,
            SimError::Numeric(NumericFault::NonFinite { index: 0, .. })
        ));

        let err = transform(&base, &compile_raw("0r").unwrap(), &Parameters::new(), &strict)
            .unwrap_err();
        assert!(matches!(err, SimError::Numeric(NumericFault::ZeroMass)));

        let derived =
            transform(&base, &compile_raw("2r").unwrap(), &Parameters::new(), &strict).unwrap();
        assert!((derived.total() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_transform_division_by_zero_propagates() {
        let formula = compile_raw(r"{p_r(m)^{1\over\alpha}}").unwrap();
        let base = DistributionVector::uniform(3);
        let err = transform(&base, &formula, &alpha(0.0), &EvaluationConfig::default())
            .unwrap_err();
        assert!(err.is_numeric());
    }

    #[test]
    fn test_custom_curve() {
        let formula = compile_raw("2m+k").unwrap();
        let params = Parameters::from([("k".to_string(), 1.0)]);
        let curve =
            generate_custom(4, &formula, &params, &EvaluationConfig::default()).unwrap();
        assert_eq!(curve.as_slice(), &[1.0, 3.0, 5.0, 7.0]);
    }

    #[test]
    fn test_custom_curve_faults() {
        let formula = compile_raw("m/k").unwrap();
        let params = Parameters::from([("k".to_string(), 0.0)]);
        let curve =
            generate_custom(2, &formula, &params, &EvaluationConfig::default()).unwrap();
        assert!(curve.iter().all(|v| v.is_nan()));

        let strict = EvaluationConfig {
            strict: true,
            ..Default::default()
        };
        assert!(generate_custom(2, &formula, &params, &strict)
            .unwrap_err()
            .is_numeric());
    }

    #[test]
    fn test_custom_curve_rejects_popularity_symbols() {
        let formula = compile_raw("m*r").unwrap();
        let err = generate_custom(3, &formula, &Parameters::new(), &EvaluationConfig::default())
            .unwrap_err();
        assert!(matches!(err, SimError::MissingParameter(name) if name == "r"));
    }
}

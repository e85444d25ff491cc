//! Refutation tests for estimated effects.
//!
//! A refuter perturbs the estimation setup and checks whether the
//! estimate behaves as causal theory predicts:
//!
//! - **Random common cause**: adding an independent random covariate
//!   to the adjustment set should leave the estimate nearly unchanged.
//! - **Placebo treatment**: permuting the treatment column should push
//!   the estimate to zero.
//!
//! All randomness is driven by the caller's seed through
//! `StdRng::seed_from_u64`; identical seed and inputs reproduce
//! identical results.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use ck_core::{Error, Result, Table};

use crate::estimate::{estimate, CausalEstimate, EstimationMethod};

/// Default tolerance for both verdicts (10%).
pub const DEFAULT_TOLERANCE: f64 = 0.10;

/// Treated as "the original estimate is zero" when judging relative
/// deviation for the random-common-cause verdict.
const ZERO_ESTIMATE_EPS: f64 = 1e-12;

/// Refutation method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RefutationMethod {
    /// Add a synthetic independent covariate to the adjustment set;
    /// robust when the estimate moves by at most `tolerance`
    /// (relative; absolute when the original estimate is ~0).
    RandomCommonCause {
        /// Maximum accepted deviation.
        tolerance: f64,
    },
    /// Replace the treatment with a permuted copy of itself; robust
    /// when the placebo estimate is within
    /// `tolerance · max(1, |original|)` of zero.
    PlaceboTreatment {
        /// Maximum accepted deviation from zero.
        tolerance: f64,
    },
}

impl RefutationMethod {
    /// Parse a method name with the default tolerance. Unknown names
    /// fail with [`Error::UnsupportedMethod`], deterministically.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "random_common_cause" => {
                Ok(RefutationMethod::RandomCommonCause { tolerance: DEFAULT_TOLERANCE })
            }
            "placebo_treatment" => {
                Ok(RefutationMethod::PlaceboTreatment { tolerance: DEFAULT_TOLERANCE })
            }
            other => Err(Error::UnsupportedMethod(other.to_string())),
        }
    }

    /// Canonical method name.
    pub fn name(&self) -> &'static str {
        match self {
            RefutationMethod::RandomCommonCause { .. } => "random_common_cause",
            RefutationMethod::PlaceboTreatment { .. } => "placebo_treatment",
        }
    }
}

/// Outcome of one refutation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefutationResult {
    /// Refutation method name.
    pub method: String,
    /// The estimate under the perturbed setup.
    pub refuted_estimate: f64,
    /// The original estimate.
    pub original_estimate: f64,
    /// Verdict under the method's tolerance rule.
    pub robust: bool,
}

/// Re-run the estimate under a perturbation and judge robustness.
///
/// The estimation method is recovered from
/// [`CausalEstimate::method`]; the original table is never mutated.
pub fn refute(
    table: &Table,
    original: &CausalEstimate,
    method: &RefutationMethod,
    seed: u64,
) -> Result<RefutationResult> {
    let estimation = EstimationMethod::parse(&original.method)?;
    let (refuted, robust) = match method {
        RefutationMethod::RandomCommonCause { tolerance } => {
            let refuted = with_random_common_cause(table, original, &estimation, seed)?;
            let deviation = (refuted - original.estimate).abs();
            let robust = if original.estimate.abs() > ZERO_ESTIMATE_EPS {
                deviation <= tolerance * original.estimate.abs()
            } else {
                deviation <= *tolerance
            };
            (refuted, robust)
        }
        RefutationMethod::PlaceboTreatment { tolerance } => {
            let refuted = with_placebo_treatment(table, original, &estimation, seed)?;
            let robust = refuted.abs() <= tolerance * original.estimate.abs().max(1.0);
            (refuted, robust)
        }
    };
    Ok(RefutationResult {
        method: method.name().to_string(),
        refuted_estimate: refuted,
        original_estimate: original.estimate,
        robust,
    })
}

fn with_random_common_cause(
    table: &Table,
    original: &CausalEstimate,
    estimation: &EstimationMethod,
    seed: u64,
) -> Result<f64> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let synthetic: Vec<f64> =
        (0..table.n_rows()).map(|_| StandardNormal.sample(&mut rng)).collect();

    let mut name = "_random_common_cause".to_string();
    let mut k = 0usize;
    while table.has_column(&name) {
        k += 1;
        name = format!("_random_common_cause_{k}");
    }

    let augmented = table.with_numeric_column(&name, synthetic)?;
    let mut adjustment = original.adjustment.clone();
    adjustment.push(name);
    adjustment.sort();

    let refit =
        estimate(&augmented, &original.treatment, &original.outcome, &adjustment, estimation)?;
    Ok(refit.estimate)
}

fn with_placebo_treatment(
    table: &Table,
    original: &CausalEstimate,
    estimation: &EstimationMethod,
    seed: u64,
) -> Result<f64> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut placebo = table.numeric(&original.treatment)?;
    placebo.shuffle(&mut rng);

    let shuffled = table.with_numeric_column(&original.treatment, placebo)?;
    let refit = estimate(
        &shuffled,
        &original.treatment,
        &original.outcome,
        &original.adjustment,
        estimation,
    )?;
    Ok(refit.estimate)
}

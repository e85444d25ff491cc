//! Causal effect estimation.
//!
//! Two estimators over a [`Table`], a treatment/outcome pair and an
//! adjustment set:
//!
//! - **Linear adjustment**: OLS of the outcome on
//!   `[intercept, treatment] ∪ adjustment set`; the treatment
//!   coefficient is the point estimate, with the usual
//!   `σ²·(XᵀX)⁻¹` standard error.
//! - **Propensity matching**: a logistic propensity model
//!   (treatment ~ adjustment set) fit by IRLS, nearest-neighbor
//!   matching of each treated unit to a control (ties to the lowest
//!   row index), ATT as the mean matched outcome difference. Standard
//!   error, when requested, comes from a seeded bootstrap.
//!
//! Method selection is an enum; unknown method names are rejected at
//! construction time by [`EstimationMethod::parse`], deterministically.

use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use ck_core::{Error, Result, Table};

const IRLS_MAX_ITER: usize = 25;
const IRLS_TOL: f64 = 1e-8;
const MIN_IRLS_WEIGHT: f64 = 1e-10;

/// Bootstrap configuration for resampled standard errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapSe {
    /// Number of bootstrap resamples.
    pub n_resamples: usize,
    /// Master seed; resample `i` uses `seed + i`.
    pub seed: u64,
}

/// Effect estimation method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EstimationMethod {
    /// OLS on `[treatment] ∪ adjustment set`.
    LinearAdjustment,
    /// Logistic propensity model + nearest-neighbor matching.
    PropensityMatching {
        /// Optional bootstrap standard error.
        bootstrap: Option<BootstrapSe>,
    },
}

impl EstimationMethod {
    /// Parse a method name. Unknown names fail with
    /// [`Error::UnsupportedMethod`] carrying the offending string;
    /// the same name always fails the same way.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "linear_adjustment" => Ok(EstimationMethod::LinearAdjustment),
            "propensity_matching" => Ok(EstimationMethod::PropensityMatching { bootstrap: None }),
            other => Err(Error::UnsupportedMethod(other.to_string())),
        }
    }

    /// Canonical method name.
    pub fn name(&self) -> &'static str {
        match self {
            EstimationMethod::LinearAdjustment => "linear_adjustment",
            EstimationMethod::PropensityMatching { .. } => "propensity_matching",
        }
    }
}

/// A point estimate of a causal effect. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalEstimate {
    /// Treatment variable.
    pub treatment: String,
    /// Outcome variable.
    pub outcome: String,
    /// Adjustment set used, sorted.
    pub adjustment: Vec<String>,
    /// Method name (parseable by [`EstimationMethod::parse`]).
    pub method: String,
    /// Point estimate of the effect.
    pub estimate: f64,
    /// Standard error, when the method provides one.
    pub std_error: Option<f64>,
    /// t-statistic (`estimate / std_error`).
    pub t_stat: Option<f64>,
    /// Two-sided normal p-value.
    pub p_value: Option<f64>,
    /// Number of observations used.
    pub n_obs: usize,
}

#[inline]
fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 { 1.0 / (1.0 + (-x).exp()) } else { x.exp() / (1.0 + x.exp()) }
}

#[inline]
fn standard_normal() -> Normal {
    // Safe by construction for mean=0, sigma=1.
    Normal::new(0.0, 1.0).expect("standard normal should be constructible")
}

fn two_sided_p(t: f64) -> f64 {
    2.0 * (1.0 - standard_normal().cdf(t.abs()))
}

/// Estimate the causal effect of `treatment` on `outcome`, adjusting
/// for `adjustment`. The table is never mutated.
pub fn estimate(
    table: &Table,
    treatment: &str,
    outcome: &str,
    adjustment: &[String],
    method: &EstimationMethod,
) -> Result<CausalEstimate> {
    if treatment == outcome {
        return Err(Error::Validation(format!(
            "treatment and outcome are the same variable {treatment:?}"
        )));
    }
    if adjustment.iter().any(|a| a == treatment || a == outcome) {
        return Err(Error::Validation(format!(
            "adjustment set overlaps treatment/outcome pair ({treatment:?}, {outcome:?})"
        )));
    }
    let n = table.n_rows();
    if n == 0 {
        return Err(Error::Validation("table has no rows".into()));
    }

    let t = table.numeric(treatment)?;
    let y = table.numeric(outcome)?;
    let mut z = Vec::with_capacity(adjustment.len());
    for name in adjustment {
        z.push(table.numeric(name)?);
    }

    let (est, se) = match method {
        EstimationMethod::LinearAdjustment => linear_adjustment(&t, &y, &z)?,
        EstimationMethod::PropensityMatching { bootstrap } => {
            let t_bin = binary_treatment(&t, treatment)?;
            let est = propensity_match_att(&t_bin, &y, &z)?;
            let se = match bootstrap {
                Some(cfg) => bootstrap_matching_se(&t_bin, &y, &z, *cfg),
                None => None,
            };
            (est, se)
        }
    };

    let t_stat = se.filter(|&s| s > 0.0).map(|s| est / s);
    Ok(CausalEstimate {
        treatment: treatment.to_string(),
        outcome: outcome.to_string(),
        adjustment: adjustment.to_vec(),
        method: method.name().to_string(),
        estimate: est,
        std_error: se,
        t_stat,
        p_value: t_stat.map(two_sided_p),
        n_obs: n,
    })
}

/// Naive difference in means for a binary treatment, with no
/// adjustment: `mean(y | t=1) − mean(y | t=0)`.
pub fn naive_difference_in_means(table: &Table, treatment: &str, outcome: &str) -> Result<f64> {
    let t = table.numeric(treatment)?;
    let y = table.numeric(outcome)?;
    let t_bin = binary_treatment(&t, treatment)?;
    let (mut sum1, mut n1, mut sum0, mut n0) = (0.0, 0usize, 0.0, 0usize);
    for i in 0..y.len() {
        if t_bin[i] == 1 {
            sum1 += y[i];
            n1 += 1;
        } else {
            sum0 += y[i];
            n0 += 1;
        }
    }
    if n1 == 0 || n0 == 0 {
        return Err(Error::Validation(format!(
            "treatment {treatment:?} needs both treated and untreated rows (treated={n1}, untreated={n0})"
        )));
    }
    Ok(sum1 / n1 as f64 - sum0 / n0 as f64)
}

fn binary_treatment(t: &[f64], name: &str) -> Result<Vec<u8>> {
    t.iter()
        .map(|&v| {
            if v == 0.0 {
                Ok(0u8)
            } else if v == 1.0 {
                Ok(1u8)
            } else {
                Err(Error::Validation(format!(
                    "treatment {name:?} must be binary (0/1) for this method, found {v}"
                )))
            }
        })
        .collect()
}

/// OLS of y on [1, t, z...]; returns the treatment coefficient and its
/// standard error (`None` when there are no residual degrees of
/// freedom).
fn linear_adjustment(t: &[f64], y: &[f64], z: &[Vec<f64>]) -> Result<(f64, Option<f64>)> {
    let n = y.len();
    let k = 2 + z.len();
    let mut x_data = Vec::with_capacity(n * k);
    for i in 0..n {
        x_data.push(1.0);
        x_data.push(t[i]);
        for col in z {
            x_data.push(col[i]);
        }
    }
    let x = DMatrix::from_row_slice(n, k, &x_data);
    let y_vec = DVector::from_column_slice(y);

    let xtx = x.transpose() * &x;
    let xty = x.transpose() * &y_vec;
    let xtx_inv = xtx
        .try_inverse()
        .ok_or_else(|| Error::Computation("X'X singular in linear adjustment".into()))?;
    let beta = &xtx_inv * &xty;
    let est = beta[1];

    let y_hat = &x * &beta;
    let resid = &y_vec - &y_hat;
    let rss: f64 = resid.iter().map(|r| r * r).sum();
    let dof = n as f64 - k as f64;
    let se = if dof > 0.0 {
        let sigma2 = rss / dof;
        Some((sigma2 * xtx_inv[(1, 1)]).sqrt())
    } else {
        None
    };
    Ok((est, se))
}

/// Fit the logistic propensity model t ~ [1, z...] by IRLS and return
/// per-row propensity scores.
fn propensity_scores(t_bin: &[u8], z: &[Vec<f64>]) -> Result<Vec<f64>> {
    let n = t_bin.len();
    let k = 1 + z.len();
    let mut x_data = Vec::with_capacity(n * k);
    for i in 0..n {
        x_data.push(1.0);
        for col in z {
            x_data.push(col[i]);
        }
    }
    let x = DMatrix::from_row_slice(n, k, &x_data);
    let y: Vec<f64> = t_bin.iter().map(|&v| v as f64).collect();

    let mut beta: DVector<f64> = DVector::zeros(k);
    for _ in 0..IRLS_MAX_ITER {
        let eta = &x * &beta;
        let mut wx = x.clone();
        let mut wz: DVector<f64> = DVector::zeros(n);
        for i in 0..n {
            let p = sigmoid(eta[i]);
            let w = (p * (1.0 - p)).max(MIN_IRLS_WEIGHT);
            let working = eta[i] + (y[i] - p) / w;
            wz[i] = w * working;
            for j in 0..k {
                wx[(i, j)] *= w;
            }
        }
        let xtwx = x.transpose() * &wx;
        let xtwz = x.transpose() * &wz;
        let beta_new = xtwx
            .lu()
            .solve(&xtwz)
            .ok_or_else(|| Error::Computation("X'WX singular in propensity model".into()))?;
        let delta = (&beta_new - &beta).amax();
        beta = beta_new;
        if delta < IRLS_TOL {
            break;
        }
    }

    let eta = &x * &beta;
    Ok(eta.iter().map(|&e| sigmoid(e)).collect())
}

/// ATT by nearest-propensity matching; ties go to the lowest control
/// row index.
fn propensity_match_att(t_bin: &[u8], y: &[f64], z: &[Vec<f64>]) -> Result<f64> {
    let treated: Vec<usize> = (0..t_bin.len()).filter(|&i| t_bin[i] == 1).collect();
    let controls: Vec<usize> = (0..t_bin.len()).filter(|&i| t_bin[i] == 0).collect();
    if treated.is_empty() || controls.is_empty() {
        return Err(Error::Validation(format!(
            "propensity matching needs both groups (treated={}, untreated={})",
            treated.len(),
            controls.len()
        )));
    }
    let ps = propensity_scores(t_bin, z)?;

    let mut total = 0.0;
    for &i in &treated {
        let mut best = controls[0];
        let mut best_dist = (ps[i] - ps[best]).abs();
        for &j in &controls[1..] {
            let dist = (ps[i] - ps[j]).abs();
            if dist < best_dist {
                best = j;
                best_dist = dist;
            }
        }
        total += y[i] - y[best];
    }
    Ok(total / treated.len() as f64)
}

/// Bootstrap standard error of the matching estimate. Resample `i`
/// uses seed `seed + i`, so the result is reproducible independent of
/// parallel execution order. Resamples where the estimate is undefined
/// (e.g. a single-group draw) are skipped; `None` when fewer than two
/// resamples survive.
fn bootstrap_matching_se(
    t_bin: &[u8],
    y: &[f64],
    z: &[Vec<f64>],
    cfg: BootstrapSe,
) -> Option<f64> {
    use rayon::prelude::*;

    let n = y.len();
    let estimates: Vec<f64> = (0..cfg.n_resamples)
        .into_par_iter()
        .filter_map(|trial| {
            let mut rng =
                rand::rngs::StdRng::seed_from_u64(cfg.seed.wrapping_add(trial as u64));
            let idx: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let rt: Vec<u8> = idx.iter().map(|&i| t_bin[i]).collect();
            let ry: Vec<f64> = idx.iter().map(|&i| y[i]).collect();
            let rz: Vec<Vec<f64>> =
                z.iter().map(|col| idx.iter().map(|&i| col[i]).collect()).collect();
            propensity_match_att(&rt, &ry, &rz).ok()
        })
        .collect();

    if estimates.len() < 2 {
        log::warn!(
            "bootstrap SE: only {}/{} resamples produced an estimate; omitting SE",
            estimates.len(),
            cfg.n_resamples
        );
        return None;
    }
    let m = estimates.len() as f64;
    let mean = estimates.iter().sum::<f64>() / m;
    let var = estimates.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / (m - 1.0);
    Some(var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_unknown_deterministically() {
        let a = EstimationMethod::parse("bogus").unwrap_err().to_string();
        let b = EstimationMethod::parse("bogus").unwrap_err().to_string();
        assert_eq!(a, b);
        assert!(a.contains("bogus"), "unexpected message: {a}");
        assert!(EstimationMethod::parse("linear_adjustment").is_ok());
        assert!(EstimationMethod::parse("propensity_matching").is_ok());
    }

    #[test]
    fn test_naive_difference_in_means_exact() {
        let table = Table::from_numeric(vec![
            ("weight", vec![8.0, 9.0, 10.0, 11.0, 12.0]),
            ("expedited", vec![1.0, 1.0, 0.0, 0.0, 0.0]),
            ("delay", vec![1.0, 2.0, 7.0, 8.0, 9.0]),
        ])
        .unwrap();
        let naive = naive_difference_in_means(&table, "expedited", "delay").unwrap();
        assert!((naive - (-6.5)).abs() < 1e-12, "naive={naive}, expected -6.5");

        // OLS with an empty adjustment set reproduces it exactly.
        let est = estimate(
            &table,
            "expedited",
            "delay",
            &[],
            &EstimationMethod::LinearAdjustment,
        )
        .unwrap();
        assert!((est.estimate - (-6.5)).abs() < 1e-10);
        assert_eq!(est.n_obs, 5);
        assert_eq!(est.method, "linear_adjustment");
    }

    #[test]
    fn test_linear_adjustment_recovers_known_coefficient() {
        // y = 1 + 2*t + 3*z exactly; the t coefficient must be 2 and
        // residuals zero.
        let t = vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        let z = vec![1.0, 1.0, 2.0, 2.0, 3.0, 4.0];
        let y: Vec<f64> =
            t.iter().zip(&z).map(|(&ti, &zi)| 1.0 + 2.0 * ti + 3.0 * zi).collect();
        let table = Table::from_numeric(vec![
            ("t", t),
            ("z", z),
            ("y", y),
        ])
        .unwrap();
        let est = estimate(
            &table,
            "t",
            "y",
            &["z".to_string()],
            &EstimationMethod::LinearAdjustment,
        )
        .unwrap();
        assert!((est.estimate - 2.0).abs() < 1e-9, "estimate={}", est.estimate);
        let se = est.std_error.unwrap();
        assert!(se < 1e-6, "exact fit should have ~zero SE, got {se}");
    }

    #[test]
    fn test_adjustment_changes_confounded_estimate() {
        // z pushes both t and y up; unadjusted OLS overstates the
        // effect, adjusting for z recovers it.
        let z = vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0];
        let t = vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0];
        let y: Vec<f64> =
            t.iter().zip(&z).map(|(&ti, &zi)| 1.0 * ti + 4.0 * zi).collect();
        let table = Table::from_numeric(vec![("t", t), ("z", z), ("y", y)]).unwrap();

        let unadjusted =
            estimate(&table, "t", "y", &[], &EstimationMethod::LinearAdjustment).unwrap();
        let adjusted = estimate(
            &table,
            "t",
            "y",
            &["z".to_string()],
            &EstimationMethod::LinearAdjustment,
        )
        .unwrap();
        assert!((adjusted.estimate - 1.0).abs() < 1e-9);
        assert!((unadjusted.estimate - 1.0).abs() > 0.1);
    }

    #[test]
    fn test_propensity_matching_within_stratum() {
        // Treatment rates differ by stratum (0.75 vs 0.25), so the
        // fitted propensity separates the strata and every treated
        // unit matches a control from its own stratum. The
        // within-stratum outcome gap is 2 everywhere.
        let z = vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let t = vec![1.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0];
        let y = vec![7.0, 7.0, 7.0, 5.0, 12.0, 10.0, 10.0, 10.0];
        let table = Table::from_numeric(vec![("z", z), ("t", t), ("y", y)]).unwrap();
        let est = estimate(
            &table,
            "t",
            "y",
            &["z".to_string()],
            &EstimationMethod::PropensityMatching { bootstrap: None },
        )
        .unwrap();
        assert!((est.estimate - 2.0).abs() < 1e-9, "estimate={}", est.estimate);
        assert!(est.std_error.is_none());
    }

    #[test]
    fn test_propensity_matching_tie_lowest_row_index() {
        // Empty adjustment set: every unit has the same propensity, so
        // every treated row ties across all controls and must match
        // the first control row (index order).
        let t = vec![0.0, 1.0, 0.0, 1.0];
        let y = vec![3.0, 10.0, 100.0, 20.0];
        let table = Table::from_numeric(vec![("t", t), ("y", y)]).unwrap();
        let est = estimate(
            &table,
            "t",
            "y",
            &[],
            &EstimationMethod::PropensityMatching { bootstrap: None },
        )
        .unwrap();
        // Both treated rows match control row 0 (y=3): ((10-3)+(20-3))/2.
        assert!((est.estimate - 12.0).abs() < 1e-9, "estimate={}", est.estimate);
    }

    #[test]
    fn test_propensity_matching_requires_binary_treatment() {
        let table = Table::from_numeric(vec![
            ("t", vec![0.0, 0.5, 1.0]),
            ("y", vec![1.0, 2.0, 3.0]),
        ])
        .unwrap();
        let res = estimate(
            &table,
            "t",
            "y",
            &[],
            &EstimationMethod::PropensityMatching { bootstrap: None },
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_bootstrap_se_reproducible() {
        let z = vec![0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        let t = vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        let y = vec![5.0, 3.0, 9.0, 8.0, 6.0, 7.0, 2.0, 11.0];
        let table = Table::from_numeric(vec![("z", z), ("t", t), ("y", y)]).unwrap();
        let method = EstimationMethod::PropensityMatching {
            bootstrap: Some(BootstrapSe { n_resamples: 50, seed: 7 }),
        };
        let a = estimate(&table, "t", "y", &["z".to_string()], &method).unwrap();
        let b = estimate(&table, "t", "y", &["z".to_string()], &method).unwrap();
        assert_eq!(a.std_error, b.std_error);
        assert!(a.std_error.is_some());
    }

    #[test]
    fn test_validation_errors() {
        let table = Table::from_numeric(vec![
            ("t", vec![0.0, 1.0]),
            ("y", vec![1.0, 2.0]),
        ])
        .unwrap();
        assert!(estimate(&table, "t", "t", &[], &EstimationMethod::LinearAdjustment).is_err());
        assert!(estimate(
            &table,
            "t",
            "y",
            &["y".to_string()],
            &EstimationMethod::LinearAdjustment
        )
        .is_err());
        assert!(estimate(&table, "t", "missing", &[], &EstimationMethod::LinearAdjustment)
            .is_err());
    }

    #[test]
    fn test_missing_values_fail_with_count() {
        use ck_core::Column;
        let table = ck_core::Table::new(vec![
            ("t".into(), Column::Numeric(vec![Some(0.0), Some(1.0), Some(1.0)])),
            ("y".into(), Column::Numeric(vec![Some(1.0), None, Some(3.0)])),
        ])
        .unwrap();
        let err = estimate(&table, "t", "y", &[], &EstimationMethod::LinearAdjustment)
            .unwrap_err();
        assert!(err.to_string().contains("missing"), "unexpected: {err}");
    }
}

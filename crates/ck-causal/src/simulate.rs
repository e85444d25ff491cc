//! Intervention simulation and scenario comparison.
//!
//! [`simulate`] applies a do-operation: the intervened column is forced
//! to a constant for every row, and the estimated effect is propagated
//! to the outcome linearly (`outcome += coefficient · delta`), clamped
//! below by a lower bound.
//!
//! Known limitation, by contract: only the intervened column and the
//! outcome column change. Upstream variables that would in reality
//! also respond to the intervention are NOT recomputed; anything the
//! coefficient map does not cover stays frozen at its observed value.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use ck_core::{Result, Table};

/// Non-fatal: the intervention variable has no entry in the
/// coefficient map, so the outcome column was left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingEffectWarning {
    /// The intervention variable that had no coefficient.
    pub variable: String,
}

impl std::fmt::Display for MissingEffectWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no effect coefficient for {:?}; outcome left unchanged", self.variable)
    }
}

/// A simulated table plus any warning raised while producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Simulated {
    /// The new table; same shape as the input, only the intervened and
    /// outcome columns may differ.
    pub table: Table,
    /// Set when the intervention variable had no coefficient.
    pub warning: Option<MissingEffectWarning>,
}

/// Simulate `do(intervention_var := intervention_value)`.
///
/// For every row, `delta = intervention_value − original value`; when
/// `effects` carries a coefficient for the intervention variable the
/// outcome moves by `coefficient · delta`, clamped at
/// `outcome_lower_bound`. The input table is never mutated.
pub fn simulate(
    table: &Table,
    effects: &HashMap<String, f64>,
    intervention_var: &str,
    intervention_value: f64,
    outcome_var: &str,
    outcome_lower_bound: f64,
) -> Result<Simulated> {
    let original = table.numeric(intervention_var)?;
    let outcome = table.numeric(outcome_var)?;

    let (new_outcome, warning) = match effects.get(intervention_var) {
        Some(&coefficient) => {
            let propagated = original
                .iter()
                .zip(&outcome)
                .map(|(&orig, &out)| {
                    let delta = intervention_value - orig;
                    (out + coefficient * delta).max(outcome_lower_bound)
                })
                .collect();
            (propagated, None)
        }
        None => {
            let warning = MissingEffectWarning { variable: intervention_var.to_string() };
            log::warn!("simulate: {warning}");
            (outcome.iter().map(|&o| o.max(outcome_lower_bound)).collect(), Some(warning))
        }
    };

    let table = table
        .with_numeric_column(intervention_var, vec![intervention_value; original.len()])?
        .with_numeric_column(outcome_var, new_outcome)?;
    Ok(Simulated { table, warning })
}

/// A named what-if scenario. No intervention means baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionScenario {
    /// Scenario name, unique within one comparison run by convention
    /// (duplicates are not deduplicated).
    pub name: String,
    /// `(variable, value)` to intervene on; `None` = baseline.
    pub intervention: Option<(String, f64)>,
}

impl InterventionScenario {
    /// The unmodified baseline.
    pub fn baseline(name: impl Into<String>) -> Self {
        Self { name: name.into(), intervention: None }
    }

    /// Force `variable` to `value`.
    pub fn intervene(name: impl Into<String>, variable: impl Into<String>, value: f64) -> Self {
        Self { name: name.into(), intervention: Some((variable.into(), value)) }
    }
}

/// One row of a comparison: the scenario name and its mean outcome, or
/// the error that kept this scenario from evaluating. A failed
/// scenario never aborts the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    /// Scenario name, as supplied.
    pub scenario: String,
    /// Mean of the outcome column under this scenario.
    pub mean_outcome: Option<f64>,
    /// Why the scenario failed, when it did.
    pub error: Option<String>,
}

/// Ordered scenario comparison results; order equals input order.
pub type ComparisonTable = Vec<ComparisonRow>;

fn evaluate_scenario(
    table: &Table,
    scenario: &InterventionScenario,
    effects: &HashMap<String, f64>,
    outcome_var: &str,
    outcome_lower_bound: f64,
) -> ComparisonRow {
    let outcome = match &scenario.intervention {
        None => table.numeric(outcome_var),
        Some((variable, value)) => {
            simulate(table, effects, variable, *value, outcome_var, outcome_lower_bound)
                .and_then(|sim| sim.table.numeric(outcome_var))
        }
    };
    match outcome {
        Ok(values) if !values.is_empty() => ComparisonRow {
            scenario: scenario.name.clone(),
            mean_outcome: Some(values.iter().sum::<f64>() / values.len() as f64),
            error: None,
        },
        Ok(_) => ComparisonRow {
            scenario: scenario.name.clone(),
            mean_outcome: None,
            error: Some(format!("outcome column {outcome_var:?} is empty")),
        },
        Err(e) => ComparisonRow {
            scenario: scenario.name.clone(),
            mean_outcome: None,
            error: Some(e.to_string()),
        },
    }
}

/// Evaluate scenarios in order against the same baseline table.
///
/// Output order equals input order exactly; no reordering, no
/// deduplication. Per-scenario failures land in their row.
pub fn compare_scenarios(
    table: &Table,
    scenarios: &[InterventionScenario],
    effects: &HashMap<String, f64>,
    outcome_var: &str,
    outcome_lower_bound: f64,
) -> ComparisonTable {
    scenarios
        .iter()
        .map(|s| evaluate_scenario(table, s, effects, outcome_var, outcome_lower_bound))
        .collect()
}

/// Parallel [`compare_scenarios`]: scenarios are independent reads of
/// the same immutable table, so they fan out over Rayon. The output
/// order still equals the input order.
pub fn compare_scenarios_parallel(
    table: &Table,
    scenarios: &[InterventionScenario],
    effects: &HashMap<String, f64>,
    outcome_var: &str,
    outcome_lower_bound: f64,
) -> ComparisonTable {
    use rayon::prelude::*;

    scenarios
        .par_iter()
        .map(|s| evaluate_scenario(table, s, effects, outcome_var, outcome_lower_bound))
        .collect()
}

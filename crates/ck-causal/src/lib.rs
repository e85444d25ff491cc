//! # ck-causal
//!
//! Causal effect estimation for observational tabular data:
//!
//! - heuristic graph discovery (correlation + ordered orientation rules)
//! - backdoor identification of adjustment sets
//! - effect estimation (linear adjustment, propensity matching)
//! - refutation tests (random common cause, placebo treatment)
//! - do-operator intervention simulation and scenario comparison
//!
//! One pipeline: graph -> adjustment set -> point estimate -> robustness
//! check -> simulated counterfactual outcomes. All stochastic steps take
//! an explicit seed; parallel units derive their stream from
//! `seed + index`, so results are reproducible at any parallelism.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Heuristic graph discovery from correlation plus domain rules.
pub mod discovery;
/// Effect estimation: linear adjustment and propensity matching.
pub mod estimate;
/// Node arena graph with cycle detection and conflict diagnostics.
pub mod graph;
/// Backdoor identification of adjustment sets.
pub mod identify;
/// Refutation tests for estimated effects.
pub mod refute;
/// Intervention simulation and scenario comparison.
pub mod simulate;

pub use discovery::{logistics_rules, GraphBuilder, NamePredicate, OrientationRule};
pub use estimate::{
    estimate, naive_difference_in_means, BootstrapSe, CausalEstimate, EstimationMethod,
};
pub use graph::{CausalGraph, EdgeConflict, GraphExport};
pub use identify::{identify, AdjustmentSource, Identification};
pub use refute::{refute, RefutationMethod, RefutationResult};
pub use simulate::{
    compare_scenarios, compare_scenarios_parallel, simulate, ComparisonRow, ComparisonTable,
    InterventionScenario, MissingEffectWarning, Simulated,
};

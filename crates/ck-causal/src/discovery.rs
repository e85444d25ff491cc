//! Heuristic causal-graph discovery.
//!
//! Correlation is evidence of association, never of direction: an edge
//! is added only when (a) the absolute Pearson correlation between two
//! numeric columns exceeds the threshold AND (b) an orientation rule
//! authorizes that direction. Rules are an ordered list of typed name
//! predicates evaluated first-match-wins, so precedence and conflict
//! resolution are auditable in isolation from the correlation pass.
//!
//! This is deliberately not a conditional-independence-based discovery
//! algorithm (no PC/FCI); it encodes domain knowledge, not statistics.

use ck_core::{Error, Result, Table};
use serde::{Deserialize, Serialize};

use crate::graph::{CausalGraph, EdgeConflict};

/// Predicate over a column name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamePredicate {
    /// Matches every name.
    Any,
    /// Exact name match.
    Exact(String),
    /// Name contains the given fragment.
    Contains(String),
    /// Name starts with the given prefix.
    Prefix(String),
    /// Name ends with the given suffix.
    Suffix(String),
}

impl NamePredicate {
    /// Evaluate the predicate against a column name.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NamePredicate::Any => true,
            NamePredicate::Exact(s) => name == s,
            NamePredicate::Contains(s) => name.contains(s.as_str()),
            NamePredicate::Prefix(s) => name.starts_with(s.as_str()),
            NamePredicate::Suffix(s) => name.ends_with(s.as_str()),
        }
    }
}

/// One edge-orientation rule: if the source predicate matches the
/// source column and the target predicate matches the target column,
/// the edge `source -> target` is authorized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrientationRule {
    /// Predicate on the source column name.
    pub source: NamePredicate,
    /// Predicate on the target column name.
    pub target: NamePredicate,
}

impl OrientationRule {
    /// Build a rule from a pair of predicates.
    pub fn new(source: NamePredicate, target: NamePredicate) -> Self {
        Self { source, target }
    }

    /// Whether this rule authorizes `source -> target`.
    pub fn authorizes(&self, source: &str, target: &str) -> bool {
        self.source.matches(source) && self.target.matches(target)
    }
}

/// The logistics orientation heuristic: weather drives congestion and
/// delay, congestion drives delay and route choice, route choice
/// drives delay. Shipped as data; production deployments supply their
/// own ordered rule list.
pub fn logistics_rules() -> Vec<OrientationRule> {
    use NamePredicate::Contains;
    vec![
        OrientationRule::new(Contains("weather".into()), Contains("congestion".into())),
        OrientationRule::new(Contains("congestion".into()), Contains("delay".into())),
        OrientationRule::new(Contains("route".into()), Contains("delay".into())),
        OrientationRule::new(Contains("weather".into()), Contains("delay".into())),
        OrientationRule::new(Contains("congestion".into()), Contains("route".into())),
    ]
}

/// Correlation-plus-rules graph builder.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    threshold: f64,
    rules: Vec<OrientationRule>,
}

impl GraphBuilder {
    /// Create a builder with an absolute-correlation threshold and an
    /// ordered rule list.
    pub fn new(threshold: f64, rules: Vec<OrientationRule>) -> Result<Self> {
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Validation(format!(
                "correlation threshold must be in [0, 1], got {threshold}"
            )));
        }
        Ok(Self { threshold, rules })
    }

    /// Derive a causal graph from the numeric columns of `table`.
    ///
    /// Column pairs with undefined correlation (zero variance) are
    /// skipped. A cyclic result is returned flagged, never silently
    /// accepted; see [`CausalGraph::is_acyclic`].
    pub fn build(&self, table: &Table) -> Result<CausalGraph> {
        let names: Vec<String> =
            table.numeric_column_names().iter().map(|s| s.to_string()).collect();
        let k = names.len();
        let mut columns = Vec::with_capacity(k);
        for name in &names {
            columns.push(table.numeric(name)?);
        }

        // Candidate (source, target) -> authorizing rule index.
        // k is small; an O(k^2 * r) scan in column order keeps the
        // result independent of any hash iteration order.
        let mut candidates: Vec<Vec<Option<usize>>> = vec![vec![None; k]; k];
        for i in 0..k {
            for j in 0..k {
                if i == j {
                    continue;
                }
                let corr = match pearson_abs(&columns[i], &columns[j]) {
                    Some(c) => c,
                    None => continue, // undefined (zero variance): no evidence either way
                };
                if corr <= self.threshold {
                    continue;
                }
                candidates[i][j] =
                    self.rules.iter().position(|r| r.authorizes(&names[i], &names[j]));
            }
        }

        let mut graph = CausalGraph::with_nodes(names.clone())?;
        for i in 0..k {
            for j in (i + 1)..k {
                let forward = candidates[i][j];
                let backward = candidates[j][i];
                match (forward, backward) {
                    (None, None) => {}
                    (Some(_), None) => graph.insert_edge(i, j)?,
                    (None, Some(_)) => graph.insert_edge(j, i)?,
                    (Some(rf), Some(rb)) => {
                        // Both directions authorized: lowest rule index
                        // wins, then the lexicographically smaller
                        // source name.
                        let forward_wins =
                            rf < rb || (rf == rb && names[i] < names[j]);
                        let (src, dst, kept, discarded) = if forward_wins {
                            (i, j, rf, rb)
                        } else {
                            (j, i, rb, rf)
                        };
                        graph.insert_edge(src, dst)?;
                        graph.push_conflict(EdgeConflict {
                            kept_source: names[src].clone(),
                            kept_target: names[dst].clone(),
                            kept_rule: kept,
                            discarded_rule: discarded,
                        });
                    }
                }
            }
        }
        graph.finalize();
        Ok(graph)
    }
}

/// Absolute Pearson correlation; `None` when undefined (zero variance
/// in either column, or fewer than two rows).
fn pearson_abs(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len();
    if n < 2 || y.len() != n {
        return None;
    }
    let nf = n as f64;
    let mean_x = x.iter().sum::<f64>() / nf;
    let mean_y = y.iter().sum::<f64>() / nf;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = x[i] - mean_x;
        let dy = y[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= 0.0 || var_y <= 0.0 {
        return None;
    }
    let r = cov / (var_x.sqrt() * var_y.sqrt());
    r.is_finite().then_some(r.abs())
}

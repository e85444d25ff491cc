//! Backdoor identification of adjustment sets.
//!
//! Given an acyclic causal graph and a treatment/outcome pair, this
//! module enumerates the backdoor paths (paths whose first hop is an
//! edge *into* the treatment) and searches for the smallest set of
//! non-descendant-of-treatment variables that blocks all of them under
//! d-separation semantics:
//!
//! - a non-collider on a path blocks it when conditioned on;
//! - a collider blocks it unless the collider or one of its
//!   descendants is conditioned on.
//!
//! Ties between equally small valid sets are broken by lexicographic
//! variable order, so identification is deterministic.

use std::collections::BTreeSet;

use ck_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::graph::CausalGraph;

/// Subset search is exponential in the candidate count; discovery-built
/// graphs are small, so this bound exists to fail loudly instead of
/// hanging on pathological hand-built graphs.
const MAX_CANDIDATES: usize = 20;

/// Where an adjustment set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentSource {
    /// Computed from a valid graph via the backdoor criterion.
    Backdoor,
    /// Caller-supplied confounder list (no usable graph).
    ExplicitConfounders,
    /// Nothing to adjust on: no graph and no explicit confounders.
    /// Estimation on this identification must be acknowledged first.
    Unadjusted,
}

/// An identified adjustment set for one treatment/outcome pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    treatment: String,
    outcome: String,
    adjustment: Vec<String>,
    source: AdjustmentSource,
    acknowledged: bool,
}

impl Identification {
    /// Treatment variable name.
    pub fn treatment(&self) -> &str {
        &self.treatment
    }

    /// Outcome variable name.
    pub fn outcome(&self) -> &str {
        &self.outcome
    }

    /// Where the adjustment set came from.
    pub fn source(&self) -> AdjustmentSource {
        self.source
    }

    /// Whether this identification adjusts for nothing because no
    /// graph and no explicit confounders were available.
    pub fn is_unadjusted(&self) -> bool {
        self.source == AdjustmentSource::Unadjusted
    }

    /// The adjustment set, sorted by variable name.
    ///
    /// For an [`AdjustmentSource::Unadjusted`] identification this
    /// fails until [`Identification::acknowledge_unadjusted`] has been
    /// called: estimating without any adjustment is only valid when
    /// the caller opts in.
    pub fn adjustment_set(&self) -> Result<&[String]> {
        if self.is_unadjusted() && !self.acknowledged {
            return Err(Error::Identification(format!(
                "effect of {:?} on {:?} is unidentified (no graph, no explicit confounders); \
                 call acknowledge_unadjusted() to estimate without adjustment",
                self.treatment, self.outcome
            )));
        }
        Ok(&self.adjustment)
    }

    /// Opt in to unadjusted estimation.
    pub fn acknowledge_unadjusted(mut self) -> Self {
        self.acknowledged = true;
        self
    }
}

/// Identify an adjustment set for `treatment -> outcome`.
///
/// With a valid (acyclic) graph, applies the backdoor criterion. With
/// no graph, or a graph flagged cyclic, falls back to
/// `explicit_confounders`; with neither, returns an
/// [`AdjustmentSource::Unadjusted`] identification and logs a warning.
///
/// Fails with [`Error::Identification`] when the graph is acyclic but
/// no blocking set exists and no explicit confounders were given.
pub fn identify(
    graph: Option<&CausalGraph>,
    treatment: &str,
    outcome: &str,
    explicit_confounders: Option<&[String]>,
) -> Result<Identification> {
    if treatment == outcome {
        return Err(Error::Validation(format!(
            "treatment and outcome are the same variable {treatment:?}"
        )));
    }

    let usable_graph = match graph {
        Some(g) if g.is_acyclic() => Some(g),
        Some(_) => {
            log::warn!(
                "identify: graph for {treatment:?} -> {outcome:?} is cyclic; \
                 falling back to explicit confounders"
            );
            None
        }
        None => None,
    };

    if let Some(g) = usable_graph {
        match backdoor_adjustment(g, treatment, outcome)? {
            Some(adjustment) => {
                return Ok(Identification {
                    treatment: treatment.into(),
                    outcome: outcome.into(),
                    adjustment,
                    source: AdjustmentSource::Backdoor,
                    acknowledged: false,
                });
            }
            None => {
                if explicit_confounders.is_none() {
                    return Err(Error::Identification(format!(
                        "no adjustment set blocks all backdoor paths from {treatment:?} \
                         to {outcome:?}, and no explicit confounders were given"
                    )));
                }
            }
        }
    }

    if let Some(confounders) = explicit_confounders {
        let adjustment = validated_confounders(confounders, treatment, outcome)?;
        return Ok(Identification {
            treatment: treatment.into(),
            outcome: outcome.into(),
            adjustment,
            source: AdjustmentSource::ExplicitConfounders,
            acknowledged: false,
        });
    }

    log::warn!(
        "identify: no graph and no confounders for {treatment:?} -> {outcome:?}; \
         estimation will be unadjusted"
    );
    Ok(Identification {
        treatment: treatment.into(),
        outcome: outcome.into(),
        adjustment: Vec::new(),
        source: AdjustmentSource::Unadjusted,
        acknowledged: false,
    })
}

fn validated_confounders(
    confounders: &[String],
    treatment: &str,
    outcome: &str,
) -> Result<Vec<String>> {
    let mut set = BTreeSet::new();
    for c in confounders {
        if c == treatment || c == outcome {
            return Err(Error::Validation(format!(
                "confounder {c:?} overlaps treatment/outcome pair ({treatment:?}, {outcome:?})"
            )));
        }
        set.insert(c.clone());
    }
    Ok(set.into_iter().collect())
}

/// One hop of a path: the neighbor index and whether the edge points
/// away from the current node (`true`) or into it (`false`).
type Hop = (usize, bool);

/// A backdoor path: node indices plus, per consecutive pair, whether
/// the edge points forward along the path.
#[derive(Debug, Clone)]
struct Path {
    nodes: Vec<usize>,
    forward: Vec<bool>,
}

impl Path {
    /// Whether conditioning on `z` blocks this path.
    fn blocked_by(&self, graph: &CausalGraph, z: &BTreeSet<usize>) -> bool {
        for i in 1..self.nodes.len() - 1 {
            let v = self.nodes[i];
            // Collider: both adjacent edges point into v.
            let collider = self.forward[i - 1] && !self.forward[i];
            if collider {
                let opened =
                    z.contains(&v) || graph.descendants(v).iter().any(|d| z.contains(d));
                if !opened {
                    return true;
                }
            } else if z.contains(&v) {
                return true;
            }
        }
        false
    }
}

/// All backdoor paths from `t` to `y`: simple paths whose first edge
/// points into `t`.
fn backdoor_paths(graph: &CausalGraph, t: usize, y: usize) -> Vec<Path> {
    let n = graph.nodes().len();
    let mut adjacency: Vec<Vec<Hop>> = vec![Vec::new(); n];
    for (s, d) in graph.edge_indices() {
        adjacency[s].push((d, true));
        adjacency[d].push((s, false));
    }

    let mut paths = Vec::new();
    let mut visited = vec![false; n];
    visited[t] = true;
    // First hop restricted to edges into the treatment.
    for &(next, away) in &adjacency[t] {
        if away {
            continue;
        }
        let mut nodes = vec![t, next];
        let mut forward = vec![false];
        walk(&adjacency, y, &mut visited, &mut nodes, &mut forward, &mut paths);
        debug_assert_eq!(nodes.len(), 2);
    }
    paths
}

fn walk(
    adjacency: &[Vec<Hop>],
    y: usize,
    visited: &mut [bool],
    nodes: &mut Vec<usize>,
    forward: &mut Vec<bool>,
    paths: &mut Vec<Path>,
) {
    let current = *nodes.last().unwrap();
    if current == y {
        paths.push(Path { nodes: nodes.clone(), forward: forward.clone() });
        return;
    }
    visited[current] = true;
    for &(next, away) in &adjacency[current] {
        if visited[next] {
            continue;
        }
        nodes.push(next);
        forward.push(away);
        walk(adjacency, y, visited, nodes, forward, paths);
        nodes.pop();
        forward.pop();
    }
    visited[current] = false;
}

/// Smallest blocking set of non-descendants, lexicographic tie-break.
/// `Ok(None)` means no subset of the candidates blocks every path.
fn backdoor_adjustment(
    graph: &CausalGraph,
    treatment: &str,
    outcome: &str,
) -> Result<Option<Vec<String>>> {
    let t = graph
        .node_index(treatment)
        .ok_or_else(|| Error::Validation(format!("treatment {treatment:?} not in graph")))?;
    let y = graph
        .node_index(outcome)
        .ok_or_else(|| Error::Validation(format!("outcome {outcome:?} not in graph")))?;

    let paths = backdoor_paths(graph, t, y);
    if paths.is_empty() {
        return Ok(Some(Vec::new()));
    }

    let forbidden = graph.descendants(t);
    let mut candidates: Vec<usize> = (0..graph.nodes().len())
        .filter(|&v| v != t && v != y && !forbidden.contains(&v))
        .collect();
    candidates.sort_by(|&a, &b| graph.node_name(a).cmp(graph.node_name(b)));
    if candidates.len() > MAX_CANDIDATES {
        return Err(Error::Computation(format!(
            "backdoor search over {} candidate variables exceeds the supported bound of {}",
            candidates.len(),
            MAX_CANDIDATES
        )));
    }

    // Increasing size, lexicographic within a size (candidates are
    // name-sorted, so combination order is lexicographic).
    for size in 0..=candidates.len() {
        let mut found: Option<Vec<usize>> = None;
        for_each_combination(&candidates, size, &mut |subset| {
            if found.is_some() {
                return;
            }
            let z: BTreeSet<usize> = subset.iter().copied().collect();
            if paths.iter().all(|p| p.blocked_by(graph, &z)) {
                found = Some(subset.to_vec());
            }
        });
        if let Some(subset) = found {
            return Ok(Some(
                subset.into_iter().map(|v| graph.node_name(v).to_string()).collect(),
            ));
        }
    }
    Ok(None)
}

fn for_each_combination(items: &[usize], size: usize, f: &mut impl FnMut(&[usize])) {
    fn rec(
        items: &[usize],
        size: usize,
        start: usize,
        current: &mut Vec<usize>,
        f: &mut impl FnMut(&[usize]),
    ) {
        if current.len() == size {
            f(current);
            return;
        }
        for i in start..items.len() {
            current.push(items[i]);
            rec(items, size, i + 1, current, f);
            current.pop();
        }
    }
    rec(items, size, 0, &mut Vec::with_capacity(size), f);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_confounder_is_identified() {
        // Classic fork: z -> t, z -> y, t -> y. The only backdoor path
        // t <- z -> y is blocked by {z}.
        let g = CausalGraph::from_edges(
            names(&["t", "y", "z"]),
            &[("z", "t"), ("z", "y"), ("t", "y")],
        )
        .unwrap();
        let id = identify(Some(&g), "t", "y", None).unwrap();
        assert_eq!(id.source(), AdjustmentSource::Backdoor);
        assert_eq!(id.adjustment_set().unwrap(), &["z".to_string()]);
    }

    #[test]
    fn test_no_backdoor_paths_empty_set() {
        let g = CausalGraph::from_edges(names(&["t", "m", "y"]), &[("t", "m"), ("m", "y")])
            .unwrap();
        let id = identify(Some(&g), "t", "y", None).unwrap();
        assert_eq!(id.source(), AdjustmentSource::Backdoor);
        assert!(id.adjustment_set().unwrap().is_empty());
    }

    #[test]
    fn test_descendants_of_treatment_excluded() {
        // z confounds t and y; m is a child of t. The valid set is {z};
        // m must never appear even though conditioning on descendants
        // could otherwise look tempting.
        let g = CausalGraph::from_edges(
            names(&["t", "y", "z", "m"]),
            &[("z", "t"), ("z", "y"), ("t", "m"), ("m", "y")],
        )
        .unwrap();
        let id = identify(Some(&g), "t", "y", None).unwrap();
        assert_eq!(id.adjustment_set().unwrap(), &["z".to_string()]);
    }

    #[test]
    fn test_collider_path_needs_no_adjustment() {
        // t <- a -> c <- b -> y is blocked at the collider c as long as
        // c stays out of the set; minimal answer is the empty set.
        let g = CausalGraph::from_edges(
            names(&["t", "y", "a", "b", "c"]),
            &[("a", "t"), ("a", "c"), ("b", "c"), ("b", "y"), ("t", "y")],
        )
        .unwrap();
        let id = identify(Some(&g), "t", "y", None).unwrap();
        assert!(id.adjustment_set().unwrap().is_empty());
    }

    #[test]
    fn test_two_confounders() {
        let g = CausalGraph::from_edges(
            names(&["t", "y", "u", "v"]),
            &[("u", "t"), ("u", "y"), ("v", "t"), ("v", "y"), ("t", "y")],
        )
        .unwrap();
        let id = identify(Some(&g), "t", "y", None).unwrap();
        assert_eq!(id.adjustment_set().unwrap(), &["u".to_string(), "v".to_string()]);
    }

    #[test]
    fn test_lexicographic_tie_break() {
        // Two equally valid singleton sets along the chain
        // t <- a ... replaced by a fork where either parent blocks:
        // backdoor path t <- a -> b -> y; {a} and {b} both block it.
        // "a" must win the tie.
        let g = CausalGraph::from_edges(
            names(&["t", "y", "b", "a"]),
            &[("a", "t"), ("a", "b"), ("b", "y"), ("t", "y")],
        )
        .unwrap();
        let id = identify(Some(&g), "t", "y", None).unwrap();
        assert_eq!(id.adjustment_set().unwrap(), &["a".to_string()]);
    }

    #[test]
    fn test_unidentifiable_without_fallback() {
        // Outcome causes treatment: the backdoor path t <- y has no
        // interior node to condition on, so no blocking set exists.
        let g =
            CausalGraph::from_edges(names(&["t", "y", "z"]), &[("y", "t"), ("z", "y")]).unwrap();
        let err = identify(Some(&g), "t", "y", None).unwrap_err();
        assert!(matches!(err, Error::Identification(_)), "got {err:?}");

        // The same graph with explicit confounders falls back instead.
        let confounders = vec!["z".to_string()];
        let id = identify(Some(&g), "t", "y", Some(&confounders)).unwrap();
        assert_eq!(id.source(), AdjustmentSource::ExplicitConfounders);
    }

    #[test]
    fn test_cyclic_graph_falls_back_to_explicit() {
        let g = CausalGraph::from_edges(
            names(&["t", "y", "z"]),
            &[("t", "y"), ("y", "z"), ("z", "t")],
        )
        .unwrap();
        assert!(!g.is_acyclic());
        let confounders = vec!["z".to_string()];
        let id = identify(Some(&g), "t", "y", Some(&confounders)).unwrap();
        assert_eq!(id.source(), AdjustmentSource::ExplicitConfounders);
        assert_eq!(id.adjustment_set().unwrap(), &["z".to_string()]);
    }

    #[test]
    fn test_unadjusted_requires_acknowledgment() {
        let id = identify(None, "t", "y", None).unwrap();
        assert!(id.is_unadjusted());
        assert!(id.adjustment_set().is_err());
        let id = id.acknowledge_unadjusted();
        assert!(id.adjustment_set().unwrap().is_empty());
    }

    #[test]
    fn test_explicit_confounders_sorted_deduped() {
        let confounders =
            vec!["b".to_string(), "a".to_string(), "b".to_string()];
        let id = identify(None, "t", "y", Some(&confounders)).unwrap();
        assert_eq!(id.adjustment_set().unwrap(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_confounder_overlapping_pair_rejected() {
        let confounders = vec!["t".to_string()];
        assert!(identify(None, "t", "y", Some(&confounders)).is_err());
        assert!(identify(None, "t", "t", None).is_err());
    }
}

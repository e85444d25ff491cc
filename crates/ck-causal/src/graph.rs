//! Causal graph: node arena with integer-indexed edges.
//!
//! Nodes are variable names stored in an arena and addressed by stable
//! `usize` indices; edges are `(source, target)` index pairs kept in a
//! `BTreeSet` so that iteration order is deterministic. A graph is
//! immutable once built.
//!
//! Acyclicity is checked once at construction (Kahn topological sort).
//! A cyclic graph is still returned to the caller, flagged via
//! [`CausalGraph::is_acyclic`]; identification refuses to run on it.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use ck_core::{Error, Result};

/// A discarded edge direction, recorded when two orientation rules
/// authorized both directions between the same pair of variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeConflict {
    /// Source of the edge that was kept.
    pub kept_source: String,
    /// Target of the edge that was kept.
    pub kept_target: String,
    /// Index of the rule that authorized the kept edge.
    pub kept_rule: usize,
    /// Index of the rule that authorized the discarded reverse edge.
    pub discarded_rule: usize,
}

/// Stable `(node list, edge list)` view of a graph, for external
/// renderers and serialization. Edge order is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphExport {
    /// Node names, in arena order.
    pub nodes: Vec<String>,
    /// Directed edges as `(source name, target name)` pairs.
    pub edges: Vec<(String, String)>,
}

/// Directed causal graph over named variables.
#[derive(Debug, Clone, PartialEq)]
pub struct CausalGraph {
    names: Vec<String>,
    index: HashMap<String, usize>,
    edges: BTreeSet<(usize, usize)>,
    acyclic: bool,
    conflicts: Vec<EdgeConflict>,
}

impl CausalGraph {
    /// Build a graph from node names and `(source, target)` edges.
    ///
    /// Rejects duplicate node names, unknown endpoint names, self-loops
    /// and pairs with both directions present. Acyclicity is computed
    /// here; a cyclic graph is returned flagged, not rejected.
    pub fn from_edges(names: Vec<String>, edges: &[(&str, &str)]) -> Result<Self> {
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(Error::Validation(format!("duplicate node name {name:?}")));
            }
        }
        let mut graph =
            Self { names, index, edges: BTreeSet::new(), acyclic: true, conflicts: Vec::new() };
        for &(src, dst) in edges {
            let s = graph.require_node(src)?;
            let d = graph.require_node(dst)?;
            graph.insert_edge(s, d)?;
        }
        graph.acyclic = graph.check_acyclic();
        Ok(graph)
    }

    /// Internal builder entry used by discovery: nodes only, edges and
    /// conflicts filled in afterwards via `insert_edge` / `push_conflict`,
    /// acyclicity sealed by `finalize`.
    pub(crate) fn with_nodes(names: Vec<String>) -> Result<Self> {
        Self::from_edges(names, &[])
    }

    pub(crate) fn insert_edge(&mut self, src: usize, dst: usize) -> Result<()> {
        if src == dst {
            return Err(Error::Validation(format!(
                "self-loop on {:?} is not a causal edge",
                self.names[src]
            )));
        }
        if self.edges.contains(&(dst, src)) {
            return Err(Error::Validation(format!(
                "edge {:?} -> {:?} conflicts with existing reverse edge",
                self.names[src], self.names[dst]
            )));
        }
        self.edges.insert((src, dst));
        Ok(())
    }

    pub(crate) fn push_conflict(&mut self, conflict: EdgeConflict) {
        self.conflicts.push(conflict);
    }

    pub(crate) fn finalize(&mut self) {
        self.acyclic = self.check_acyclic();
    }

    fn require_node(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| Error::Validation(format!("unknown node {name:?}")))
    }

    /// Kahn topological sort; true iff every node gets ordered.
    fn check_acyclic(&self) -> bool {
        let n = self.names.len();
        let mut in_degree = vec![0usize; n];
        for &(_, dst) in &self.edges {
            in_degree[dst] += 1;
        }
        let mut queue: Vec<usize> =
            (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut ordered = 0usize;
        while let Some(node) = queue.pop() {
            ordered += 1;
            for &(src, dst) in &self.edges {
                if src == node {
                    in_degree[dst] -= 1;
                    if in_degree[dst] == 0 {
                        queue.push(dst);
                    }
                }
            }
        }
        ordered == n
    }

    /// Node names in arena order.
    pub fn nodes(&self) -> &[String] {
        &self.names
    }

    /// Arena index of a node name.
    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Name of the node at an arena index.
    pub fn node_name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    /// Number of edges.
    pub fn n_edges(&self) -> usize {
        self.edges.len()
    }

    /// Whether a directed edge `source -> target` exists.
    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        match (self.node_index(source), self.node_index(target)) {
            (Some(s), Some(d)) => self.edges.contains(&(s, d)),
            _ => false,
        }
    }

    /// Directed edges as index pairs, in deterministic order.
    pub fn edge_indices(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.edges.iter().copied()
    }

    /// Indices of nodes with an edge into `idx`.
    pub fn parents(&self, idx: usize) -> Vec<usize> {
        self.edges.iter().filter(|&&(_, d)| d == idx).map(|&(s, _)| s).collect()
    }

    /// Indices of nodes with an edge out of `idx`.
    pub fn children(&self, idx: usize) -> Vec<usize> {
        self.edges.iter().filter(|&&(s, _)| s == idx).map(|&(_, d)| d).collect()
    }

    /// All nodes reachable from `idx` along directed edges, excluding
    /// `idx` itself.
    pub fn descendants(&self, idx: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut stack = self.children(idx);
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend(self.children(node));
            }
        }
        seen
    }

    /// Whether the graph is acyclic (valid for identification).
    pub fn is_acyclic(&self) -> bool {
        self.acyclic
    }

    /// Edge-orientation conflicts recorded during discovery.
    pub fn conflicts(&self) -> &[EdgeConflict] {
        &self.conflicts
    }

    /// Stable `(node list, edge list)` pair for renderers.
    pub fn export(&self) -> GraphExport {
        GraphExport {
            nodes: self.names.clone(),
            edges: self
                .edges
                .iter()
                .map(|&(s, d)| (self.names[s].clone(), self.names[d].clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_self_loops() {
        let res = CausalGraph::from_edges(names(&["a"]), &[("a", "a")]);
        assert!(res.is_err());
    }

    #[test]
    fn test_reverse_edge_rejected() {
        let res = CausalGraph::from_edges(names(&["a", "b"]), &[("a", "b"), ("b", "a")]);
        assert!(res.is_err());
    }

    #[test]
    fn test_acyclic_flag() {
        let dag =
            CausalGraph::from_edges(names(&["a", "b", "c"]), &[("a", "b"), ("b", "c")]).unwrap();
        assert!(dag.is_acyclic());

        let cyclic =
            CausalGraph::from_edges(names(&["a", "b", "c"]), &[("a", "b"), ("b", "c"), ("c", "a")])
                .unwrap();
        assert!(!cyclic.is_acyclic());
    }

    #[test]
    fn test_parents_children_descendants() {
        let g = CausalGraph::from_edges(
            names(&["w", "x", "y", "z"]),
            &[("w", "x"), ("x", "y"), ("w", "y"), ("y", "z")],
        )
        .unwrap();
        let w = g.node_index("w").unwrap();
        let y = g.node_index("y").unwrap();
        assert_eq!(g.parents(y).len(), 2);
        assert_eq!(g.children(w).len(), 2);
        let desc: Vec<&str> = g.descendants(w).iter().map(|&i| g.node_name(i)).collect();
        assert_eq!(desc, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_export_serializes_for_renderers() {
        let g = CausalGraph::from_edges(names(&["a", "b"]), &[("a", "b")]).unwrap();
        let json = serde_json::to_string(&g.export()).unwrap();
        let back: GraphExport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g.export());
    }

    #[test]
    fn test_export_is_deterministic() {
        let g1 = CausalGraph::from_edges(names(&["a", "b", "c"]), &[("b", "c"), ("a", "b")]).unwrap();
        let g2 = CausalGraph::from_edges(names(&["a", "b", "c"]), &[("a", "b"), ("b", "c")]).unwrap();
        assert_eq!(g1.export(), g2.export());
        assert_eq!(
            g1.export().edges,
            vec![("a".to_string(), "b".to_string()), ("b".to_string(), "c".to_string())]
        );
    }
}

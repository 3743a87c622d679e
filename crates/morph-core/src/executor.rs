// SPDX-License-Identifier: Apache-2.0
//! Applies a rule to one match: the restrictive phase (clone, remove),
//! then the expansive phase (merge, add).
//!
//! [`apply`] is atomic. The host graph is snapshotted up front and restored
//! wholesale if any step fails, so a failed rewrite never leaves a
//! half-transformed graph behind. Primitive operations treat missing nodes,
//! edges or attributes as fatal inconsistencies and surface the underlying
//! [`GraphError`].
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::graph::{AttributedGraph, GraphError};
use crate::ident::{NodeName, PNodeId, RhsNodeId};
use crate::matching::{Match, MatchError};
use crate::rule::{MergePolicy, Rule, RuleError};
use crate::value::AttrMap;

/// Errors raised while applying a rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewriteError {
    /// A graph primitive failed; the host did not look the way the rule
    /// requires.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// The rule itself failed validation.
    #[error(transparent)]
    Rule(#[from] RuleError),
    /// A symbol lookup on the match failed.
    #[error(transparent)]
    Match(#[from] MatchError),
    /// A merge was asked to combine fewer than one node.
    #[error("tried to merge less than one node")]
    MergeTooFew,
    /// A replacement template referenced a placeholder with no registered
    /// render function.
    #[error("no render function registered for placeholder {0}")]
    MissingRenderFn(String),
    /// Recursive rewriting exceeded its iteration cap without reaching a
    /// fixpoint.
    #[error("no fixpoint after {0} rewrites; the rule keeps producing matches")]
    NonTerminating(usize),
    /// An internal node binding was missing. Indicates a rule/match pair
    /// that do not belong together.
    #[error("no host node is bound for {0}")]
    UnboundNode(String),
}

/// Duplicates a host node: a fresh name derived from the original, the same
/// attributes, and copies of every incident edge with their attributes.
///
/// A self-loop on the original becomes a pair of edges between original and
/// clone, not a self-loop on the clone.
///
/// # Errors
///
/// [`GraphError::NoSuchNode`] if `node` is absent.
pub fn clone_node(
    graph: &mut AttributedGraph<NodeName>,
    node: &NodeName,
) -> Result<NodeName, RewriteError> {
    let attrs = graph
        .node(node)
        .ok_or_else(|| GraphError::NoSuchNode(node.to_string()))?
        .clone();
    let clone_name = fresh_node_name(graph, node.as_str());
    graph.add_node_with(clone_name.clone(), attrs);

    // Snapshot both edge sets before inserting anything: the in-edge pass
    // adds `original -> clone` for a self-loop, which must not leak into the
    // out-edge pass as a `clone -> clone` loop.
    let in_edges: Vec<(NodeName, AttrMap)> = graph
        .in_edges(node)
        .filter_map(|(src, _)| graph.edge(src, node).map(|a| (src.clone(), a.clone())))
        .collect();
    let out_edges: Vec<(NodeName, AttrMap)> = graph
        .out_edges(node)
        .filter_map(|(_, dst)| graph.edge(node, dst).map(|a| (dst.clone(), a.clone())))
        .collect();
    for (src, attrs) in in_edges {
        if !graph.has_edge(&src, &clone_name) {
            graph.add_edge_with(src, clone_name.clone(), attrs)?;
        }
    }
    for (dst, attrs) in out_edges {
        if !graph.has_edge(&clone_name, &dst) {
            graph.add_edge_with(clone_name.clone(), dst, attrs)?;
        }
    }

    Ok(clone_name)
}

/// Collapses a set of host nodes into one fresh node.
///
/// Node attributes are folded with the merge policy in name order. Every
/// distinct external neighbor keeps a single edge to or from the merged
/// node, its attributes folded across the parallel originals. Any edge
/// between (or within) the merged set becomes one self-loop.
///
/// A singleton set is returned as-is without touching the graph.
///
/// # Errors
///
/// [`RewriteError::MergeTooFew`] on an empty set,
/// [`GraphError::NoSuchNode`] if any member is absent.
pub fn merge_nodes(
    graph: &mut AttributedGraph<NodeName>,
    nodes: &BTreeSet<NodeName>,
    policy: MergePolicy,
) -> Result<NodeName, RewriteError> {
    let mut members = nodes.iter();
    let Some(first) = members.next() else {
        return Err(RewriteError::MergeTooFew);
    };
    for node in nodes {
        if !graph.has_node(node) {
            return Err(GraphError::NoSuchNode(node.to_string()).into());
        }
    }
    if members.next().is_none() {
        return Ok(first.clone());
    }

    let joined = nodes
        .iter()
        .map(NodeName::as_str)
        .collect::<Vec<_>>()
        .join("&");
    let merged_name = fresh_node_name(graph, &joined);

    let mut merged_attrs = AttrMap::new();
    let mut merged_srcs: BTreeSet<NodeName> = BTreeSet::new();
    let mut merged_dsts: BTreeSet<NodeName> = BTreeSet::new();
    // External neighbor → folded attrs of the parallel edges, keyed by the
    // neighbor's original name.
    let mut src_attrs: BTreeMap<NodeName, AttrMap> = BTreeMap::new();
    let mut dst_attrs: BTreeMap<NodeName, AttrMap> = BTreeMap::new();
    let mut self_loop = false;
    let mut self_loop_attrs = AttrMap::new();

    for node in nodes {
        let attrs = graph
            .node(node)
            .ok_or_else(|| GraphError::NoSuchNode(node.to_string()))?
            .clone();
        merged_attrs = policy.merge_maps(merged_attrs, attrs);

        let in_edges: Vec<(NodeName, AttrMap)> = graph
            .in_edges(node)
            .filter_map(|(src, _)| graph.edge(src, node).map(|a| (src.clone(), a.clone())))
            .collect();
        for (src, edge_attrs) in in_edges {
            if nodes.contains(&src) {
                merged_srcs.insert(merged_name.clone());
                self_loop = true;
                self_loop_attrs = policy.merge_maps(self_loop_attrs, edge_attrs);
            } else {
                merged_srcs.insert(src.clone());
                let folded = match src_attrs.remove(&src) {
                    Some(existing) => policy.merge_maps(existing, edge_attrs),
                    None => edge_attrs,
                };
                src_attrs.insert(src, folded);
            }
        }

        let out_edges: Vec<(NodeName, AttrMap)> = graph
            .out_edges(node)
            .filter_map(|(_, dst)| graph.edge(node, dst).map(|a| (dst.clone(), a.clone())))
            .collect();
        for (dst, edge_attrs) in out_edges {
            if nodes.contains(&dst) {
                merged_dsts.insert(merged_name.clone());
                self_loop = true;
                self_loop_attrs = policy.merge_maps(self_loop_attrs, edge_attrs);
            } else {
                merged_dsts.insert(dst.clone());
                let folded = match dst_attrs.remove(&dst) {
                    Some(existing) => policy.merge_maps(existing, edge_attrs),
                    None => edge_attrs,
                };
                dst_attrs.insert(dst, folded);
            }
        }

        graph.remove_node(node)?;
    }

    graph.add_node_with(merged_name.clone(), merged_attrs);
    if self_loop {
        graph.add_edge_with(merged_name.clone(), merged_name.clone(), self_loop_attrs)?;
    }
    for src in &merged_srcs {
        if !graph.has_edge(src, &merged_name) {
            graph.add_edge(src.clone(), merged_name.clone())?;
        }
    }
    for dst in &merged_dsts {
        if !graph.has_edge(&merged_name, dst) {
            graph.add_edge(merged_name.clone(), dst.clone())?;
        }
    }
    for (src, attrs) in src_attrs {
        let slot = graph
            .edge_mut(&src, &merged_name)
            .ok_or_else(|| GraphError::NoSuchEdge(src.to_string(), merged_name.to_string()))?;
        *slot = attrs;
    }
    for (dst, attrs) in dst_attrs {
        let slot = graph
            .edge_mut(&merged_name, &dst)
            .ok_or_else(|| GraphError::NoSuchEdge(merged_name.to_string(), dst.to_string()))?;
        *slot = attrs;
    }

    Ok(merged_name)
}

/// Applies `rule` to one occurrence of its pattern in `host`.
///
/// Runs the restrictive phase, then the expansive phase. On any error the
/// host is restored to its pre-call state and the error is returned; on
/// success the consumed match is handed back for reporting.
///
/// # Errors
///
/// Any [`RewriteError`]; the host is unchanged in that case.
pub fn apply(
    host: &mut AttributedGraph<NodeName>,
    mat: &Match,
    rule: &Rule,
) -> Result<Match, RewriteError> {
    debug!(mapping = ?mat.mapping(), "transform match");
    let snapshot = host.clone();
    match apply_phases(host, mat, rule) {
        Ok(()) => Ok(mat.clone()),
        Err(err) => {
            debug!(
                error = %err,
                state = %snapshot.canonical_hash_hex(),
                "rewrite failed, restoring snapshot"
            );
            *host = snapshot;
            Err(err)
        }
    }
}

fn apply_phases(
    host: &mut AttributedGraph<NodeName>,
    mat: &Match,
    rule: &Rule,
) -> Result<(), RewriteError> {
    // Anonymous LHS nodes rewrite like any other, so the full mapping is
    // what both phases consume.
    let p_map = restrictive_phase(host, rule, mat.full_mapping())?;
    expansive_phase(host, rule, &p_map)
}

/// Clone and remove: everything the rule takes away from the host. Returns
/// the P-node → host-node map the expansive phase builds on.
fn restrictive_phase(
    host: &mut AttributedGraph<NodeName>,
    rule: &Rule,
    lhs_map: &BTreeMap<NodeName, NodeName>,
) -> Result<BTreeMap<PNodeId, NodeName>, RewriteError> {
    let mut p_map: BTreeMap<PNodeId, NodeName> = BTreeMap::new();

    // Clone nodes. An un-indexed P node reuses the matched original; every
    // indexed clone becomes a fresh host node.
    let cloned = rule.nodes_to_clone();
    let mut original_reused: BTreeMap<&NodeName, bool> =
        cloned.keys().map(|lhs_node| (lhs_node, false)).collect();
    for (lhs_node, p_clones) in &cloned {
        let host_node = bound(lhs_map, lhs_node)?.clone();
        for p_clone in p_clones {
            if p_clone.is_clone() {
                let clone_name = clone_node(host, &host_node)?;
                debug!(original = %host_node, clone = %clone_name, "clone node");
                p_map.insert(p_clone.clone(), clone_name);
            } else {
                original_reused.insert(lhs_node, true);
                p_map.insert(p_clone.clone(), host_node.clone());
            }
        }
    }

    // Remove nodes, and complete the map with plainly preserved nodes.
    let removed = rule.nodes_to_remove();
    for (lhs_node, _) in rule.lhs().iter_nodes() {
        let fully_cloned =
            original_reused.get(lhs_node).copied() == Some(false);
        if removed.contains(lhs_node) || fully_cloned {
            let host_node = bound(lhs_map, lhs_node)?;
            debug!(node = %host_node, "remove node");
            host.remove_node(host_node)?;
        } else if !cloned.contains_key(lhs_node) {
            if let Some(p_node) = rule.rev_p_lhs().get(lhs_node).and_then(BTreeSet::first) {
                p_map.insert(p_node.clone(), bound(lhs_map, lhs_node)?.clone());
            }
        }
    }

    for (p_src, p_dst) in rule.edges_to_remove() {
        let src = bound(&p_map, &p_src)?.clone();
        let dst = bound(&p_map, &p_dst)?.clone();
        debug!(src = %src, dst = %dst, "remove edge");
        host.remove_edge(&src, &dst)?;
    }

    for (p_node, attrs) in rule.node_attrs_to_remove() {
        let node = bound(&p_map, &p_node)?.clone();
        debug!(node = %node, attrs = ?attrs, "remove node attrs");
        for attr in attrs {
            host.remove_node_attr(&node, &attr)?;
        }
    }

    for ((p_src, p_dst), attrs) in rule.edge_attrs_to_remove() {
        let src = bound(&p_map, &p_src)?.clone();
        let dst = bound(&p_map, &p_dst)?.clone();
        debug!(src = %src, dst = %dst, attrs = ?attrs, "remove edge attrs");
        for attr in attrs {
            host.remove_edge_attr(&src, &dst, &attr)?;
        }
    }

    Ok(p_map)
}

/// Merge and add: everything the rule contributes to the host.
fn expansive_phase(
    host: &mut AttributedGraph<NodeName>,
    rule: &Rule,
    p_map: &BTreeMap<PNodeId, NodeName>,
) -> Result<(), RewriteError> {
    let mut rhs_map: BTreeMap<RhsNodeId, NodeName> = BTreeMap::new();

    let merges = rule.nodes_to_merge();
    for (rhs_node, p_merged) in &merges {
        let to_merge: BTreeSet<NodeName> = p_merged
            .iter()
            .map(|p_node| bound(p_map, p_node).cloned())
            .collect::<Result<_, _>>()?;
        let merged_name = merge_nodes(host, &to_merge, rule.merge_policy())?;
        debug!(nodes = ?to_merge, merged = %merged_name, "merge nodes");
        rhs_map.insert(rhs_node.clone(), merged_name);
    }

    // Add nodes, and complete the map with survivors.
    let added = rule.nodes_to_add();
    for (rhs_node, _) in rule.rhs().iter_nodes() {
        if added.contains(rhs_node) {
            let fresh = fresh_node_name(host, rhs_node.name.as_str());
            debug!(node = %fresh, "add node");
            host.add_node(fresh.clone());
            rhs_map.insert(rhs_node.clone(), fresh);
        } else if !merges.contains_key(rhs_node) {
            if let Some(p_node) = rule.rev_p_rhs().get(rhs_node).and_then(BTreeSet::first) {
                rhs_map.insert(rhs_node.clone(), bound(p_map, p_node)?.clone());
            }
        }
    }

    for (rhs_src, rhs_dst) in rule.edges_to_add() {
        let src = bound(&rhs_map, &rhs_src)?.clone();
        let dst = bound(&rhs_map, &rhs_dst)?.clone();
        debug!(src = %src, dst = %dst, "add edge");
        host.add_edge(src, dst)?;
    }

    for (rhs_node, attrs) in rule.node_attrs_to_add() {
        let node = bound(&rhs_map, &rhs_node)?.clone();
        debug!(node = %node, attrs = ?attrs, "add node attrs");
        for (key, value) in attrs {
            host.set_node_attr(&node, key, value)?;
        }
    }

    for ((rhs_src, rhs_dst), attrs) in rule.edge_attrs_to_add() {
        let src = bound(&rhs_map, &rhs_src)?.clone();
        let dst = bound(&rhs_map, &rhs_dst)?.clone();
        debug!(src = %src, dst = %dst, attrs = ?attrs, "add edge attrs");
        for (key, value) in attrs {
            host.set_edge_attr(&src, &dst, key, value)?;
        }
    }

    Ok(())
}

fn bound<'m, K: Ord + fmt::Display>(
    map: &'m BTreeMap<K, NodeName>,
    key: &K,
) -> Result<&'m NodeName, RewriteError> {
    map.get(key)
        .ok_or_else(|| RewriteError::UnboundNode(key.to_string()))
}

/// First unused name in the sequence `base`, `base_1`, `base_2`, ...
fn fresh_node_name(graph: &AttributedGraph<NodeName>, base: &str) -> NodeName {
    let mut candidate = NodeName::new(base);
    let mut suffix = 0_u32;
    while graph.has_node(&candidate) {
        suffix += 1;
        candidate = NodeName::new(format!("{base}_{suffix}"));
    }
    candidate
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::value::AttrValue;

    fn n(name: &str) -> NodeName {
        NodeName::new(name)
    }

    fn attrs(entries: &[(&str, i64)]) -> AttrMap {
        entries
            .iter()
            .map(|(key, v)| ((*key).to_owned(), AttrValue::Int(*v)))
            .collect()
    }

    #[test]
    fn clone_copies_attrs_and_incident_edges() {
        let mut g = AttributedGraph::from_parts(
            [
                ("a", attrs(&[("x", 1)])),
                ("b", AttrMap::new()),
                ("c", AttrMap::new()),
            ],
            [
                ("b", "a", attrs(&[("w", 2)])),
                ("a", "c", attrs(&[("w", 3)])),
            ],
        );
        let clone = clone_node(&mut g, &n("a")).unwrap();
        assert_eq!(clone, n("a_1"));
        assert_eq!(g.node(&clone), Some(&attrs(&[("x", 1)])));
        assert_eq!(g.edge(&n("b"), &clone), Some(&attrs(&[("w", 2)])));
        assert_eq!(g.edge(&clone, &n("c")), Some(&attrs(&[("w", 3)])));
        // Original untouched.
        assert_eq!(g.edge(&n("b"), &n("a")), Some(&attrs(&[("w", 2)])));
    }

    #[test]
    fn clone_of_self_loop_cross_links_original_and_clone() {
        let mut g = AttributedGraph::from_parts([("a", AttrMap::new())], []);
        g.add_edge_with(n("a"), n("a"), attrs(&[("w", 5)])).unwrap();
        let clone = clone_node(&mut g, &n("a")).unwrap();
        // Both cross-links carry the loop's attributes; the clone must not
        // get a self-loop of its own.
        assert_eq!(g.edge(&n("a"), &clone), Some(&attrs(&[("w", 5)])));
        assert_eq!(g.edge(&clone, &n("a")), Some(&attrs(&[("w", 5)])));
        assert!(!g.has_edge(&clone, &clone));
        assert_eq!(g.edge(&n("a"), &n("a")), Some(&attrs(&[("w", 5)])));
        assert_eq!(g.edge_count(), 3);
    }

    #[test]
    fn clone_names_avoid_collisions() {
        let mut g = AttributedGraph::from_parts(
            [("a", AttrMap::new()), ("a_1", AttrMap::new())],
            [],
        );
        let clone = clone_node(&mut g, &n("a")).unwrap();
        assert_eq!(clone, n("a_2"));
    }

    #[test]
    fn merge_folds_attrs_and_rewires_neighbors() {
        let mut g = AttributedGraph::from_parts(
            [
                ("a", attrs(&[("x", 1)])),
                ("b", attrs(&[("x", 2), ("y", 3)])),
                ("in", AttrMap::new()),
                ("out", AttrMap::new()),
            ],
            [
                ("in", "a", attrs(&[("w", 1)])),
                ("in", "b", attrs(&[("w", 2)])),
                ("a", "out", AttrMap::new()),
            ],
        );
        let merged = merge_nodes(
            &mut g,
            &BTreeSet::from([n("a"), n("b")]),
            MergePolicy::ChooseLast,
        )
        .unwrap();
        assert_eq!(merged, n("a&b"));
        // b's value wins on the shared key; y passes through.
        assert_eq!(g.node(&merged), Some(&attrs(&[("x", 2), ("y", 3)])));
        // One edge per distinct external neighbor, parallel attrs folded.
        assert_eq!(g.edge(&n("in"), &merged), Some(&attrs(&[("w", 2)])));
        assert!(g.has_edge(&merged, &n("out")));
        assert_eq!(g.edge_count(), 2);
        assert!(!g.has_node(&n("a")));
        assert!(!g.has_node(&n("b")));
    }

    #[test]
    fn merge_of_connected_nodes_makes_a_self_loop() {
        let mut g = AttributedGraph::from_parts(
            [("a", AttrMap::new()), ("b", AttrMap::new())],
            [("a", "b", attrs(&[("w", 7)]))],
        );
        let merged = merge_nodes(
            &mut g,
            &BTreeSet::from([n("a"), n("b")]),
            MergePolicy::ChooseLast,
        )
        .unwrap();
        assert_eq!(g.edge(&merged, &merged), Some(&attrs(&[("w", 7)])));
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn merge_edge_cases() {
        let mut g = AttributedGraph::from_parts([("a", attrs(&[("x", 1)]))], []);
        assert_eq!(
            merge_nodes(&mut g, &BTreeSet::new(), MergePolicy::ChooseLast),
            Err(RewriteError::MergeTooFew)
        );
        // Singleton merges are a no-op.
        let before = g.canonical_hash();
        assert_eq!(
            merge_nodes(&mut g, &BTreeSet::from([n("a")]), MergePolicy::ChooseLast),
            Ok(n("a"))
        );
        assert_eq!(g.canonical_hash(), before);
        assert!(matches!(
            merge_nodes(
                &mut g,
                &BTreeSet::from([n("a"), n("ghost")]),
                MergePolicy::ChooseLast
            ),
            Err(RewriteError::Graph(GraphError::NoSuchNode(_)))
        ));
    }

    #[test]
    fn merge_union_collects_conflicting_values() {
        let mut g = AttributedGraph::from_parts(
            [("a", attrs(&[("v", 1)])), ("b", attrs(&[("v", 2)]))],
            [],
        );
        let merged =
            merge_nodes(&mut g, &BTreeSet::from([n("a"), n("b")]), MergePolicy::Union).unwrap();
        assert_eq!(
            g.node(&merged).and_then(|m| m.get("v")),
            Some(&AttrValue::List(vec![AttrValue::Int(1), AttrValue::Int(2)]))
        );
    }

    #[test]
    fn fresh_names_count_upward() {
        let g = AttributedGraph::from_parts(
            [("n", AttrMap::new()), ("n_1", AttrMap::new())],
            [],
        );
        assert_eq!(fresh_node_name(&g, "n"), n("n_2"));
        assert_eq!(fresh_node_name(&g, "m"), n("m"));
    }
}

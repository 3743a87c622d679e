// SPDX-License-Identifier: Apache-2.0
//! Constrained subgraph-isomorphism search.
//!
//! The matcher enumerates occurrences of a [`Pattern`] inside a host graph:
//! per-pattern-node candidate pruning, a lazy walk over the Cartesian
//! product of candidate sets, injectivity and per-edge constraint checks,
//! and deduplication of assignments that collapse to the same visible
//! mapping once anonymous nodes are stripped.
//!
//! Subgraph isomorphism is NP-hard in general; the pruning steps keep the
//! common cases tractable but the worst case stays exponential.
use std::collections::BTreeMap;

use rustc_hash::FxHashSet;

use crate::graph::AttributedGraph;
use crate::ident::NodeName;
use crate::matching::Match;
use crate::pattern::{constraints_satisfied, ConstraintMap, Pattern};

/// Finds all occurrences of `pattern` in `host` for which `condition` holds.
///
/// The returned iterator is lazy, finite and deduplicated: two assignments
/// that produce the same visible mapping are yielded once. No ordering is
/// part of the contract, but the traversal is deterministic for identical
/// inputs.
///
/// The condition is evaluated against the unfiltered match, anonymous
/// bindings included; yielded matches carry only the visible contract. The
/// host graph must not be mutated while the iterator is in flight — the
/// rewrite driver enumerates against a snapshot, or re-queries after every
/// single rewrite.
pub fn find_matches<'g, F>(
    host: &'g AttributedGraph<NodeName>,
    pattern: &'g Pattern,
    condition: F,
) -> Matches<'g, F>
where
    F: Fn(&Match) -> bool,
{
    Matches::new(host, pattern, condition)
}

/// Lazy iterator over the matches of one pattern in one host graph.
pub struct Matches<'g, F> {
    host: &'g AttributedGraph<NodeName>,
    pattern: &'g Pattern,
    /// Pattern nodes in a fixed order; `cursor` indexes `candidates`
    /// position-wise against this order.
    order: Vec<NodeName>,
    /// Per-pattern-node candidate host nodes, pruned by attributes and
    /// adjacent-edge constraints.
    candidates: Vec<Vec<NodeName>>,
    /// Mixed-radix odometer over the candidate lists.
    cursor: Vec<usize>,
    exhausted: bool,
    /// Visible mappings already yielded.
    seen: FxHashSet<BTreeMap<NodeName, NodeName>>,
    condition: F,
}

impl<'g, F: Fn(&Match) -> bool> Matches<'g, F> {
    fn new(host: &'g AttributedGraph<NodeName>, pattern: &'g Pattern, condition: F) -> Self {
        let order: Vec<NodeName> = pattern.iter_nodes().map(|(name, _)| name.clone()).collect();
        let candidates: Vec<Vec<NodeName>> = order
            .iter()
            .map(|pattern_node| node_candidates(host, pattern, pattern_node))
            .collect();
        // A pattern node with no candidates rules out every assignment. An
        // empty pattern keeps the degenerate single (empty) assignment.
        let exhausted = candidates.iter().any(Vec::is_empty);
        let cursor = vec![0; order.len()];
        Self {
            host,
            pattern,
            order,
            candidates,
            cursor,
            exhausted,
            seen: FxHashSet::default(),
            condition,
        }
    }

    /// Advances the odometer; flips `exhausted` once every assignment has
    /// been visited.
    fn advance(&mut self) {
        for (pos, digit) in self.cursor.iter_mut().enumerate().rev() {
            *digit += 1;
            if *digit < self.candidates[pos].len() {
                return;
            }
            *digit = 0;
        }
        self.exhausted = true;
    }

    /// Checks one assignment: injectivity, per-edge constraints, and the
    /// induced-edge-count guard.
    fn assignment_mapping(&self) -> Option<BTreeMap<NodeName, NodeName>> {
        let mut mapping = BTreeMap::new();
        let mut assigned: FxHashSet<&NodeName> = FxHashSet::default();
        for (pos, pattern_node) in self.order.iter().enumerate() {
            let host_node = &self.candidates[pos][self.cursor[pos]];
            // The mapping must be injective.
            if !assigned.insert(host_node) {
                return None;
            }
            mapping.insert(pattern_node.clone(), host_node.clone());
        }

        let mut used_host_edges: FxHashSet<(&NodeName, &NodeName)> = FxHashSet::default();
        for ((pattern_src, pattern_dst), constraints) in self.pattern.iter_edges() {
            let host_src = mapping.get(pattern_src)?;
            let host_dst = mapping.get(pattern_dst)?;
            let attrs = self.host.edge(host_src, host_dst)?;
            if !constraints_satisfied(constraints, attrs) {
                return None;
            }
            used_host_edges.insert((host_src, host_dst));
        }
        // Same edge count as the pattern: guards against assignments where
        // two pattern edges collapse onto one host edge.
        if used_host_edges.len() != self.pattern.edge_count() {
            return None;
        }
        Some(mapping)
    }
}

impl<F: Fn(&Match) -> bool> Iterator for Matches<'_, F> {
    type Item = Match;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.exhausted {
            let mapping = self.assignment_mapping();
            self.advance();
            let Some(mapping) = mapping else { continue };

            let unfiltered = Match::unfiltered_from_mapping(self.pattern, mapping.clone());
            if !(self.condition)(&unfiltered) {
                continue;
            }
            let filtered = Match::from_mapping(self.pattern, mapping);
            // Stripping anonymous bindings can collapse distinct
            // assignments; yield each visible mapping once.
            if !self.seen.insert(filtered.mapping().clone()) {
                continue;
            }
            return Some(filtered);
        }
        None
    }
}

/// Candidate host nodes for one pattern node: the pinned singleton if any,
/// otherwise every host node, filtered by the node's attribute constraints
/// and then by adjacent-edge constraints.
fn node_candidates(
    host: &AttributedGraph<NodeName>,
    pattern: &Pattern,
    pattern_node: &NodeName,
) -> Vec<NodeName> {
    let constraints = pattern.node_constraints(pattern_node);
    let by_attrs: Vec<NodeName> = match pattern.pinned(pattern_node) {
        Some(pinned) => host
            .node(pinned)
            .filter(|attrs| constraints.map_or(true, |c| constraints_satisfied(c, attrs)))
            .map(|_| vec![pinned.clone()])
            .unwrap_or_default(),
        None => host
            .iter_nodes()
            .filter(|(_, attrs)| constraints.map_or(true, |c| constraints_satisfied(c, attrs)))
            .map(|(name, _)| name.clone())
            .collect(),
    };
    prune_by_adjacent_edges(host, pattern, pattern_node, by_attrs)
}

/// Keeps a candidate only if, for each constrained outgoing pattern edge of
/// `pattern_node`, it still has an unused outgoing host edge satisfying the
/// edge's constraints. Greedy per pattern edge — a pruning heuristic, not a
/// bipartite matching; the assignment search re-validates every edge.
fn prune_by_adjacent_edges(
    host: &AttributedGraph<NodeName>,
    pattern: &Pattern,
    pattern_node: &NodeName,
    candidates: Vec<NodeName>,
) -> Vec<NodeName> {
    let constrained: Vec<&ConstraintMap> = pattern
        .iter_edges()
        .filter(|((src, _), constraints)| src == pattern_node && !constraints.is_empty())
        .map(|(_, constraints)| constraints)
        .collect();
    if constrained.is_empty() {
        return candidates;
    }

    candidates
        .into_iter()
        .filter(|candidate| {
            let mut unused: Vec<(&NodeName, &NodeName)> = host.out_edges(candidate).collect();
            constrained.iter().all(|constraints| {
                let found = unused.iter().position(|(src, dst)| {
                    host.edge(src, dst)
                        .is_some_and(|attrs| constraints_satisfied(constraints, attrs))
                });
                match found {
                    Some(pos) => {
                        unused.swap_remove(pos);
                        true
                    }
                    None => false,
                }
            })
        })
        .collect()
}

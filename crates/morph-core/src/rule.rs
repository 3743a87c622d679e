// SPDX-License-Identifier: Apache-2.0
//! Rewrite rules: LHS ← P → RHS spans and the operation sets derived
//! from them.
//!
//! A rule is defined by up to three graphs. The LHS is the pattern side
//! and is keyed by [`NodeName`]. The interface graph P declares what
//! survives, keyed by [`PNodeId`] so the P→LHS homomorphism is carried by
//! the identifiers themselves. The replacement graph RHS declares what the
//! result looks like, keyed by [`RhsNodeId`] whose `merged_from` list is
//! the P→RHS homomorphism. Omitted P and RHS graphs default to identity,
//! which makes the rule a pure pattern query.
//!
//! Construction validates both homomorphisms up front; the executor then
//! consumes the `*_to_*` operation sets without re-checking them.
use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::graph::AttributedGraph;
use crate::ident::{NodeName, PNodeId, RhsNodeId};
use crate::value::{AttrMap, AttrValue};

/// Conflict handler for one attribute key present on both sides of a merge.
pub type MergeFn = fn(AttrValue, AttrValue) -> AttrValue;

/// Policy for combining attribute maps when nodes or edges are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// On conflict, the later value wins.
    ChooseLast,
    /// On conflict, both values are collected into an [`AttrValue::List`].
    /// Repeated merges flatten into one list rather than nesting.
    Union,
    /// On conflict, a user-supplied function combines the two values.
    Custom(MergeFn),
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::ChooseLast
    }
}

impl MergePolicy {
    /// Combines two values bound to the same key.
    #[must_use]
    pub fn combine(&self, first: AttrValue, second: AttrValue) -> AttrValue {
        match self {
            Self::ChooseLast => second,
            Self::Union => {
                let mut items = match first {
                    AttrValue::List(items) => items,
                    other => vec![other],
                };
                match second {
                    AttrValue::List(mut more) => items.append(&mut more),
                    other => items.push(other),
                }
                AttrValue::List(items)
            }
            Self::Custom(combine) => combine(first, second),
        }
    }

    /// Merges two attribute maps. Keys on one side pass through; keys on
    /// both sides go through [`MergePolicy::combine`].
    #[must_use]
    pub fn merge_maps(&self, first: AttrMap, mut second: AttrMap) -> AttrMap {
        let mut merged = AttrMap::new();
        for (key, value) in first {
            match second.remove(&key) {
                Some(other) => {
                    merged.insert(key, self.combine(value, other));
                }
                None => {
                    merged.insert(key, value);
                }
            }
        }
        merged.extend(second);
        merged
    }
}

/// Errors raised when a rule's homomorphisms do not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// A clone P node names an origin that is not an LHS node.
    #[error("node {p_node} clones a non-existing node {origin}")]
    CloneOfUnknownNode {
        /// The offending P node.
        p_node: String,
        /// The origin it claims to clone.
        origin: String,
    },
    /// A P node's origin is not an LHS node.
    #[error("node {0} in P does not exist in LHS")]
    PNodeNotInLhs(String),
    /// A P edge has no counterpart edge between its origins in the LHS.
    #[error("edge ({0}, {1}) in P does not exist in LHS")]
    PEdgeNotInLhs(String, String),
    /// An RHS node merges a P node that is not part of the interface graph.
    #[error("node {rhs_node} merges a non-existing P node {p_node}")]
    RhsRefsUnknownPNode {
        /// The offending RHS node.
        rhs_node: String,
        /// The unknown P node it references.
        p_node: String,
    },
    /// Two RHS nodes claim the same P node; the P→RHS map must be a
    /// function.
    #[error("node {p_node} in P is mapped into both {first} and {second} in RHS")]
    DuplicatePOrigin {
        /// The doubly claimed P node.
        p_node: String,
        /// First claiming RHS node.
        first: String,
        /// Second claiming RHS node.
        second: String,
    },
    /// A P node neither survives into the RHS nor merges into an RHS node.
    #[error("node {0} in P does not exist in RHS, nor merges into an RHS node")]
    PNodeUnmappedInRhs(String),
    /// A P node mentions attributes its LHS origin does not have.
    #[error("P node {0} cannot add attributes")]
    PNodeAddsAttrs(String),
    /// A P edge mentions attributes its LHS counterpart does not have.
    #[error("P edge ({0}, {1}) cannot add attributes")]
    PEdgeAddsAttrs(String, String),
    /// An RHS node drops attributes a preserved P node carries.
    #[error("RHS node {0} cannot remove attributes")]
    RhsNodeRemovesAttrs(String),
    /// An RHS edge drops attributes a preserved P edge carries.
    #[error("RHS edge ({0}, {1}) cannot remove attributes")]
    RhsEdgeRemovesAttrs(String, String),
    /// A P node of a cloned LHS node mentions attributes. Clones copy all
    /// attributes implicitly.
    #[error("cloned node {0} in P should not explicitly mention attributes")]
    ClonedNodeHasAttrs(String),
    /// A P edge incident to a clone mentions attributes.
    #[error("cloned edge ({0}, {1}) in P should not explicitly mention attributes")]
    ClonedEdgeHasAttrs(String, String),
}

/// A validated rewrite rule.
#[derive(Debug, Clone)]
pub struct Rule {
    lhs: AttributedGraph<NodeName>,
    p: AttributedGraph<PNodeId>,
    rhs: AttributedGraph<RhsNodeId>,
    merge_policy: MergePolicy,
    /// LHS node → the set of P nodes that preserve or clone it.
    rev_p_lhs: BTreeMap<NodeName, BTreeSet<PNodeId>>,
    /// RHS node → the set of P nodes that survive or merge into it.
    rev_p_rhs: BTreeMap<RhsNodeId, BTreeSet<PNodeId>>,
}

impl Rule {
    /// Builds and validates a rule.
    ///
    /// A missing P defaults to the identity over `lhs` (everything is
    /// preserved); a missing RHS defaults to the identity over P (nothing
    /// is added or merged).
    ///
    /// # Errors
    ///
    /// Any [`RuleError`] variant, when a homomorphism is not total, not a
    /// function, or adds/removes attributes where the span forbids it.
    pub fn new(
        lhs: AttributedGraph<NodeName>,
        p: Option<AttributedGraph<PNodeId>>,
        rhs: Option<AttributedGraph<RhsNodeId>>,
        merge_policy: MergePolicy,
    ) -> Result<Self, RuleError> {
        let p = p.unwrap_or_else(|| identity_p(&lhs));
        let rhs = rhs.unwrap_or_else(|| identity_rhs(&p));

        let rev_p_lhs = build_rev_p_lhs(&lhs, &p)?;
        let rev_p_rhs = build_rev_p_rhs(&p, &rhs)?;

        let rule = Self {
            lhs,
            p,
            rhs,
            merge_policy,
            rev_p_lhs,
            rev_p_rhs,
        };
        rule.validate_lhs_p()?;
        rule.validate_rhs_p()?;
        rule.validate_clones()?;
        Ok(rule)
    }

    /// The pattern-side graph.
    #[must_use]
    pub fn lhs(&self) -> &AttributedGraph<NodeName> {
        &self.lhs
    }

    /// The interface graph.
    #[must_use]
    pub fn p(&self) -> &AttributedGraph<PNodeId> {
        &self.p
    }

    /// The replacement graph.
    #[must_use]
    pub fn rhs(&self) -> &AttributedGraph<RhsNodeId> {
        &self.rhs
    }

    /// The merge policy applied by this rule.
    #[must_use]
    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    pub(crate) fn rev_p_lhs(&self) -> &BTreeMap<NodeName, BTreeSet<PNodeId>> {
        &self.rev_p_lhs
    }

    pub(crate) fn rev_p_rhs(&self) -> &BTreeMap<RhsNodeId, BTreeSet<PNodeId>> {
        &self.rev_p_rhs
    }

    // The operation sets below are listed in the order the executor applies
    // them.

    /// LHS nodes cloned by this rule, with their full P preimage sets. A
    /// node counts as cloned once two or more P nodes map to it; the reused
    /// original, if any, is part of the set.
    #[must_use]
    pub fn nodes_to_clone(&self) -> BTreeMap<NodeName, BTreeSet<PNodeId>> {
        self.rev_p_lhs
            .iter()
            .filter(|(_, preimage)| preimage.len() > 1)
            .map(|(lhs_node, preimage)| (lhs_node.clone(), preimage.clone()))
            .collect()
    }

    /// LHS nodes with no P preimage. They are removed along with their
    /// incident edges.
    #[must_use]
    pub fn nodes_to_remove(&self) -> BTreeSet<NodeName> {
        self.lhs
            .iter_nodes()
            .filter(|(name, _)| {
                self.rev_p_lhs
                    .get(name)
                    .map_or(true, BTreeSet::is_empty)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// P node pairs whose LHS counterpart edge exists but which are absent
    /// from P. Edges with a removed endpoint are excluded; node removal
    /// already cascades over them.
    #[must_use]
    pub fn edges_to_remove(&self) -> BTreeSet<(PNodeId, PNodeId)> {
        let removed = self.nodes_to_remove();
        let mut edges = BTreeSet::new();
        for ((src, dst), _) in self.lhs.iter_edges() {
            if removed.contains(src) || removed.contains(dst) {
                continue;
            }
            for src_copy in self.preimage(src) {
                for dst_copy in self.preimage(dst) {
                    if !self.p.has_edge(src_copy, dst_copy) {
                        edges.insert((src_copy.clone(), dst_copy.clone()));
                    }
                }
            }
        }
        edges
    }

    /// Per P node, the attribute keys its LHS origin carries but P drops.
    /// Cloned nodes are exempt: clones copy all attributes implicitly.
    #[must_use]
    pub fn node_attrs_to_remove(&self) -> BTreeMap<PNodeId, BTreeSet<String>> {
        let cloned = self.nodes_to_clone();
        let mut removals = BTreeMap::new();
        for (lhs_node, lhs_attrs) in self.lhs.iter_nodes() {
            if cloned.contains_key(lhs_node) {
                continue;
            }
            for p_node in self.preimage(lhs_node) {
                let Some(p_attrs) = self.p.node(p_node) else {
                    continue;
                };
                let dropped: BTreeSet<String> =
                    map_difference(lhs_attrs, p_attrs).into_keys().collect();
                if !dropped.is_empty() {
                    removals.insert(p_node.clone(), dropped);
                }
            }
        }
        removals
    }

    /// Per P edge, the attribute keys its LHS counterpart carries but P
    /// drops. Edges incident to a clone are exempt, like the cloned nodes
    /// themselves.
    #[must_use]
    pub fn edge_attrs_to_remove(&self) -> BTreeMap<(PNodeId, PNodeId), BTreeSet<String>> {
        let cloned = self.nodes_to_clone();
        let mut removals = BTreeMap::new();
        for ((src, dst), lhs_attrs) in self.lhs.iter_edges() {
            if cloned.contains_key(src) || cloned.contains_key(dst) {
                continue;
            }
            for src_copy in self.preimage(src) {
                for dst_copy in self.preimage(dst) {
                    let Some(p_attrs) = self.p.edge(src_copy, dst_copy) else {
                        continue;
                    };
                    let dropped: BTreeSet<String> =
                        map_difference(lhs_attrs, p_attrs).into_keys().collect();
                    if !dropped.is_empty() {
                        removals.insert((src_copy.clone(), dst_copy.clone()), dropped);
                    }
                }
            }
        }
        removals
    }

    /// RHS nodes that merge two or more P nodes, with their preimage sets.
    #[must_use]
    pub fn nodes_to_merge(&self) -> BTreeMap<RhsNodeId, BTreeSet<PNodeId>> {
        self.rev_p_rhs
            .iter()
            .filter(|(_, preimage)| preimage.len() > 1)
            .map(|(rhs_node, preimage)| (rhs_node.clone(), preimage.clone()))
            .collect()
    }

    /// RHS nodes with no P preimage; they are created from scratch.
    #[must_use]
    pub fn nodes_to_add(&self) -> BTreeSet<RhsNodeId> {
        self.rhs
            .iter_nodes()
            .filter(|(name, _)| name.merged_from.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// RHS edges with no P counterpart: edges touching an added node, and
    /// edges between surviving nodes none of whose origin pairs are
    /// connected in P. Edges a merge produces by itself are excluded.
    #[must_use]
    pub fn edges_to_add(&self) -> BTreeSet<(RhsNodeId, RhsNodeId)> {
        let added = self.nodes_to_add();
        let mut edges = BTreeSet::new();
        for ((src, dst), _) in self.rhs.iter_edges() {
            if added.contains(src) || added.contains(dst) {
                edges.insert((src.clone(), dst.clone()));
            } else if !self.origin_pair_in_p(src, dst) {
                edges.insert((src.clone(), dst.clone()));
            }
        }
        edges
    }

    /// Per RHS node, the attributes to set after the restrictive phase:
    /// the full attribute map for added nodes, and for surviving nodes the
    /// attributes the RHS introduces or overrides relative to P, folded
    /// over the preimage set with the merge policy.
    #[must_use]
    pub fn node_attrs_to_add(&self) -> BTreeMap<RhsNodeId, AttrMap> {
        let added = self.nodes_to_add();
        let mut additions = BTreeMap::new();
        for (rhs_node, rhs_attrs) in self.rhs.iter_nodes() {
            let attrs = if added.contains(rhs_node) {
                rhs_attrs.clone()
            } else {
                let mut folded = AttrMap::new();
                for p_origin in self.rhs_preimage(rhs_node) {
                    let Some(p_attrs) = self.p.node(p_origin) else {
                        continue;
                    };
                    let fresh = map_difference(rhs_attrs, p_attrs);
                    folded = self.merge_policy.merge_maps(folded, fresh);
                }
                folded
            };
            if !attrs.is_empty() {
                additions.insert(rhs_node.clone(), attrs);
            }
        }
        additions
    }

    /// Per RHS edge, the attributes to set after the restrictive phase.
    /// Edges without any P counterpart take their RHS attributes wholesale;
    /// surviving edges take the RHS-introduced differences, folded over the
    /// origin pairs with the merge policy.
    #[must_use]
    pub fn edge_attrs_to_add(&self) -> BTreeMap<(RhsNodeId, RhsNodeId), AttrMap> {
        let added = self.nodes_to_add();
        let mut additions = BTreeMap::new();
        for ((src, dst), rhs_attrs) in self.rhs.iter_edges() {
            let fresh_edge = added.contains(src)
                || added.contains(dst)
                || !self.origin_pair_in_p(src, dst);
            let attrs = if fresh_edge {
                rhs_attrs.clone()
            } else {
                let mut folded = AttrMap::new();
                for src_origin in self.rhs_preimage(src) {
                    for dst_origin in self.rhs_preimage(dst) {
                        let Some(p_attrs) = self.p.edge(src_origin, dst_origin) else {
                            continue;
                        };
                        let fresh = map_difference(rhs_attrs, p_attrs);
                        folded = self.merge_policy.merge_maps(folded, fresh);
                    }
                }
                folded
            };
            if !attrs.is_empty() {
                additions.insert((src.clone(), dst.clone()), attrs);
            }
        }
        additions
    }

    fn preimage(&self, lhs_node: &NodeName) -> impl Iterator<Item = &PNodeId> {
        self.rev_p_lhs.get(lhs_node).into_iter().flatten()
    }

    fn rhs_preimage(&self, rhs_node: &RhsNodeId) -> impl Iterator<Item = &PNodeId> {
        self.rev_p_rhs.get(rhs_node).into_iter().flatten()
    }

    /// Returns `true` if some origin pair of the RHS edge is connected in P.
    fn origin_pair_in_p(&self, src: &RhsNodeId, dst: &RhsNodeId) -> bool {
        self.rhs_preimage(src).any(|src_origin| {
            self.rhs_preimage(dst)
                .any(|dst_origin| self.p.has_edge(src_origin, dst_origin))
        })
    }

    /// P must not add attributes, and every P edge needs an LHS
    /// counterpart.
    fn validate_lhs_p(&self) -> Result<(), RuleError> {
        for (p_node, p_attrs) in self.p.iter_nodes() {
            let Some(lhs_attrs) = self.lhs.node(&p_node.origin) else {
                continue;
            };
            if !keys_subset(p_attrs, lhs_attrs) {
                return Err(RuleError::PNodeAddsAttrs(p_node.to_string()));
            }
        }
        for ((src, dst), p_attrs) in self.p.iter_edges() {
            let Some(lhs_attrs) = self.lhs.edge(&src.origin, &dst.origin) else {
                return Err(RuleError::PEdgeNotInLhs(src.to_string(), dst.to_string()));
            };
            if !keys_subset(p_attrs, lhs_attrs) {
                return Err(RuleError::PEdgeAddsAttrs(src.to_string(), dst.to_string()));
            }
        }
        Ok(())
    }

    /// RHS must not remove attributes a preserved P node or edge carries.
    /// Merge nodes and their edges are exempt; the merge combines
    /// attributes itself.
    fn validate_rhs_p(&self) -> Result<(), RuleError> {
        let merges = self.nodes_to_merge();
        for (rhs_node, rhs_attrs) in self.rhs.iter_nodes() {
            if merges.contains_key(rhs_node) {
                continue;
            }
            for p_origin in self.rhs_preimage(rhs_node) {
                let Some(p_attrs) = self.p.node(p_origin) else {
                    continue;
                };
                if !keys_subset(p_attrs, rhs_attrs) {
                    return Err(RuleError::RhsNodeRemovesAttrs(rhs_node.to_string()));
                }
            }
        }
        for ((src, dst), rhs_attrs) in self.rhs.iter_edges() {
            if merges.contains_key(src) || merges.contains_key(dst) {
                continue;
            }
            for src_origin in self.rhs_preimage(src) {
                for dst_origin in self.rhs_preimage(dst) {
                    let Some(p_attrs) = self.p.edge(src_origin, dst_origin) else {
                        continue;
                    };
                    if !keys_subset(p_attrs, rhs_attrs) {
                        return Err(RuleError::RhsEdgeRemovesAttrs(
                            src.to_string(),
                            dst.to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Cloned nodes and their incident P edges must not mention attributes;
    /// cloning copies everything implicitly.
    fn validate_clones(&self) -> Result<(), RuleError> {
        let clones: BTreeSet<PNodeId> =
            self.nodes_to_clone().into_values().flatten().collect();
        for clone in &clones {
            if self.p.node(clone).is_some_and(|attrs| !attrs.is_empty()) {
                return Err(RuleError::ClonedNodeHasAttrs(clone.to_string()));
            }
        }
        for ((src, dst), attrs) in self.p.iter_edges() {
            if (clones.contains(src) || clones.contains(dst)) && !attrs.is_empty() {
                return Err(RuleError::ClonedEdgeHasAttrs(src.to_string(), dst.to_string()));
            }
        }
        Ok(())
    }
}

/// Identity interface graph: every LHS node and edge is preserved as-is.
fn identity_p(lhs: &AttributedGraph<NodeName>) -> AttributedGraph<PNodeId> {
    let mut p = AttributedGraph::new();
    for (name, attrs) in lhs.iter_nodes() {
        p.add_node_with(PNodeId::preserve(name.clone()), attrs.clone());
    }
    for ((src, dst), attrs) in lhs.iter_edges() {
        let inserted = p.add_edge_with(
            PNodeId::preserve(src.clone()),
            PNodeId::preserve(dst.clone()),
            attrs.clone(),
        );
        debug_assert!(inserted.is_ok(), "identity P mirrors LHS endpoints");
    }
    p
}

/// Identity replacement graph: every P node and edge survives unchanged.
fn identity_rhs(p: &AttributedGraph<PNodeId>) -> AttributedGraph<RhsNodeId> {
    let mut rhs = AttributedGraph::new();
    for (p_node, attrs) in p.iter_nodes() {
        rhs.add_node_with(RhsNodeId::preserve(p_node.clone()), attrs.clone());
    }
    for ((src, dst), attrs) in p.iter_edges() {
        let inserted = rhs.add_edge_with(
            RhsNodeId::preserve(src.clone()),
            RhsNodeId::preserve(dst.clone()),
            attrs.clone(),
        );
        debug_assert!(inserted.is_ok(), "identity RHS mirrors P endpoints");
    }
    rhs
}

fn build_rev_p_lhs(
    lhs: &AttributedGraph<NodeName>,
    p: &AttributedGraph<PNodeId>,
) -> Result<BTreeMap<NodeName, BTreeSet<PNodeId>>, RuleError> {
    let mut rev: BTreeMap<NodeName, BTreeSet<PNodeId>> = BTreeMap::new();
    for (name, _) in lhs.iter_nodes() {
        rev.entry(name.clone()).or_default();
    }
    for (p_node, _) in p.iter_nodes() {
        if !lhs.has_node(&p_node.origin) {
            return Err(if p_node.is_clone() {
                RuleError::CloneOfUnknownNode {
                    p_node: p_node.to_string(),
                    origin: p_node.origin.to_string(),
                }
            } else {
                RuleError::PNodeNotInLhs(p_node.to_string())
            });
        }
        rev.entry(p_node.origin.clone())
            .or_default()
            .insert(p_node.clone());
    }
    Ok(rev)
}

fn build_rev_p_rhs(
    p: &AttributedGraph<PNodeId>,
    rhs: &AttributedGraph<RhsNodeId>,
) -> Result<BTreeMap<RhsNodeId, BTreeSet<PNodeId>>, RuleError> {
    let mut rev: BTreeMap<RhsNodeId, BTreeSet<PNodeId>> = BTreeMap::new();
    let mut claimed: BTreeMap<PNodeId, RhsNodeId> = BTreeMap::new();
    for (rhs_node, _) in rhs.iter_nodes() {
        let preimage = rev.entry(rhs_node.clone()).or_default();
        for p_node in &rhs_node.merged_from {
            if !p.has_node(p_node) {
                return Err(RuleError::RhsRefsUnknownPNode {
                    rhs_node: rhs_node.to_string(),
                    p_node: p_node.to_string(),
                });
            }
            if let Some(first) = claimed.insert(p_node.clone(), rhs_node.clone()) {
                return Err(RuleError::DuplicatePOrigin {
                    p_node: p_node.to_string(),
                    first: first.to_string(),
                    second: rhs_node.to_string(),
                });
            }
            preimage.insert(p_node.clone());
        }
    }
    for (p_node, _) in p.iter_nodes() {
        if !claimed.contains_key(p_node) {
            return Err(RuleError::PNodeUnmappedInRhs(p_node.to_string()));
        }
    }
    Ok(rev)
}

/// Entries of `target` whose key is absent from `other` or bound to a
/// different value there.
fn map_difference(target: &AttrMap, other: &AttrMap) -> AttrMap {
    target
        .iter()
        .filter(|(key, value)| other.get(*key) != Some(value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn keys_subset(inner: &AttrMap, outer: &AttrMap) -> bool {
    inner.keys().all(|key| outer.contains_key(key))
}

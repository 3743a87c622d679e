// SPDX-License-Identifier: Apache-2.0
//! Match objects: one concrete occurrence of a pattern in a host graph.
use std::collections::BTreeMap;

use thiserror::Error;

use crate::graph::AttributedGraph;
use crate::ident::NodeName;
use crate::pattern::Pattern;
use crate::value::AttrMap;

/// Errors raised by symbol lookups on a [`Match`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    /// The symbol is not part of the pattern's visible contract.
    #[error("symbol {0} does not exist in the pattern")]
    UnknownSymbol(String),
    /// The bound node or edge no longer exists in the host graph, e.g. it
    /// was removed by a rewrite applied after this match was produced.
    #[error("binding of {0} no longer exists in the host graph")]
    StaleBinding(String),
}

/// One binding of pattern symbols to host-graph nodes.
///
/// A match does not borrow the host graph; lookups take it explicitly, so a
/// match produced against a snapshot stays usable while the live graph is
/// being rewritten. Bindings can go stale once the host mutates — lookups
/// then report [`MatchError::StaleBinding`].
///
/// The pattern→host mapping is injective; the matcher enforces that during
/// search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Pattern nodes visible to callers, in pattern order.
    nodes: Vec<NodeName>,
    /// Pattern edges visible to callers, in pattern order.
    edges: Vec<(NodeName, NodeName)>,
    /// Visible pattern-node → host-node bindings.
    mapping: BTreeMap<NodeName, NodeName>,
    /// All bindings, anonymous nodes included. Conditions are evaluated
    /// against these; the visible contract excludes them.
    full_mapping: BTreeMap<NodeName, NodeName>,
}

impl Match {
    /// Builds a match from a raw assignment, splitting the visible contract
    /// from the anonymous bindings.
    pub(crate) fn from_mapping(
        pattern: &Pattern,
        full_mapping: BTreeMap<NodeName, NodeName>,
    ) -> Self {
        let mapping: BTreeMap<NodeName, NodeName> = full_mapping
            .iter()
            .filter(|(sym, _)| !sym.is_anonymous())
            .map(|(sym, host)| (sym.clone(), host.clone()))
            .collect();
        let nodes = mapping.keys().cloned().collect();
        let edges = pattern
            .iter_edges()
            .filter(|((src, dst), _)| !src.is_anonymous() && !dst.is_anonymous())
            .map(|((src, dst), _)| (src.clone(), dst.clone()))
            .collect();
        Self {
            nodes,
            edges,
            mapping,
            full_mapping,
        }
    }

    /// Builds the unfiltered variant handed to user conditions: anonymous
    /// bindings stay part of the visible contract so a condition can inspect
    /// them. Never yielded to callers.
    pub(crate) fn unfiltered_from_mapping(
        pattern: &Pattern,
        full_mapping: BTreeMap<NodeName, NodeName>,
    ) -> Self {
        let nodes = full_mapping.keys().cloned().collect();
        let edges = pattern
            .iter_edges()
            .map(|((src, dst), _)| (src.clone(), dst.clone()))
            .collect();
        Self {
            nodes,
            edges,
            mapping: full_mapping.clone(),
            full_mapping,
        }
    }

    /// Visible pattern-node → host-node mapping.
    #[must_use]
    pub fn mapping(&self) -> &BTreeMap<NodeName, NodeName> {
        &self.mapping
    }

    /// All bindings including anonymous pattern nodes. The executor walks
    /// these so that anonymous LHS nodes are rewritten like any other.
    pub(crate) fn full_mapping(&self) -> &BTreeMap<NodeName, NodeName> {
        &self.full_mapping
    }

    /// Visible pattern nodes of this match.
    #[must_use]
    pub fn nodes(&self) -> &[NodeName] {
        &self.nodes
    }

    /// Visible pattern edges of this match.
    #[must_use]
    pub fn edges(&self) -> &[(NodeName, NodeName)] {
        &self.edges
    }

    /// Host node bound to a pattern symbol.
    ///
    /// # Errors
    ///
    /// [`MatchError::UnknownSymbol`] if the pattern does not bind `symbol`.
    pub fn host_node(&self, symbol: &str) -> Result<&NodeName, MatchError> {
        self.full_mapping
            .get(&NodeName::new(symbol))
            .ok_or_else(|| MatchError::UnknownSymbol(symbol.to_owned()))
    }

    /// Attribute map of the host node bound to a pattern symbol.
    ///
    /// # Errors
    ///
    /// [`MatchError::UnknownSymbol`] for a symbol outside the visible
    /// contract, [`MatchError::StaleBinding`] if the bound node has since
    /// been removed from `host`.
    pub fn node_attrs<'g>(
        &self,
        host: &'g AttributedGraph<NodeName>,
        symbol: &str,
    ) -> Result<&'g AttrMap, MatchError> {
        let sym = NodeName::new(symbol);
        if !self.nodes.contains(&sym) {
            return Err(MatchError::UnknownSymbol(symbol.to_owned()));
        }
        let bound = self
            .full_mapping
            .get(&sym)
            .ok_or_else(|| MatchError::UnknownSymbol(symbol.to_owned()))?;
        host.node(bound)
            .ok_or_else(|| MatchError::StaleBinding(symbol.to_owned()))
    }

    /// Attribute map of the host edge bound to a pattern edge.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`Match::node_attrs`].
    pub fn edge_attrs<'g>(
        &self,
        host: &'g AttributedGraph<NodeName>,
        src: &str,
        dst: &str,
    ) -> Result<&'g AttrMap, MatchError> {
        let key = (NodeName::new(src), NodeName::new(dst));
        if !self.edges.contains(&key) {
            return Err(MatchError::UnknownSymbol(edge_symbol(src, dst)));
        }
        let bound_src = self
            .full_mapping
            .get(&key.0)
            .ok_or_else(|| MatchError::UnknownSymbol(edge_symbol(src, dst)))?;
        let bound_dst = self
            .full_mapping
            .get(&key.1)
            .ok_or_else(|| MatchError::UnknownSymbol(edge_symbol(src, dst)))?;
        host.edge(bound_src, bound_dst)
            .ok_or_else(|| MatchError::StaleBinding(edge_symbol(src, dst)))
    }

    /// Indexed lookup by pattern symbol: `"a"` addresses a node, `"a->b"`
    /// an edge, following the edge-name convention of pattern text.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`Match::node_attrs`].
    pub fn get<'g>(
        &self,
        host: &'g AttributedGraph<NodeName>,
        symbol: &str,
    ) -> Result<&'g AttrMap, MatchError> {
        let mut parts = symbol.splitn(2, "->");
        match (parts.next(), parts.next()) {
            (Some(src), Some(dst)) => self.edge_attrs(host, src, dst),
            _ => self.node_attrs(host, symbol),
        }
    }
}

/// Edge-name convention shared with pattern text: `"src->dst"`.
fn edge_symbol(src: &str, dst: &str) -> String {
    format!("{src}->{dst}")
}

// SPDX-License-Identifier: Apache-2.0
//! Identifier types for host, P and RHS graphs.
//!
//! Host nodes are named by opaque strings. P and RHS nodes carry structured
//! identifiers that encode the rule homomorphisms directly, instead of the
//! `"X*k"` / `"A&B"` string conventions of pattern text; those conventions
//! survive only in the `Display` impls.
use std::fmt;

/// Reserved prefix marking anonymous pattern nodes.
///
/// Anonymous nodes participate in structural matching but are stripped from
/// the externally visible [`crate::Match`].
pub const ANON_PREFIX: char = '$';

/// Opaque name of a node in a host graph or a pattern.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeName(String);

impl NodeName {
    /// Wraps a string as a node name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the name carries the anonymous-node prefix.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.0.starts_with(ANON_PREFIX)
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for NodeName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Identifier of a node in a P (interface) graph.
///
/// The image under the P→LHS homomorphism is always `origin`. A node with a
/// `clone_index` is the k-th clone of its origin; a node without one reuses
/// the origin itself.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PNodeId {
    /// LHS node this P node preserves or clones.
    pub origin: NodeName,
    /// Clone ordinal, or `None` when the origin is reused as-is.
    pub clone_index: Option<u32>,
}

impl PNodeId {
    /// P node that preserves `origin` under the same identity.
    pub fn preserve(origin: impl Into<NodeName>) -> Self {
        Self {
            origin: origin.into(),
            clone_index: None,
        }
    }

    /// P node that is the `index`-th clone of `origin`.
    pub fn clone_of(origin: impl Into<NodeName>, index: u32) -> Self {
        Self {
            origin: origin.into(),
            clone_index: Some(index),
        }
    }

    /// Returns `true` if this P node is a clone rather than a reuse.
    #[must_use]
    pub fn is_clone(&self) -> bool {
        self.clone_index.is_some()
    }
}

impl fmt::Display for PNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.clone_index {
            Some(k) => write!(f, "{}*{k}", self.origin),
            None => write!(f, "{}", self.origin),
        }
    }
}

/// Identifier of a node in an RHS (replacement) graph.
///
/// `merged_from` records the P→RHS homomorphism at this node: empty for an
/// added node, a singleton for a preserved node, two or more for a merge.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RhsNodeId {
    /// Display name; also the base for fresh host-node names on addition.
    pub name: NodeName,
    /// P nodes that map into this RHS node.
    pub merged_from: Vec<PNodeId>,
}

impl RhsNodeId {
    /// RHS node added from scratch, with no P origin.
    pub fn added(name: impl Into<NodeName>) -> Self {
        Self {
            name: name.into(),
            merged_from: Vec::new(),
        }
    }

    /// RHS node that preserves a single P node.
    #[must_use]
    pub fn preserve(p_node: PNodeId) -> Self {
        Self {
            name: NodeName::new(p_node.to_string()),
            merged_from: vec![p_node],
        }
    }

    /// RHS node that merges the given P nodes into one.
    #[must_use]
    pub fn merge(p_nodes: Vec<PNodeId>) -> Self {
        let name = p_nodes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("&");
        Self {
            name: NodeName::new(name),
            merged_from: p_nodes,
        }
    }

    /// Returns `true` if this RHS node merges two or more P nodes.
    #[must_use]
    pub fn is_merge(&self) -> bool {
        self.merged_from.len() > 1
    }
}

impl fmt::Display for RhsNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_prefix_is_recognised() {
        assert!(NodeName::new("$3").is_anonymous());
        assert!(!NodeName::new("a").is_anonymous());
        assert!(!NodeName::new("").is_anonymous());
    }

    #[test]
    fn p_node_display_uses_clone_convention() {
        assert_eq!(PNodeId::preserve("x").to_string(), "x");
        assert_eq!(PNodeId::clone_of("x", 2).to_string(), "x*2");
    }

    #[test]
    fn merge_name_joins_origins() {
        let id = RhsNodeId::merge(vec![PNodeId::preserve("a"), PNodeId::preserve("b")]);
        assert_eq!(id.to_string(), "a&b");
        assert!(id.is_merge());
        assert!(!RhsNodeId::added("c").is_merge());
    }
}

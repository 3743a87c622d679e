// SPDX-License-Identifier: Apache-2.0
//! Pattern graphs and attribute constraints.
//!
//! A [`Pattern`] is what the (out-of-scope) pattern-text parser hands the
//! matcher: a directed structure over symbolic node names, with every node
//! and edge carrying a [`ConstraintMap`]. Anonymous nodes (names with the
//! [`crate::ANON_PREFIX`] prefix) take part in matching but are stripped
//! from yielded matches.
use std::collections::BTreeMap;

use crate::ident::NodeName;
use crate::value::{AttrMap, AttrValue, ValueType};

/// Requirement a host attribute must satisfy.
///
/// Both fields absent means "the attribute must exist, any value accepted".
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttrConstraint {
    /// Required type tag, if any.
    pub ty: Option<ValueType>,
    /// Required exact value, if any.
    pub value: Option<AttrValue>,
}

impl AttrConstraint {
    /// Existence check: the attribute must be present, any value accepted.
    #[must_use]
    pub fn exists() -> Self {
        Self::default()
    }

    /// The attribute must carry the given type tag.
    #[must_use]
    pub fn of_type(ty: ValueType) -> Self {
        Self {
            ty: Some(ty),
            value: None,
        }
    }

    /// The attribute must equal the given value.
    pub fn equals(value: impl Into<AttrValue>) -> Self {
        Self {
            ty: None,
            value: Some(value.into()),
        }
    }

    /// Returns `true` if the host value satisfies this constraint.
    #[must_use]
    pub fn satisfied_by(&self, value: &AttrValue) -> bool {
        if let Some(ty) = self.ty {
            if !value.has_type(ty) {
                return false;
            }
        }
        match &self.value {
            Some(required) => required == value,
            None => true,
        }
    }
}

/// Constraints per attribute name of one pattern node or edge.
pub type ConstraintMap = BTreeMap<String, AttrConstraint>;

/// Returns `true` if `attrs` satisfies every entry of the constraint map:
/// each required attribute exists and, where a value or type is pinned,
/// matches it.
pub(crate) fn constraints_satisfied(constraints: &ConstraintMap, attrs: &AttrMap) -> bool {
    constraints.iter().all(|(name, constraint)| {
        attrs
            .get(name)
            .is_some_and(|value| constraint.satisfied_by(value))
    })
}

/// A pattern graph: the LHS input of the matcher.
#[derive(Debug, Clone, Default)]
pub struct Pattern {
    nodes: BTreeMap<NodeName, ConstraintMap>,
    edges: BTreeMap<(NodeName, NodeName), ConstraintMap>,
    /// Pattern nodes pinned to one specific host node. Used when composing
    /// matches for nested or intersecting patterns; the candidate set of a
    /// pinned node is the singleton of its pin.
    pinned: BTreeMap<NodeName, NodeName>,
}

impl Pattern {
    /// Creates an empty pattern.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a pattern node with its constraints, merging with any
    /// constraints declared for the same symbol earlier (a symbol may appear
    /// several times in pattern text).
    pub fn add_node(&mut self, name: impl Into<NodeName>, constraints: ConstraintMap) -> &mut Self {
        self.nodes.entry(name.into()).or_default().extend(constraints);
        self
    }

    /// Declares a pattern edge; endpoints are declared as constraint-free
    /// nodes when not already present, matching how `a->b` in pattern text
    /// introduces both symbols.
    pub fn add_edge(
        &mut self,
        src: impl Into<NodeName>,
        dst: impl Into<NodeName>,
        constraints: ConstraintMap,
    ) -> &mut Self {
        let src = src.into();
        let dst = dst.into();
        self.nodes.entry(src.clone()).or_default();
        self.nodes.entry(dst.clone()).or_default();
        self.edges
            .entry((src, dst))
            .or_default()
            .extend(constraints);
        self
    }

    /// Pins a pattern node to a concrete host node.
    pub fn pin(&mut self, node: impl Into<NodeName>, host_node: impl Into<NodeName>) -> &mut Self {
        let node = node.into();
        self.nodes.entry(node.clone()).or_default();
        self.pinned.insert(node, host_node.into());
        self
    }

    /// Returns `true` if the pattern has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over pattern nodes and their constraints in name order.
    pub fn iter_nodes(&self) -> impl Iterator<Item = (&NodeName, &ConstraintMap)> {
        self.nodes.iter()
    }

    /// Iterate over pattern edges and their constraints in key order.
    pub fn iter_edges(&self) -> impl Iterator<Item = (&(NodeName, NodeName), &ConstraintMap)> {
        self.edges.iter()
    }

    /// Number of pattern edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Constraints of one pattern node.
    pub fn node_constraints(&self, node: &NodeName) -> Option<&ConstraintMap> {
        self.nodes.get(node)
    }

    /// Host node a pattern node is pinned to, if any.
    pub fn pinned(&self, node: &NodeName) -> Option<&NodeName> {
        self.pinned.get(node)
    }

    /// Renders the pattern as an LHS attributed graph for rule derivation:
    /// every constrained attribute appears with a [`AttrValue::Null`]
    /// existence marker, since the rule model only reasons about attribute
    /// name sets.
    #[must_use]
    pub fn to_lhs_graph(&self) -> crate::AttributedGraph<NodeName> {
        let mut lhs = crate::AttributedGraph::new();
        for (name, constraints) in &self.nodes {
            let attrs: AttrMap = constraints
                .keys()
                .map(|key| (key.clone(), AttrValue::Null))
                .collect();
            lhs.add_node_with(name.clone(), attrs);
        }
        for ((src, dst), constraints) in &self.edges {
            let attrs: AttrMap = constraints
                .keys()
                .map(|key| (key.clone(), AttrValue::Null))
                .collect();
            let inserted = lhs.add_edge_with(src.clone(), dst.clone(), attrs);
            debug_assert!(inserted.is_ok(), "pattern edges always have endpoints");
        }
        lhs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_checks_existence_value_and_type() {
        let exists = AttrConstraint::exists();
        assert!(exists.satisfied_by(&AttrValue::Null));
        assert!(exists.satisfied_by(&AttrValue::Int(3)));

        let three = AttrConstraint::equals(3_i64);
        assert!(three.satisfied_by(&AttrValue::Int(3)));
        assert!(!three.satisfied_by(&AttrValue::Int(4)));
        assert!(!three.satisfied_by(&AttrValue::Str("3".to_owned())));

        let int = AttrConstraint::of_type(ValueType::Int);
        assert!(int.satisfied_by(&AttrValue::Int(0)));
        assert!(!int.satisfied_by(&AttrValue::Float(0.0)));
    }

    #[test]
    fn missing_attribute_fails_the_constraint_map() {
        let mut constraints = ConstraintMap::new();
        constraints.insert("id".to_owned(), AttrConstraint::exists());
        assert!(!constraints_satisfied(&constraints, &AttrMap::new()));

        let mut attrs = AttrMap::new();
        attrs.insert("id".to_owned(), AttrValue::Null);
        assert!(constraints_satisfied(&constraints, &attrs));
    }

    #[test]
    fn add_edge_declares_missing_endpoints() {
        let mut pattern = Pattern::new();
        assert!(pattern.is_empty());
        pattern.add_edge("a", "b", ConstraintMap::new());
        assert!(!pattern.is_empty());
        assert_eq!(pattern.iter_nodes().count(), 2);
        assert_eq!(pattern.edge_count(), 1);
    }

    #[test]
    fn lhs_graph_carries_existence_markers() {
        let mut pattern = Pattern::new();
        let mut constraints = ConstraintMap::new();
        constraints.insert("id".to_owned(), AttrConstraint::equals(7_i64));
        pattern.add_node("a", constraints);
        let lhs = pattern.to_lhs_graph();
        assert_eq!(
            lhs.node(&NodeName::new("a")).and_then(|m| m.get("id")),
            Some(&AttrValue::Null)
        );
    }
}

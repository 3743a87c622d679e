// SPDX-License-Identifier: Apache-2.0
//! End-to-end rewrite scenarios through the public driver API.
//!
//! Each test builds a small host graph, configures a rule and checks the
//! final graph state, including the cases where a rewrite must fail and
//! leave no trace.

use std::collections::BTreeSet;

use morph_core::{
    AttrConstraint, AttrMap, AttrValue, AttributedGraph, ConstraintMap, GraphError, MergePolicy,
    NodeName, PNodeId, Pattern, RewriteError, Rewriter, RhsNodeId, RhsTemplate,
};

fn n(name: &str) -> NodeName {
    NodeName::new(name)
}

fn int_attr(key: &str, v: i64) -> AttrMap {
    [(key.to_owned(), AttrValue::Int(v))].into_iter().collect()
}

fn exists(keys: &[&str]) -> ConstraintMap {
    keys.iter()
        .map(|key| ((*key).to_owned(), AttrConstraint::exists()))
        .collect()
}

// =============================================================================
// Removal, cloning, merging
// =============================================================================

#[test]
fn dropping_a_pattern_node_removes_node_and_edge() {
    let mut host = AttributedGraph::from_parts(
        [("A", AttrMap::new()), ("B", AttrMap::new())],
        [("A", "B", AttrMap::new())],
    );
    let mut pattern = Pattern::new();
    pattern.add_edge("a", "b", ConstraintMap::new());

    // P keeps only `a`: `b` and the matched edge disappear.
    let mut p = AttributedGraph::new();
    p.add_node(PNodeId::preserve("a"));
    let rewriter = Rewriter::new(pattern).preserve(p);

    let results: Vec<_> = rewriter.run(&mut host).collect();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_ok());
    assert_eq!(host.node_count(), 1, "only A should remain");
    assert!(host.has_node(&n("A")));
    assert_eq!(host.edge_count(), 0);
}

#[test]
fn cloning_into_two_copies_replaces_the_original() {
    let mut host = AttributedGraph::from_parts(
        [("X", int_attr("id", 1)), ("N", AttrMap::new())],
        [("N", "X", int_attr("w", 7))],
    );
    let mut pattern = Pattern::new();
    pattern.add_node("a", exists(&["id"]));

    // Two indexed clones and no reuse of the original.
    let mut p = AttributedGraph::new();
    p.add_node(PNodeId::clone_of("a", 1));
    p.add_node(PNodeId::clone_of("a", 2));
    let rewriter = Rewriter::new(pattern).preserve(p);

    let results: Vec<_> = rewriter.run(&mut host).collect();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_ok());

    assert!(!host.has_node(&n("X")), "original must be removed");
    let copies: Vec<NodeName> = host
        .iter_nodes()
        .filter(|(_, attrs)| attrs.get("id") == Some(&AttrValue::Int(1)))
        .map(|(name, _)| name.clone())
        .collect();
    assert_eq!(copies.len(), 2, "two copies carrying id:1");
    for copy in &copies {
        assert_eq!(
            host.edge(&n("N"), copy),
            Some(&int_attr("w", 7)),
            "each copy keeps the original's incoming edge"
        );
    }
}

#[test]
fn merging_two_nodes_with_union_collects_values() {
    let mut host = AttributedGraph::from_parts(
        [("X", int_attr("v", 1)), ("Y", int_attr("v", 2))],
        [],
    );
    let mut pattern = Pattern::new();
    pattern.add_node("a", exists(&["v"]));
    pattern.add_node("b", exists(&["v"]));

    let mut rhs = RhsTemplate::new();
    rhs.add_node(RhsNodeId::merge(vec![
        PNodeId::preserve("a"),
        PNodeId::preserve("b"),
    ]));
    let rewriter = Rewriter::new(pattern)
        .replace(rhs)
        .merge_policy(MergePolicy::Union)
        // Without the pin, (a=X, b=Y) and (a=Y, b=X) both match; the first
        // rewrite consumes both nodes and the second fails. Pin one side.
        .condition(|graph, mat| {
            mat.host_node("a")
                .is_ok_and(|bound| graph.node(bound).is_some() && bound.as_str() == "X")
        });

    let results: Vec<_> = rewriter.run(&mut host).collect();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_ok());
    assert_eq!(host.node_count(), 1);

    let (merged, attrs) = host.iter_nodes().next().map(|(k, v)| (k.clone(), v.clone())).unwrap();
    assert_eq!(merged, n("X&Y"));
    match attrs.get("v") {
        Some(AttrValue::List(items)) => {
            let as_set: BTreeSet<String> = items.iter().map(|v| format!("{v:?}")).collect();
            assert_eq!(as_set.len(), 2, "both source values collected: {items:?}");
            assert!(items.contains(&AttrValue::Int(1)));
            assert!(items.contains(&AttrValue::Int(2)));
        }
        other => panic!("expected a union list, got {other:?}"),
    }
}

#[test]
fn merge_conflict_under_choose_last_keeps_one_origin_value() {
    let mut host = AttributedGraph::from_parts(
        [("X", int_attr("x", 1)), ("Y", int_attr("x", 2))],
        [],
    );
    let mut pattern = Pattern::new();
    pattern.add_node("a", exists(&["x"]));
    pattern.add_node("b", exists(&["x"]));
    pattern.pin("a", "X");
    pattern.pin("b", "Y");

    let mut rhs = RhsTemplate::new();
    rhs.add_node(RhsNodeId::merge(vec![
        PNodeId::preserve("a"),
        PNodeId::preserve("b"),
    ]));
    let rewriter = Rewriter::new(pattern).replace(rhs);

    let results: Vec<_> = rewriter.run(&mut host).collect();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_ok());
    assert_eq!(host.node_count(), 1);
    let attrs = host.iter_nodes().next().map(|(_, v)| v.clone()).unwrap();
    let kept = attrs.get("x").cloned();
    assert!(
        kept == Some(AttrValue::Int(1)) || kept == Some(AttrValue::Int(2)),
        "one origin's value survives, not both: {kept:?}"
    );
}

// =============================================================================
// Failure semantics
// =============================================================================

#[test]
fn failed_rewrite_rolls_back_the_whole_match() {
    let mut host = AttributedGraph::from_parts(
        [("X", int_attr("v", 1)), ("Y", AttrMap::new())],
        [("X", "Y", AttrMap::new())],
    );
    let before = host.canonical_hash();

    let mut pattern = Pattern::new();
    pattern.add_node("a", exists(&["v"]));
    pattern.add_node("b", ConstraintMap::new());
    pattern.pin("a", "X");
    pattern.pin("b", "Y");

    // The restrictive phase drops `v` from X, then the expansive phase
    // tries to add the already-existing edge X -> Y and fails.
    let mut p = AttributedGraph::new();
    p.add_node(PNodeId::preserve("a"));
    p.add_node(PNodeId::preserve("b"));
    let mut rhs = RhsTemplate::new();
    rhs.add_edge(
        RhsNodeId::preserve(PNodeId::preserve("a")),
        RhsNodeId::preserve(PNodeId::preserve("b")),
    );
    let rewriter = Rewriter::new(pattern).preserve(p).replace(rhs);

    let results: Vec<_> = rewriter.run(&mut host).collect();
    assert_eq!(results.len(), 1);
    assert!(
        matches!(
            &results[0],
            Err(RewriteError::Graph(GraphError::EdgeExists(_, _)))
        ),
        "unexpected result: {results:?}"
    );
    assert_eq!(
        host.canonical_hash(),
        before,
        "host must be attribute-for-attribute identical after rollback"
    );
}

#[test]
fn overlapping_batch_matches_fail_cleanly_after_the_first_rewrite() {
    // X -> Y -> Z; the rule removes `b` and drops `t` from `a`. The first
    // match (X, Y) consumes Y, so the second match (Y, Z) tries to touch a
    // vanished node and must fail without removing Z.
    let mut host = AttributedGraph::from_parts(
        [
            ("X", int_attr("t", 1)),
            ("Y", int_attr("t", 1)),
            ("Z", int_attr("t", 1)),
        ],
        [("X", "Y", AttrMap::new()), ("Y", "Z", AttrMap::new())],
    );
    let mut pattern = Pattern::new();
    pattern.add_node("a", exists(&["t"]));
    pattern.add_node("b", exists(&["t"]));
    pattern.add_edge("a", "b", ConstraintMap::new());
    let mut p = AttributedGraph::new();
    p.add_node(PNodeId::preserve("a"));
    let rewriter = Rewriter::new(pattern).preserve(p);

    let results: Vec<_> = rewriter.run(&mut host).collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(
        matches!(
            &results[1],
            Err(RewriteError::Graph(GraphError::NoSuchNode(_)))
        ),
        "unexpected: {results:?}"
    );
    // First rewrite holds, second left no trace.
    assert_eq!(host.node(&n("X")), Some(&AttrMap::new()));
    assert!(!host.has_node(&n("Y")));
    assert_eq!(host.node(&n("Z")), Some(&int_attr("t", 1)));
}

#[test]
fn always_false_condition_rewrites_nothing() {
    let mut host = AttributedGraph::from_parts(
        [("A", AttrMap::new()), ("B", AttrMap::new())],
        [("A", "B", AttrMap::new())],
    );
    let before = host.canonical_hash();
    let mut pattern = Pattern::new();
    pattern.add_edge("a", "b", ConstraintMap::new());
    let mut p = AttributedGraph::new();
    p.add_node(PNodeId::preserve("a"));
    let rewriter = Rewriter::new(pattern).preserve(p).condition(|_, _| false);

    assert_eq!(rewriter.run(&mut host).count(), 0);
    assert_eq!(host.canonical_hash(), before);
}

// =============================================================================
// Recursive mode
// =============================================================================

#[test]
fn recursive_edge_contraction_reaches_a_fixpoint() {
    // Contract every edge by merging its endpoints; a chain of four nodes
    // collapses into a single node.
    let mut host = AttributedGraph::from_parts(
        [
            ("n1", AttrMap::new()),
            ("n2", AttrMap::new()),
            ("n3", AttrMap::new()),
            ("n4", AttrMap::new()),
        ],
        [
            ("n1", "n2", AttrMap::new()),
            ("n2", "n3", AttrMap::new()),
            ("n3", "n4", AttrMap::new()),
        ],
    );
    let mut pattern = Pattern::new();
    pattern.add_edge("a", "b", ConstraintMap::new());
    let mut rhs = RhsTemplate::new();
    rhs.add_node(RhsNodeId::merge(vec![
        PNodeId::preserve("a"),
        PNodeId::preserve("b"),
    ]));
    let rewriter = Rewriter::new(pattern).replace(rhs);

    let results: Vec<_> = rewriter.run_recursive(&mut host).collect();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(host.node_count(), 1);
    // Contracting a chain leaves the self-loop the last contraction made
    // between already-merged endpoints.
    assert!(host.edge_count() <= 1);
}

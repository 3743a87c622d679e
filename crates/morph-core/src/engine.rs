// SPDX-License-Identifier: Apache-2.0
//! The rewrite driver: configure a rule once, apply it across a host graph.
//!
//! [`Rewriter`] is the builder-style entry point. It owns the pattern, the
//! optional interface graph and replacement template, the match condition
//! and the merge policy, and hands out a lazy [`Rewrites`] iterator in one
//! of two modes:
//!
//! - **batch** ([`Rewriter::run`]): matches are enumerated against a
//!   snapshot taken before the first rewrite, so every occurrence of the
//!   original pattern is transformed exactly once even though the live
//!   graph changes under the iterator;
//! - **recursive** ([`Rewriter::run_recursive`]): after each rewrite the
//!   live graph is re-queried, transforming until no match remains or the
//!   iteration cap trips with [`RewriteError::NonTerminating`].
//!
//! Replacement attribute values may be literals or placeholders resolved
//! per match by registered [`RenderFn`]s, which is how values from the
//! matched subgraph flow into the replacement.
use std::collections::BTreeMap;

use tracing::debug;

use crate::executor::{apply, RewriteError};
use crate::graph::AttributedGraph;
use crate::ident::{NodeName, PNodeId, RhsNodeId};
use crate::matcher::find_matches;
use crate::matching::Match;
use crate::pattern::Pattern;
use crate::rule::{MergePolicy, Rule};
use crate::value::AttrValue;

/// Computes one replacement attribute value from the match being rewritten.
pub type RenderFn = Box<dyn Fn(&AttributedGraph<NodeName>, &Match) -> AttrValue>;

/// Match filter evaluated before a rewrite; sees anonymous bindings.
pub type ConditionFn = Box<dyn Fn(&AttributedGraph<NodeName>, &Match) -> bool>;

/// One attribute value in a replacement template.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    /// A fixed value, used as-is for every match.
    Lit(AttrValue),
    /// Resolved per match by the [`RenderFn`] registered under this name.
    Placeholder(String),
}

impl From<AttrValue> for TemplateValue {
    fn from(value: AttrValue) -> Self {
        Self::Lit(value)
    }
}

impl TemplateValue {
    /// A literal value.
    pub fn lit(value: impl Into<AttrValue>) -> Self {
        Self::Lit(value.into())
    }

    /// A placeholder resolved by the render function of the same name.
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self::Placeholder(name.into())
    }
}

/// Replacement graph template, rendered into a concrete RHS graph per
/// match.
#[derive(Debug, Clone, Default)]
pub struct RhsTemplate {
    nodes: BTreeMap<RhsNodeId, BTreeMap<String, TemplateValue>>,
    edges: BTreeMap<(RhsNodeId, RhsNodeId), BTreeMap<String, TemplateValue>>,
}

impl RhsTemplate {
    /// Creates an empty template.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a replacement node.
    pub fn add_node(&mut self, node: RhsNodeId) -> &mut Self {
        self.nodes.entry(node).or_default();
        self
    }

    /// Sets one attribute on a replacement node, declaring it if needed.
    pub fn node_attr(
        &mut self,
        node: RhsNodeId,
        key: impl Into<String>,
        value: impl Into<TemplateValue>,
    ) -> &mut Self {
        self.nodes
            .entry(node)
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    /// Declares a replacement edge; endpoints are declared when missing.
    pub fn add_edge(&mut self, src: RhsNodeId, dst: RhsNodeId) -> &mut Self {
        self.nodes.entry(src.clone()).or_default();
        self.nodes.entry(dst.clone()).or_default();
        self.edges.entry((src, dst)).or_default();
        self
    }

    /// Sets one attribute on a replacement edge, declaring it if needed.
    pub fn edge_attr(
        &mut self,
        src: RhsNodeId,
        dst: RhsNodeId,
        key: impl Into<String>,
        value: impl Into<TemplateValue>,
    ) -> &mut Self {
        self.nodes.entry(src.clone()).or_default();
        self.nodes.entry(dst.clone()).or_default();
        self.edges
            .entry((src, dst))
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    /// Renders the template into a concrete RHS graph for one match.
    ///
    /// # Errors
    ///
    /// [`RewriteError::MissingRenderFn`] if a placeholder has no registered
    /// render function.
    pub fn render(
        &self,
        graph: &AttributedGraph<NodeName>,
        mat: &Match,
        render_fns: &BTreeMap<String, RenderFn>,
    ) -> Result<AttributedGraph<RhsNodeId>, RewriteError> {
        let resolve = |value: &TemplateValue| -> Result<AttrValue, RewriteError> {
            match value {
                TemplateValue::Lit(value) => Ok(value.clone()),
                TemplateValue::Placeholder(name) => render_fns
                    .get(name)
                    .map(|render| render(graph, mat))
                    .ok_or_else(|| RewriteError::MissingRenderFn(name.clone())),
            }
        };

        let mut rhs = AttributedGraph::new();
        for (node, attrs) in &self.nodes {
            let rendered = attrs
                .iter()
                .map(|(key, value)| Ok((key.clone(), resolve(value)?)))
                .collect::<Result<_, RewriteError>>()?;
            rhs.add_node_with(node.clone(), rendered);
        }
        for ((src, dst), attrs) in &self.edges {
            let rendered = attrs
                .iter()
                .map(|(key, value)| Ok((key.clone(), resolve(value)?)))
                .collect::<Result<_, RewriteError>>()?;
            rhs.add_edge_with(src.clone(), dst.clone(), rendered)?;
        }
        Ok(rhs)
    }
}

/// Default cap on recursive rewriting before it is declared divergent.
pub const DEFAULT_RECURSION_LIMIT: usize = 10_000;

/// Configured rewrite: pattern, optional interface and replacement,
/// condition, render functions and merge policy.
pub struct Rewriter {
    lhs: Pattern,
    p: Option<AttributedGraph<PNodeId>>,
    rhs: Option<RhsTemplate>,
    condition: ConditionFn,
    render_fns: BTreeMap<String, RenderFn>,
    merge_policy: MergePolicy,
    recursion_limit: usize,
}

impl Rewriter {
    /// Starts a rewriter for the given pattern. Without further
    /// configuration the rule is the identity: matches are found and
    /// yielded, the graph stays untouched.
    #[must_use]
    pub fn new(lhs: Pattern) -> Self {
        Self {
            lhs,
            p: None,
            rhs: None,
            condition: Box::new(|_, _| true),
            render_fns: BTreeMap::new(),
            merge_policy: MergePolicy::ChooseLast,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }

    /// Sets the interface graph declaring what is preserved or cloned.
    /// Attribute mentions in the interface graph use [`AttrValue::Null`]
    /// markers, matching the pattern's constraint rendering.
    #[must_use]
    pub fn preserve(mut self, p: AttributedGraph<PNodeId>) -> Self {
        self.p = Some(p);
        self
    }

    /// Sets the replacement template.
    #[must_use]
    pub fn replace(mut self, rhs: RhsTemplate) -> Self {
        self.rhs = Some(rhs);
        self
    }

    /// Sets the match condition. It is evaluated with the graph matches
    /// were found against and the candidate match, anonymous bindings
    /// included; matches failing it are skipped without rewriting.
    #[must_use]
    pub fn condition(
        mut self,
        condition: impl Fn(&AttributedGraph<NodeName>, &Match) -> bool + 'static,
    ) -> Self {
        self.condition = Box::new(condition);
        self
    }

    /// Registers the render function resolving one template placeholder.
    #[must_use]
    pub fn render_fn(
        mut self,
        name: impl Into<String>,
        render: impl Fn(&AttributedGraph<NodeName>, &Match) -> AttrValue + 'static,
    ) -> Self {
        self.render_fns.insert(name.into(), Box::new(render));
        self
    }

    /// Sets the merge policy for conflicting attributes.
    #[must_use]
    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    /// Overrides the recursive-mode iteration cap.
    #[must_use]
    pub fn recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Rewrites every occurrence of the pattern in the snapshot taken at
    /// call time.
    ///
    /// Matches are fixed up front; replacement placeholders render against
    /// the snapshot, so later rewrites in the same run do not feed earlier
    /// matches' values.
    pub fn run<'g>(&'g self, host: &'g mut AttributedGraph<NodeName>) -> Rewrites<'g> {
        let snapshot = host.clone();
        let matches: Vec<Match> = {
            let snap = &snapshot;
            let condition = self.condition.as_ref();
            find_matches(snap, &self.lhs, move |mat| condition(snap, mat)).collect()
        };
        debug!(matches = matches.len(), "batch rewrite");
        Rewrites {
            host,
            rewriter: self,
            finished: false,
            mode: Mode::Batch {
                snapshot,
                pending: matches.into_iter(),
            },
        }
    }

    /// Rewrites the first match, re-queries the live graph, and repeats
    /// until no match remains.
    ///
    /// A rule that keeps producing matches would loop forever; after
    /// `recursion_limit` rewrites the iterator yields
    /// [`RewriteError::NonTerminating`] and stops.
    pub fn run_recursive<'g>(&'g self, host: &'g mut AttributedGraph<NodeName>) -> Rewrites<'g> {
        Rewrites {
            host,
            rewriter: self,
            finished: false,
            mode: Mode::Recursive { steps: 0 },
        }
    }

    fn render_rhs(
        &self,
        graph: &AttributedGraph<NodeName>,
        mat: &Match,
    ) -> Result<Option<AttributedGraph<RhsNodeId>>, RewriteError> {
        self.rhs
            .as_ref()
            .map(|template| template.render(graph, mat, &self.render_fns))
            .transpose()
    }

    fn rewrite_one(
        &self,
        host: &mut AttributedGraph<NodeName>,
        rhs: Option<AttributedGraph<RhsNodeId>>,
        mat: &Match,
    ) -> Result<Match, RewriteError> {
        let rule = Rule::new(self.lhs.to_lhs_graph(), self.p.clone(), rhs, self.merge_policy)?;
        apply(host, mat, &rule)
    }
}

enum Mode {
    Batch {
        snapshot: AttributedGraph<NodeName>,
        pending: std::vec::IntoIter<Match>,
    },
    Recursive {
        steps: usize,
    },
}

/// Lazy stream of rewrites over one host graph.
///
/// Yields the consumed match per successful rewrite. The first error fuses
/// the iterator; the failed rewrite itself was rolled back, so the host is
/// left in the state of the last success.
pub struct Rewrites<'g> {
    host: &'g mut AttributedGraph<NodeName>,
    rewriter: &'g Rewriter,
    finished: bool,
    mode: Mode,
}

impl Iterator for Rewrites<'_> {
    type Item = Result<Match, RewriteError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let result = match &mut self.mode {
            Mode::Batch { snapshot, pending } => {
                let mat = pending.next()?;
                self.rewriter
                    .render_rhs(snapshot, &mat)
                    .and_then(|rhs| self.rewriter.rewrite_one(self.host, rhs, &mat))
            }
            Mode::Recursive { steps } => {
                let next_match = {
                    let host: &AttributedGraph<NodeName> = self.host;
                    let condition = self.rewriter.condition.as_ref();
                    find_matches(host, &self.rewriter.lhs, move |mat| condition(host, mat))
                        .next()
                };
                let mat = next_match?;
                if *steps >= self.rewriter.recursion_limit {
                    self.finished = true;
                    return Some(Err(RewriteError::NonTerminating(*steps)));
                }
                *steps += 1;
                self.rewriter
                    .render_rhs(self.host, &mat)
                    .and_then(|rhs| self.rewriter.rewrite_one(self.host, rhs, &mat))
            }
        };
        if result.is_err() {
            self.finished = true;
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::pattern::{AttrConstraint, ConstraintMap};
    use crate::value::AttrMap;

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

    #[test]
    fn identity_rewriter_yields_matches_without_mutation() {
        let mut host = AttributedGraph::from_parts(
            [("X", int_attr("v", 1)), ("Y", int_attr("v", 2))],
            [("X", "Y", AttrMap::new())],
        );
        let before = host.canonical_hash();
        let mut pattern = Pattern::new();
        pattern.add_edge("a", "b", ConstraintMap::new());
        let rewriter = Rewriter::new(pattern);
        let results: Vec<_> = rewriter.run(&mut host).collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
        assert_eq!(host.canonical_hash(), before);
    }

    #[test]
    fn batch_removes_every_matched_node() {
        let mut host = AttributedGraph::from_parts(
            [
                ("X", int_attr("kill", 1)),
                ("Y", int_attr("kill", 1)),
                ("Z", int_attr("keep", 1)),
            ],
            [],
        );
        let mut pattern = Pattern::new();
        pattern.add_node("a", exists(&["kill"]));
        let rewriter = Rewriter::new(pattern).preserve(AttributedGraph::new());
        let results: Vec<_> = rewriter.run(&mut host).collect();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(host.node_count(), 1);
        assert!(host.has_node(&n("Z")));
    }

    #[test]
    fn placeholder_renders_from_the_matched_subgraph() {
        let mut host = AttributedGraph::from_parts([("X", int_attr("v", 20))], []);
        let mut pattern = Pattern::new();
        pattern.add_node("a", exists(&["v"]));

        let mut template = RhsTemplate::new();
        template.node_attr(
            RhsNodeId::preserve(PNodeId::preserve("a")),
            "doubled",
            TemplateValue::placeholder("double"),
        );
        // Existing attr must survive on the RHS node.
        template.node_attr(
            RhsNodeId::preserve(PNodeId::preserve("a")),
            "v",
            TemplateValue::placeholder("keep"),
        );

        let rewriter = Rewriter::new(pattern)
            .replace(template)
            .render_fn("double", |graph, mat| {
                match mat.node_attrs(graph, "a").ok().and_then(|a| a.get("v")) {
                    Some(AttrValue::Int(v)) => AttrValue::Int(v * 2),
                    _ => AttrValue::Null,
                }
            })
            .render_fn("keep", |graph, mat| {
                mat.node_attrs(graph, "a")
                    .ok()
                    .and_then(|a| a.get("v"))
                    .cloned()
                    .unwrap_or(AttrValue::Null)
            });
        let results: Vec<_> = rewriter.run(&mut host).collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
        assert_eq!(
            host.node(&n("X")).and_then(|a| a.get("doubled")),
            Some(&AttrValue::Int(40))
        );
        assert_eq!(
            host.node(&n("X")).and_then(|a| a.get("v")),
            Some(&AttrValue::Int(20))
        );
    }

    #[test]
    fn missing_render_fn_is_reported_and_rolled_back() {
        let mut host = AttributedGraph::from_parts([("X", int_attr("v", 1))], []);
        let before = host.canonical_hash();
        let mut pattern = Pattern::new();
        pattern.add_node("a", exists(&["v"]));
        let mut template = RhsTemplate::new();
        template.node_attr(
            RhsNodeId::preserve(PNodeId::preserve("a")),
            "v",
            TemplateValue::placeholder("nope"),
        );
        let rewriter = Rewriter::new(pattern).replace(template);
        let results: Vec<_> = rewriter.run(&mut host).collect();
        assert_eq!(
            results,
            vec![Err(RewriteError::MissingRenderFn("nope".to_owned()))]
        );
        assert_eq!(host.canonical_hash(), before);
    }

    #[test]
    fn recursive_mode_consumes_until_fixpoint() {
        let mut host = AttributedGraph::from_parts(
            [
                ("X", int_attr("hot", 1)),
                ("Y", int_attr("hot", 1)),
                ("Z", int_attr("hot", 1)),
            ],
            [],
        );
        let mut pattern = Pattern::new();
        pattern.add_node("a", exists(&["hot"]));
        // Deleting the matched node shrinks the match set every step.
        let rewriter = Rewriter::new(pattern).preserve(AttributedGraph::new());
        let results: Vec<_> = rewriter.run_recursive(&mut host).collect();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(host.node_count(), 0);
    }

    #[test]
    fn recursive_mode_trips_the_iteration_cap() {
        let mut host = AttributedGraph::from_parts([("X", int_attr("v", 1))], []);
        let mut pattern = Pattern::new();
        pattern.add_node("a", exists(&["v"]));
        // Identity rule: the same match reappears forever.
        let rewriter = Rewriter::new(pattern).recursion_limit(5);
        let results: Vec<_> = rewriter.run_recursive(&mut host).collect();
        assert_eq!(results.len(), 6);
        assert!(results[..5].iter().all(Result::is_ok));
        assert_eq!(results[5], Err(RewriteError::NonTerminating(5)));
    }

    #[test]
    fn condition_filters_against_the_query_graph() {
        let mut host = AttributedGraph::from_parts(
            [("X", int_attr("v", 1)), ("Y", int_attr("v", 5))],
            [],
        );
        let mut pattern = Pattern::new();
        pattern.add_node("a", exists(&["v"]));
        let rewriter = Rewriter::new(pattern)
            .preserve(AttributedGraph::new())
            .condition(|graph, mat| {
                matches!(
                    mat.node_attrs(graph, "a").ok().and_then(|a| a.get("v")),
                    Some(AttrValue::Int(v)) if *v > 3
                )
            });
        let results: Vec<_> = rewriter.run(&mut host).collect();
        assert_eq!(results.len(), 1);
        assert!(host.has_node(&n("X")));
        assert!(!host.has_node(&n("Y")));
    }
}

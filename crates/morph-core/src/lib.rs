// SPDX-License-Identifier: Apache-2.0
//! morph-core: algebraic rewriting engine for attributed directed graphs.
//!
//! Rules are spans LHS ← P → RHS over attributed graphs. The matcher finds
//! occurrences of the LHS pattern in a host graph, the executor applies the
//! rule to one occurrence atomically (restrictive phase, then expansive
//! phase, with snapshot rollback on failure), and the [`Rewriter`] driver
//! runs a configured rule across the whole graph in batch or recursive
//! mode.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::similar_names,
    clippy::use_self
)]

mod engine;
mod executor;
mod graph;
mod ident;
mod matcher;
mod matching;
mod pattern;
mod rule;
mod value;

// Re-exports for stable public API
/// Rewrite driver: configured rules applied across a host graph.
pub use engine::{
    ConditionFn, RenderFn, Rewriter, Rewrites, RhsTemplate, TemplateValue,
    DEFAULT_RECURSION_LIMIT,
};
/// Single-match application and the standalone clone/merge primitives.
pub use executor::{apply, clone_node, merge_nodes, RewriteError};
/// The attributed-graph container and its canonical hashing.
pub use graph::{AttributedGraph, Digest, GraphError, GraphKey};
/// Identifier types for host, interface and replacement graphs.
pub use ident::{NodeName, PNodeId, RhsNodeId, ANON_PREFIX};
/// Subgraph search over a pattern.
pub use matcher::{find_matches, Matches};
/// One concrete occurrence of a pattern, and its lookup errors.
pub use matching::{Match, MatchError};
/// Pattern graphs and per-attribute constraints.
pub use pattern::{AttrConstraint, ConstraintMap, Pattern};
/// Rule spans, merge policies and the derived operation sets.
pub use rule::{MergeFn, MergePolicy, Rule, RuleError};
/// Attribute values and type tags.
pub use value::{AttrMap, AttrValue, ValueType};

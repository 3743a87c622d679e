// SPDX-License-Identifier: Apache-2.0
//! In-memory attributed directed graph.
//!
//! One container serves every role in the engine: host graphs are keyed by
//! [`NodeName`], interface (P) graphs by [`crate::PNodeId`] and replacement
//! (RHS) graphs by [`crate::RhsNodeId`]. At most one edge may connect an
//! ordered node pair; nodes and edges each own an [`AttrMap`]. Clones are
//! deep, which is what makes snapshot/rollback in the executor a plain
//! assignment.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;

use crate::ident::NodeName;
use crate::value::{AttrMap, AttrValue};

/// Canonical 256-bit digest of a graph state.
pub type Digest = [u8; 32];

/// Key bound for node identifiers stored in an [`AttributedGraph`].
pub trait GraphKey: Ord + Eq + Clone + fmt::Debug + fmt::Display {}

impl<T: Ord + Eq + Clone + fmt::Debug + fmt::Display> GraphKey for T {}

/// Errors raised by mutating operations on [`AttributedGraph`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The named node does not exist in the graph.
    #[error("node {0} does not exist in the graph")]
    NoSuchNode(String),
    /// The named edge does not exist in the graph.
    #[error("edge ({0}, {1}) does not exist in the graph")]
    NoSuchEdge(String, String),
    /// The attribute does not exist on the named node.
    #[error("attribute {attr} does not exist on node {node}")]
    NoSuchNodeAttr {
        /// Node that was inspected.
        node: String,
        /// Missing attribute key.
        attr: String,
    },
    /// The attribute does not exist on the named edge.
    #[error("attribute {attr} does not exist on edge ({src}, {dst})")]
    NoSuchEdgeAttr {
        /// Source endpoint of the inspected edge.
        src: String,
        /// Target endpoint of the inspected edge.
        dst: String,
        /// Missing attribute key.
        attr: String,
    },
    /// An edge between the ordered pair already exists.
    #[error("edge ({0}, {1}) already exists in the graph")]
    EdgeExists(String, String),
}

/// Directed graph with attribute maps on nodes and edges.
///
/// Iteration order over nodes and edges is the key order of the underlying
/// `BTreeMap`s, so traversals are deterministic for identical inputs.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttributedGraph<N: GraphKey> {
    nodes: BTreeMap<N, AttrMap>,
    edges: BTreeMap<(N, N), AttrMap>,
    /// Forward adjacency, kept in sync with `edges` on every mutation.
    succs: BTreeMap<N, BTreeSet<N>>,
    /// Reverse adjacency, kept in sync with `edges` on every mutation.
    preds: BTreeMap<N, BTreeSet<N>>,
}

impl<N: GraphKey> Default for AttributedGraph<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: GraphKey> AttributedGraph<N> {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            succs: BTreeMap::new(),
            preds: BTreeMap::new(),
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Returns `true` if the node exists.
    #[must_use]
    pub fn has_node(&self, node: &N) -> bool {
        self.nodes.contains_key(node)
    }

    /// Returns `true` if the ordered edge exists.
    #[must_use]
    pub fn has_edge(&self, src: &N, dst: &N) -> bool {
        self.edges.contains_key(&(src.clone(), dst.clone()))
    }

    /// Returns the node's attribute map, if the node exists.
    pub fn node(&self, node: &N) -> Option<&AttrMap> {
        self.nodes.get(node)
    }

    /// Returns a mutable reference to the node's attribute map.
    pub fn node_mut(&mut self, node: &N) -> Option<&mut AttrMap> {
        self.nodes.get_mut(node)
    }

    /// Returns the edge's attribute map, if the edge exists.
    pub fn edge(&self, src: &N, dst: &N) -> Option<&AttrMap> {
        self.edges.get(&(src.clone(), dst.clone()))
    }

    /// Returns a mutable reference to the edge's attribute map.
    pub fn edge_mut(&mut self, src: &N, dst: &N) -> Option<&mut AttrMap> {
        self.edges.get_mut(&(src.clone(), dst.clone()))
    }

    /// Iterate over all nodes (name, attrs) in key order.
    pub fn iter_nodes(&self) -> impl Iterator<Item = (&N, &AttrMap)> {
        self.nodes.iter()
    }

    /// Iterate over all edges ((src, dst), attrs) in key order.
    pub fn iter_edges(&self) -> impl Iterator<Item = (&(N, N), &AttrMap)> {
        self.edges.iter()
    }

    /// Iterate over the direct successors of `node` in key order.
    pub fn successors(&self, node: &N) -> impl Iterator<Item = &N> {
        self.succs.get(node).into_iter().flatten()
    }

    /// Iterate over the direct predecessors of `node` in key order.
    pub fn predecessors(&self, node: &N) -> impl Iterator<Item = &N> {
        self.preds.get(node).into_iter().flatten()
    }

    /// Iterate over the outgoing edges of `node` as (src, dst) pairs.
    pub fn out_edges<'a>(&'a self, node: &'a N) -> impl Iterator<Item = (&'a N, &'a N)> {
        self.successors(node).map(move |dst| (node, dst))
    }

    /// Iterate over the incoming edges of `node` as (src, dst) pairs.
    pub fn in_edges<'a>(&'a self, node: &'a N) -> impl Iterator<Item = (&'a N, &'a N)> {
        self.predecessors(node).map(move |src| (src, node))
    }

    /// Inserts a node with an empty attribute map. Idempotent.
    pub fn add_node(&mut self, node: N) {
        self.nodes.entry(node).or_default();
    }

    /// Inserts a node with the given attributes, replacing any existing map.
    pub fn add_node_with(&mut self, node: N, attrs: AttrMap) {
        self.nodes.insert(node, attrs);
    }

    /// Inserts a directed edge with no attributes.
    ///
    /// # Errors
    ///
    /// [`GraphError::NoSuchNode`] if either endpoint is missing, or
    /// [`GraphError::EdgeExists`] if the ordered pair is already connected.
    pub fn add_edge(&mut self, src: N, dst: N) -> Result<(), GraphError> {
        self.add_edge_with(src, dst, AttrMap::new())
    }

    /// Inserts a directed edge with the given attributes.
    ///
    /// # Errors
    ///
    /// Same as [`AttributedGraph::add_edge`].
    pub fn add_edge_with(&mut self, src: N, dst: N, attrs: AttrMap) -> Result<(), GraphError> {
        if !self.has_node(&src) {
            return Err(GraphError::NoSuchNode(src.to_string()));
        }
        if !self.has_node(&dst) {
            return Err(GraphError::NoSuchNode(dst.to_string()));
        }
        if self.has_edge(&src, &dst) {
            return Err(GraphError::EdgeExists(src.to_string(), dst.to_string()));
        }
        self.succs
            .entry(src.clone())
            .or_default()
            .insert(dst.clone());
        self.preds
            .entry(dst.clone())
            .or_default()
            .insert(src.clone());
        self.edges.insert((src, dst), attrs);
        Ok(())
    }

    /// Removes a node along with all incident edges and their attributes.
    ///
    /// # Errors
    ///
    /// [`GraphError::NoSuchNode`] if the node is absent, which the executor
    /// treats as a fatal inconsistency.
    pub fn remove_node(&mut self, node: &N) -> Result<(), GraphError> {
        if self.nodes.remove(node).is_none() {
            return Err(GraphError::NoSuchNode(node.to_string()));
        }
        if let Some(succs) = self.succs.remove(node) {
            for dst in succs {
                self.edges.remove(&(node.clone(), dst.clone()));
                if let Some(preds) = self.preds.get_mut(&dst) {
                    preds.remove(node);
                    if preds.is_empty() {
                        self.preds.remove(&dst);
                    }
                }
            }
        }
        if let Some(preds) = self.preds.remove(node) {
            for src in preds {
                self.edges.remove(&(src.clone(), node.clone()));
                if let Some(succs) = self.succs.get_mut(&src) {
                    succs.remove(node);
                    if succs.is_empty() {
                        self.succs.remove(&src);
                    }
                }
            }
        }
        Ok(())
    }

    /// Removes a directed edge and its attributes.
    ///
    /// # Errors
    ///
    /// [`GraphError::NoSuchEdge`] if the ordered pair is not connected.
    pub fn remove_edge(&mut self, src: &N, dst: &N) -> Result<(), GraphError> {
        if self.edges.remove(&(src.clone(), dst.clone())).is_none() {
            return Err(GraphError::NoSuchEdge(src.to_string(), dst.to_string()));
        }
        if let Some(succs) = self.succs.get_mut(src) {
            succs.remove(dst);
            if succs.is_empty() {
                self.succs.remove(src);
            }
        }
        if let Some(preds) = self.preds.get_mut(dst) {
            preds.remove(src);
            if preds.is_empty() {
                self.preds.remove(dst);
            }
        }
        Ok(())
    }

    /// Sets one attribute on a node.
    ///
    /// # Errors
    ///
    /// [`GraphError::NoSuchNode`] if the node is absent.
    pub fn set_node_attr(
        &mut self,
        node: &N,
        key: impl Into<String>,
        value: AttrValue,
    ) -> Result<(), GraphError> {
        let attrs = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| GraphError::NoSuchNode(node.to_string()))?;
        attrs.insert(key.into(), value);
        Ok(())
    }

    /// Deletes one attribute from a node.
    ///
    /// # Errors
    ///
    /// [`GraphError::NoSuchNode`] if the node is absent, or
    /// [`GraphError::NoSuchNodeAttr`] if the key is already gone — the
    /// executor treats both as fatal.
    pub fn remove_node_attr(&mut self, node: &N, key: &str) -> Result<AttrValue, GraphError> {
        let attrs = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| GraphError::NoSuchNode(node.to_string()))?;
        attrs.remove(key).ok_or_else(|| GraphError::NoSuchNodeAttr {
            node: node.to_string(),
            attr: key.to_owned(),
        })
    }

    /// Sets one attribute on an edge.
    ///
    /// # Errors
    ///
    /// [`GraphError::NoSuchEdge`] if the ordered pair is not connected.
    pub fn set_edge_attr(
        &mut self,
        src: &N,
        dst: &N,
        key: impl Into<String>,
        value: AttrValue,
    ) -> Result<(), GraphError> {
        let attrs = self
            .edges
            .get_mut(&(src.clone(), dst.clone()))
            .ok_or_else(|| GraphError::NoSuchEdge(src.to_string(), dst.to_string()))?;
        attrs.insert(key.into(), value);
        Ok(())
    }

    /// Deletes one attribute from an edge.
    ///
    /// # Errors
    ///
    /// [`GraphError::NoSuchEdge`] if the pair is not connected, or
    /// [`GraphError::NoSuchEdgeAttr`] if the key is already gone.
    pub fn remove_edge_attr(
        &mut self,
        src: &N,
        dst: &N,
        key: &str,
    ) -> Result<AttrValue, GraphError> {
        let attrs = self
            .edges
            .get_mut(&(src.clone(), dst.clone()))
            .ok_or_else(|| GraphError::NoSuchEdge(src.to_string(), dst.to_string()))?;
        attrs.remove(key).ok_or_else(|| GraphError::NoSuchEdgeAttr {
            src: src.to_string(),
            dst: dst.to_string(),
            attr: key.to_owned(),
        })
    }

    /// Computes a canonical hash of the entire graph state.
    ///
    /// The traversal is strictly deterministic:
    /// 1. Header: `b"MORPH_GRAPH_HASH_V1\0"`
    /// 2. Node count (u64 LE), then nodes in key order:
    ///    `b"N\0"` + name + attribute map
    /// 3. Edge count (u64 LE), then edges in key order:
    ///    `b"E\0"` + src + dst + attribute map
    ///
    /// Names are hashed as u64-LE-length-prefixed `Display` bytes; attribute
    /// maps as entry count plus length-prefixed keys and tagged values.
    /// Two graphs hash equal iff they are attribute-for-attribute identical,
    /// which is what the rollback-atomicity tests rely on.
    #[must_use]
    pub fn canonical_hash(&self) -> Digest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"MORPH_GRAPH_HASH_V1\0");

        hasher.update(&(self.nodes.len() as u64).to_le_bytes());
        for (name, attrs) in &self.nodes {
            hasher.update(b"N\0");
            hash_name(&mut hasher, name);
            hash_attrs(&mut hasher, attrs);
        }

        hasher.update(&(self.edges.len() as u64).to_le_bytes());
        for ((src, dst), attrs) in &self.edges {
            hasher.update(b"E\0");
            hash_name(&mut hasher, src);
            hash_name(&mut hasher, dst);
            hash_attrs(&mut hasher, attrs);
        }

        *hasher.finalize().as_bytes()
    }

    /// Hex rendering of [`AttributedGraph::canonical_hash`], for logs.
    #[must_use]
    pub fn canonical_hash_hex(&self) -> String {
        hex::encode(self.canonical_hash())
    }
}

impl AttributedGraph<NodeName> {
    /// Convenience constructor for host graphs from name/attribute lists.
    ///
    /// Edge endpoints must appear in `nodes`; this is a test/demo helper and
    /// debug-asserts that invariant rather than surfacing an error.
    #[must_use]
    pub fn from_parts<'a>(
        nodes: impl IntoIterator<Item = (&'a str, AttrMap)>,
        edges: impl IntoIterator<Item = (&'a str, &'a str, AttrMap)>,
    ) -> Self {
        let mut graph = Self::new();
        for (name, attrs) in nodes {
            graph.add_node_with(NodeName::new(name), attrs);
        }
        for (src, dst, attrs) in edges {
            let inserted = graph.add_edge_with(NodeName::new(src), NodeName::new(dst), attrs);
            debug_assert!(inserted.is_ok(), "from_parts edge endpoints must exist");
        }
        graph
    }
}

fn hash_name<N: GraphKey>(hasher: &mut blake3::Hasher, name: &N) {
    let bytes = name.to_string().into_bytes();
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(&bytes);
}

fn hash_attrs(hasher: &mut blake3::Hasher, attrs: &AttrMap) {
    hasher.update(&(attrs.len() as u64).to_le_bytes());
    for (key, value) in attrs {
        hasher.update(&(key.len() as u64).to_le_bytes());
        hasher.update(key.as_bytes());
        hash_value(hasher, value);
    }
}

fn hash_value(hasher: &mut blake3::Hasher, value: &AttrValue) {
    match value {
        AttrValue::Null => {
            hasher.update(b"0");
        }
        AttrValue::Bool(b) => {
            hasher.update(b"B");
            hasher.update(&[u8::from(*b)]);
        }
        AttrValue::Int(i) => {
            hasher.update(b"I");
            hasher.update(&i.to_le_bytes());
        }
        AttrValue::Float(f) => {
            hasher.update(b"F");
            hasher.update(&f.to_bits().to_le_bytes());
        }
        AttrValue::Str(s) => {
            hasher.update(b"S");
            hasher.update(&(s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        AttrValue::List(items) => {
            hasher.update(b"L");
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                hash_value(hasher, item);
            }
        }
        AttrValue::Opaque(token) => {
            hasher.update(b"O");
            hasher.update(&(token.len() as u64).to_le_bytes());
            hasher.update(token.as_bytes());
        }
    }
}

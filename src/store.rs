//! The document-store boundary.
//!
//! The host owns a hierarchical node store keyed by opaque identifiers and
//! exposes async CRUD over it. Reads can lag writes: a location created a
//! moment ago may not be visible to `get_location_id` yet, and a node created
//! under it may fail with `NotFound` until the write settles. Callers retry
//! around that window.
//!
//! `MemoryStore` is the in-process reference backend. It backs the test suite
//! and doubles as documentation of the expected semantics, including mutation
//! counting so idempotence is assertable.

use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// A node as read back from the store: opaque id, free text, recursive
/// children. Node ids are ephemeral; only the text contents are durable
/// identity material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNode {
    pub id: String,
    pub text: String,
    pub children: Vec<BlockNode>,
}

/// A node to be written, children included, in one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlock {
    pub text: String,
    pub children: Vec<NewBlock>,
}

impl NewBlock {
    pub fn leaf<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            children: Vec::new(),
        }
    }
}

/// Async CRUD over the hierarchical node store. The reconciliation engine's
/// only side-effecting dependency.
pub trait Store {
    /// Direct children of a location, with their own children read
    /// recursively.
    fn get_children(
        &self,
        location_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<BlockNode>, StoreError>> + Send;

    fn get_location_id(
        &self,
        path: &str,
    ) -> impl std::future::Future<Output = Result<Option<String>, StoreError>> + Send;

    fn list_locations_with_prefix(
        &self,
        prefix: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>, StoreError>> + Send;

    fn create_location(
        &self,
        path: &str,
    ) -> impl std::future::Future<Output = Result<String, StoreError>> + Send;

    /// Create a node (and its subtree) under `parent_id` at position `order`.
    fn create_node(
        &self,
        parent_id: &str,
        order: usize,
        block: NewBlock,
    ) -> impl std::future::Future<Output = Result<String, StoreError>> + Send;

    fn update_node(
        &self,
        id: &str,
        text: &str,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    fn delete_node(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}

/// Mutation counters exposed by `MemoryStore` for test assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationCounts {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl MutationCounts {
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

#[derive(Debug, Clone)]
struct MemNode {
    id: String,
    text: String,
    children: Vec<MemNode>,
}

impl MemNode {
    fn to_block(&self) -> BlockNode {
        BlockNode {
            id: self.id.clone(),
            text: self.text.clone(),
            children: self.children.iter().map(MemNode::to_block).collect(),
        }
    }
}

#[derive(Default)]
struct MemoryInner {
    /// path -> location id
    locations: HashMap<String, String>,
    /// location id -> root nodes
    roots: HashMap<String, Vec<MemNode>>,
    next_id: u64,
    counts: MutationCounts,
}

impl MemoryInner {
    fn fresh_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", kind, self.next_id)
    }

    fn from_new_block(&mut self, block: NewBlock) -> MemNode {
        let id = self.fresh_id("node");
        let children = block
            .children
            .into_iter()
            .map(|c| self.from_new_block(c))
            .collect();
        MemNode {
            id,
            text: block.text,
            children,
        }
    }

    fn find_parent_list(&mut self, node_id: &str) -> Option<(&mut Vec<MemNode>, usize)> {
        fn search<'a>(nodes: &'a mut Vec<MemNode>, id: &str) -> Option<(&'a mut Vec<MemNode>, usize)> {
            // Two passes keep the borrow checker satisfied: locate first,
            // then reborrow.
            if let Some(pos) = nodes.iter().position(|n| n.id == id) {
                return Some((nodes, pos));
            }
            for node in nodes.iter_mut() {
                if let Some(found) = search(&mut node.children, id) {
                    return Some(found);
                }
            }
            None
        }
        for roots in self.roots.values_mut() {
            if let Some(found) = search(roots, node_id) {
                return Some(found);
            }
        }
        None
    }

    fn find_node_mut(&mut self, node_id: &str) -> Option<&mut MemNode> {
        fn search<'a>(nodes: &'a mut Vec<MemNode>, id: &str) -> Option<&'a mut MemNode> {
            for node in nodes.iter_mut() {
                if node.id == id {
                    return Some(node);
                }
                if let Some(found) = search(&mut node.children, id) {
                    return Some(found);
                }
            }
            None
        }
        for roots in self.roots.values_mut() {
            if let Some(found) = search(roots, node_id) {
                return Some(found);
            }
        }
        None
    }
}

/// In-memory store backend. Fully consistent (no read-after-write lag);
/// latency-dependent paths are exercised in tests with failure-injecting
/// wrappers instead.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mutation_counts(&self) -> MutationCounts {
        self.inner.lock().await.counts
    }

    pub async fn reset_mutation_counts(&self) {
        self.inner.lock().await.counts = MutationCounts::default();
    }

    /// Number of root records currently on a page, for test assertions.
    pub async fn record_count(&self, path: &str) -> usize {
        let inner = self.inner.lock().await;
        inner
            .locations
            .get(path)
            .and_then(|id| inner.roots.get(id))
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Store for MemoryStore {
    async fn get_children(&self, location_id: &str) -> Result<Vec<BlockNode>, StoreError> {
        let inner = self.inner.lock().await;
        match inner.roots.get(location_id) {
            Some(nodes) => Ok(nodes.iter().map(MemNode::to_block).collect()),
            None => Err(StoreError::NotFound(location_id.to_string())),
        }
    }

    async fn get_location_id(&self, path: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.locations.get(path).cloned())
    }

    async fn list_locations_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        let mut paths: Vec<String> = inner
            .locations
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }

    async fn create_location(&self, path: &str) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(id) = inner.locations.get(path) {
            return Ok(id.clone());
        }
        let id = inner.fresh_id("page");
        inner.locations.insert(path.to_string(), id.clone());
        inner.roots.insert(id.clone(), Vec::new());
        inner.counts.creates += 1;
        Ok(id)
    }

    async fn create_node(
        &self,
        parent_id: &str,
        order: usize,
        block: NewBlock,
    ) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().await;
        let node = inner.from_new_block(block);
        let id = node.id.clone();

        if let Some(roots) = inner.roots.get_mut(parent_id) {
            let at = order.min(roots.len());
            roots.insert(at, node);
        } else if let Some(parent) = inner.find_node_mut(parent_id) {
            let at = order.min(parent.children.len());
            parent.children.insert(at, node);
        } else {
            return Err(StoreError::NotFound(parent_id.to_string()));
        }
        inner.counts.creates += 1;
        Ok(id)
    }

    async fn update_node(&self, id: &str, text: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.find_node_mut(id) {
            Some(node) => {
                node.text = text.to_string();
                inner.counts.updates += 1;
                Ok(())
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn delete_node(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.find_parent_list(id) {
            Some((siblings, pos)) => {
                siblings.remove(pos);
                inner.counts.deletes += 1;
                Ok(())
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }
}

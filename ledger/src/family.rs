//! Shared context for all merkle trees of one logical domain.

use std::sync::Arc;
use std::time::Duration;

use keel_store::NodeStore;
use keel_types::{Digest, LedgerSeq};

use crate::cache::{KeyCache, TaggedCache};
use crate::error::TreeError;
use crate::recovery::RecoveryCoordinator;
use crate::tree::{SharedNode, TreeNode};

/// Size and age bounds for one cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheLimits {
    pub size: usize,
    pub age: Duration,
}

impl CacheLimits {
    pub fn new(size: usize, age: Duration) -> Self {
        Self { size, age }
    }
}

/// Node store, caches and recovery coordinator shared by the trees of one
/// family. Cache entries may be dropped at any time; a miss falls through
/// to the node store.
pub struct Family {
    name: String,
    store: Arc<dyn NodeStore>,
    full_below: Arc<KeyCache<Digest>>,
    tree_nodes: Arc<TaggedCache<Digest, SharedNode>>,
    recovery: RecoveryCoordinator,
}

impl Family {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn NodeStore>,
        tree_nodes: CacheLimits,
        full_below: CacheLimits,
    ) -> Self {
        let name = name.into();
        Self {
            full_below: Arc::new(KeyCache::new(
                format!("{name}.full_below"),
                full_below.size,
                full_below.age,
            )),
            tree_nodes: Arc::new(TaggedCache::new(
                format!("{name}.tree_nodes"),
                tree_nodes.size,
                tree_nodes.age,
            )),
            recovery: RecoveryCoordinator::new(name.clone()),
            store,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    pub fn full_below(&self) -> &Arc<KeyCache<Digest>> {
        &self.full_below
    }

    pub fn tree_nodes(&self) -> &Arc<TaggedCache<Digest, SharedNode>> {
        &self.tree_nodes
    }

    pub fn recovery(&self) -> &RecoveryCoordinator {
        &self.recovery
    }

    /// Report a missing node belonging to the ledger at `seq`.
    pub fn missing_node(&self, seq: LedgerSeq) {
        self.recovery.notify_missing_seq(seq);
    }

    /// Report a missing node with no ledger context.
    pub fn missing_node_hash(&self, hash: Digest) {
        self.recovery.notify_missing_hash(hash);
    }

    /// Fetch and decode a tree node: cache first, then the node store.
    ///
    /// A stored object whose contents do not hash to `hash` is reported as
    /// missing.
    pub fn fetch_node(&self, hash: &Digest) -> Result<SharedNode, TreeError> {
        if let Some(node) = self.tree_nodes.get(hash) {
            return Ok(node);
        }
        let object = self
            .store
            .fetch(hash)?
            .ok_or(TreeError::MissingNode { hash: *hash })?;
        let node = TreeNode::decode(*hash, &object.data)?;
        if node.digest() != *hash {
            tracing::warn!(family = %self.name, node = %hash, "stored node does not match its digest");
            return Err(TreeError::MissingNode { hash: *hash });
        }
        let node = Arc::new(node);
        self.tree_nodes.insert(*hash, Arc::clone(&node));
        Ok(node)
    }

    /// Drop all cached nodes and full-below marks.
    pub fn reset(&self) {
        self.tree_nodes.clear();
        self.full_below.clear();
    }
}

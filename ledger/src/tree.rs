//! Content-addressed 16-way merkle tree.
//!
//! Inner nodes hold sixteen child digests (zero marks an empty branch) and
//! route keys by successive nibbles. A leaf sits at the shallowest depth at
//! which its key is unique. An empty tree has the zero root.
//!
//! Stored encodings:
//!
//! ```text
//! inner: 0x01 ++ child[0..16]         (16 * 32 bytes)
//! leaf:  0x02 ++ kind ++ key ++ data
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use keel_crypto::{prefixed_digest, HashPrefix};
use keel_store::{NodeObject, NodeObjectKind, NodeStore, StoreError};
use keel_types::Digest;

use crate::error::TreeError;
use crate::family::Family;

const INNER_TAG: u8 = 0x01;
const LEAF_TAG: u8 = 0x02;
const BRANCHES: usize = 16;

/// Which kind of tree a leaf belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LeafKind {
    State,
    Transaction,
}

impl LeafKind {
    fn prefix(self) -> HashPrefix {
        match self {
            Self::State => HashPrefix::StateLeaf,
            Self::Transaction => HashPrefix::TransactionLeaf,
        }
    }

    pub fn object_kind(self) -> NodeObjectKind {
        match self {
            Self::State => NodeObjectKind::AccountNode,
            Self::Transaction => NodeObjectKind::TransactionNode,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Self::State => 0,
            Self::Transaction => 1,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::State),
            1 => Some(Self::Transaction),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeNode {
    Inner {
        children: [Digest; BRANCHES],
    },
    Leaf {
        kind: LeafKind,
        key: Digest,
        data: Vec<u8>,
    },
}

impl TreeNode {
    pub fn digest(&self) -> Digest {
        match self {
            Self::Inner { children } => {
                let parts: Vec<&[u8]> = children.iter().map(|c| c.as_bytes().as_slice()).collect();
                prefixed_digest(HashPrefix::InnerNode, &parts)
            }
            Self::Leaf { kind, key, data } => {
                prefixed_digest(kind.prefix(), &[data.as_slice(), key.as_bytes().as_slice()])
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Inner { children } => {
                let mut out = Vec::with_capacity(1 + BRANCHES * 32);
                out.push(INNER_TAG);
                for child in children {
                    out.extend_from_slice(child.as_bytes());
                }
                out
            }
            Self::Leaf { kind, key, data } => {
                let mut out = Vec::with_capacity(2 + 32 + data.len());
                out.push(LEAF_TAG);
                out.push(kind.to_byte());
                out.extend_from_slice(key.as_bytes());
                out.extend_from_slice(data);
                out
            }
        }
    }

    /// Decode a stored node. `hash` is only used for error reporting.
    pub fn decode(hash: Digest, bytes: &[u8]) -> Result<Self, TreeError> {
        let malformed = |reason: &str| TreeError::Malformed {
            hash,
            reason: reason.to_string(),
        };
        let (tag, body) = bytes.split_first().ok_or_else(|| malformed("empty"))?;
        match *tag {
            INNER_TAG => {
                if body.len() != BRANCHES * 32 {
                    return Err(malformed("inner node has wrong length"));
                }
                let mut children = [Digest::ZERO; BRANCHES];
                for (slot, chunk) in children.iter_mut().zip(body.chunks_exact(32)) {
                    let mut arr = [0u8; 32];
                    arr.copy_from_slice(chunk);
                    *slot = Digest::new(arr);
                }
                Ok(Self::Inner { children })
            }
            LEAF_TAG => {
                if body.len() < 33 {
                    return Err(malformed("leaf node too short"));
                }
                let kind = LeafKind::from_byte(body[0]).ok_or_else(|| malformed("unknown leaf kind"))?;
                let mut key = [0u8; 32];
                key.copy_from_slice(&body[1..33]);
                Ok(Self::Leaf {
                    kind,
                    key: Digest::new(key),
                    data: body[33..].to_vec(),
                })
            }
            _ => Err(malformed("unknown node tag")),
        }
    }
}

/// Collects leaves and writes the resulting tree to a node store.
#[derive(Clone, Debug)]
pub struct TreeBuilder {
    kind: LeafKind,
    items: BTreeMap<Digest, Vec<u8>>,
}

impl TreeBuilder {
    pub fn new(kind: LeafKind) -> Self {
        Self {
            kind,
            items: BTreeMap::new(),
        }
    }

    /// Start from every leaf of an existing tree.
    pub fn from_tree(kind: LeafKind, tree: &MerkleTree, family: &Family) -> Result<Self, TreeError> {
        let mut builder = Self::new(kind);
        for (key, data) in tree.leaves(family)? {
            builder.items.insert(key, data);
        }
        Ok(builder)
    }

    pub fn kind(&self) -> LeafKind {
        self.kind
    }

    /// Insert or replace a leaf. Returns the previous data for `key`.
    pub fn insert(&mut self, key: Digest, data: Vec<u8>) -> Option<Vec<u8>> {
        self.items.insert(key, data)
    }

    pub fn remove(&mut self, key: &Digest) -> Option<Vec<u8>> {
        self.items.remove(key)
    }

    pub fn contains(&self, key: &Digest) -> bool {
        self.items.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Root digest of the tree as it stands, without storing anything.
    pub fn root(&self) -> Digest {
        let items: Vec<(&Digest, &Vec<u8>)> = self.items.iter().collect();
        let mut discard = |_: &TreeNode, _: Digest| -> Result<(), StoreError> { Ok(()) };
        build(self.kind, &items, 0, &mut discard).unwrap_or(Digest::ZERO)
    }

    /// Write every node to `store` and return the root digest.
    pub fn flush(&self, store: &dyn NodeStore) -> Result<Digest, StoreError> {
        let items: Vec<(&Digest, &Vec<u8>)> = self.items.iter().collect();
        let object_kind = self.kind.object_kind();
        let mut sink = |node: &TreeNode, digest: Digest| {
            store.store(NodeObject::new(object_kind, digest, node.encode()))
        };
        build(self.kind, &items, 0, &mut sink)
    }
}

fn build(
    kind: LeafKind,
    items: &[(&Digest, &Vec<u8>)],
    depth: usize,
    sink: &mut dyn FnMut(&TreeNode, Digest) -> Result<(), StoreError>,
) -> Result<Digest, StoreError> {
    if items.is_empty() {
        return Ok(Digest::ZERO);
    }
    let node = if items.len() == 1 && depth > 0 {
        let (key, data) = items[0];
        TreeNode::Leaf {
            kind,
            key: *key,
            data: data.clone(),
        }
    } else {
        let mut children = [Digest::ZERO; BRANCHES];
        let mut start = 0;
        for (branch, child) in children.iter_mut().enumerate() {
            let count = items[start..]
                .iter()
                .take_while(|(key, _)| key.nibble(depth) == branch)
                .count();
            *child = build(kind, &items[start..start + count], depth + 1, sink)?;
            start += count;
        }
        TreeNode::Inner { children }
    };
    let digest = node.digest();
    sink(&node, digest)?;
    Ok(digest)
}

/// Read access to a stored tree, identified by its root digest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MerkleTree {
    root: Digest,
}

impl MerkleTree {
    pub fn new(root: Digest) -> Self {
        Self { root }
    }

    pub fn root(&self) -> Digest {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_zero()
    }

    /// Look up the leaf data for `key`.
    pub fn get(&self, key: &Digest, family: &Family) -> Result<Option<Vec<u8>>, TreeError> {
        let mut current = self.root;
        let mut depth = 0;
        while !current.is_zero() {
            let node = family.fetch_node(&current)?;
            match node.as_ref() {
                TreeNode::Inner { children } => {
                    if depth >= 64 {
                        return Ok(None);
                    }
                    current = children[key.nibble(depth)];
                    depth += 1;
                }
                TreeNode::Leaf { key: leaf_key, data, .. } => {
                    return Ok((leaf_key == key).then(|| data.clone()));
                }
            }
        }
        Ok(None)
    }

    /// Every leaf in key order.
    pub fn leaves(&self, family: &Family) -> Result<Vec<(Digest, Vec<u8>)>, TreeError> {
        let mut out = Vec::new();
        if self.root.is_zero() {
            return Ok(out);
        }
        let mut stack = vec![self.root];
        while let Some(digest) = stack.pop() {
            let node = family.fetch_node(&digest)?;
            match node.as_ref() {
                TreeNode::Inner { children } => {
                    stack.extend(children.iter().rev().filter(|c| !c.is_zero()));
                }
                TreeNode::Leaf { key, data, .. } => out.push((*key, data.clone())),
            }
        }
        Ok(out)
    }

    /// Visit the whole tree and return the digests of nodes that are not
    /// available locally, stopping after `max_missing` of them.
    ///
    /// Subtrees found complete are recorded in the family's full-below
    /// cache and skipped by later walks.
    pub fn walk(&self, family: &Family, max_missing: usize) -> Vec<Digest> {
        let mut missing = Vec::new();
        if !self.root.is_zero() && max_missing > 0 {
            walk_node(self.root, family, &mut missing, max_missing);
        }
        missing
    }
}

fn walk_node(digest: Digest, family: &Family, missing: &mut Vec<Digest>, max_missing: usize) -> bool {
    if family.full_below().touch(&digest) {
        return true;
    }
    let node = match family.fetch_node(&digest) {
        Ok(node) => node,
        Err(e) => {
            tracing::debug!(family = family.name(), node = %digest, error = %e, "node unavailable during walk");
            missing.push(digest);
            return false;
        }
    };
    let TreeNode::Inner { children } = node.as_ref() else {
        return true;
    };
    let mut complete = true;
    for child in children.iter().filter(|c| !c.is_zero()) {
        if missing.len() >= max_missing {
            return false;
        }
        complete &= walk_node(*child, family, missing, max_missing);
    }
    if complete {
        family.full_below().insert(digest);
    }
    complete
}

/// Shared handle to a decoded node, as held by the tree-node cache.
pub type SharedNode = Arc<TreeNode>;

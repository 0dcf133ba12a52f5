//! Content-addressed node storage.

use serde::{Deserialize, Serialize};

use keel_types::Digest;

use crate::StoreError;

/// What a stored object holds. Informational; the digest is authoritative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeObjectKind {
    /// A serialized ledger header.
    Ledger,
    /// A node of an account-state tree.
    AccountNode,
    /// A node of a transaction tree.
    TransactionNode,
    Unknown,
}

impl NodeObjectKind {
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Ledger => 1,
            Self::AccountNode => 3,
            Self::TransactionNode => 4,
            Self::Unknown => 0,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => Self::Ledger,
            3 => Self::AccountNode,
            4 => Self::TransactionNode,
            _ => Self::Unknown,
        }
    }
}

/// A blob addressed by the digest of its contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeObject {
    pub kind: NodeObjectKind,
    pub hash: Digest,
    pub data: Vec<u8>,
}

impl NodeObject {
    pub fn new(kind: NodeObjectKind, hash: Digest, data: Vec<u8>) -> Self {
        Self { kind, hash, data }
    }
}

/// Trait for the content-addressed node store.
///
/// Objects are immutable once written: storing an object whose digest is
/// already present is a no-op.
pub trait NodeStore: Send + Sync {
    /// Human-readable backend name, used in logs.
    fn name(&self) -> &str;

    /// Fetch an object by digest. `Ok(None)` means not present locally.
    fn fetch(&self, hash: &Digest) -> Result<Option<NodeObject>, StoreError>;

    /// Store an object keyed by its digest.
    fn store(&self, object: NodeObject) -> Result<(), StoreError>;

    /// Visit every stored object.
    fn for_each(&self, visit: &mut dyn FnMut(NodeObject)) -> Result<(), StoreError>;

    /// Copy every object of `source` into this store. Returns the number of
    /// objects visited.
    fn import(&self, source: &dyn NodeStore) -> Result<u64, StoreError> {
        let mut count = 0u64;
        let mut failure = None;
        source.for_each(&mut |object| {
            if failure.is_some() {
                return;
            }
            match self.store(object) {
                Ok(()) => count += 1,
                Err(e) => failure = Some(e),
            }
        })?;
        match failure {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }
}

//! Blake2b hashing for ledgers, tree nodes and transactions.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest as _};
use keel_types::Digest;

type Blake2b256 = Blake2b<U32>;

/// Domain separators prepended to hashed content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashPrefix {
    /// Ledger header.
    LedgerHeader,
    /// Inner node of a merkle tree.
    InnerNode,
    /// Leaf of an account-state tree.
    StateLeaf,
    /// Leaf of a transaction tree.
    TransactionLeaf,
    /// Transaction identifier.
    TransactionId,
    /// Key derivation for state entries.
    EntryKey,
}

impl HashPrefix {
    pub fn bytes(self) -> [u8; 4] {
        match self {
            Self::LedgerHeader => *b"LWR\0",
            Self::InnerNode => *b"MIN\0",
            Self::StateLeaf => *b"MLN\0",
            Self::TransactionLeaf => *b"SND\0",
            Self::TransactionId => *b"TXN\0",
            Self::EntryKey => *b"KEY\0",
        }
    }
}

/// Compute a 256-bit Blake2b hash of arbitrary data.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Hash multiple byte slices in sequence (avoids concatenation allocation).
pub fn blake2b_256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Hash `parts` behind `prefix`, producing a [`Digest`].
pub fn prefixed_digest(prefix: HashPrefix, parts: &[&[u8]]) -> Digest {
    let mut hasher = Blake2b256::new();
    hasher.update(prefix.bytes());
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    Digest::new(output)
}

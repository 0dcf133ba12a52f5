use thiserror::Error;

use keel_types::Digest;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("missing tree node {hash}")]
    MissingNode { hash: Digest },

    #[error("malformed tree node {hash}: {reason}")]
    Malformed { hash: Digest, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] keel_store::StoreError),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger {seq} is immutable")]
    Immutable { seq: u32 },

    #[error("ledger {seq} is not closed")]
    NotClosed { seq: u32 },

    #[error("invalid ledger entry: {reason}")]
    InvalidEntry { reason: String },

    #[error("ledger {seq} has no successor")]
    SequenceExhausted { seq: u32 },

    #[error("duplicate transaction {0}")]
    DuplicateTransaction(Digest),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("storage error: {0}")]
    Storage(#[from] keel_store::StoreError),
}

//! Persistent ledger index: sequence and hash lookups for closed ledgers.

use serde::{Deserialize, Serialize};

use keel_types::{Digest, LedgerSeq};

use crate::StoreError;

/// A ledger as recorded in the index.
///
/// `hash` is the hash claimed when the ledger was saved; `header` holds the
/// serialized header bytes. The two are stored separately so that a loader
/// can recompute the hash and detect corruption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub seq: LedgerSeq,
    pub hash: Digest,
    pub header: Vec<u8>,
}

/// Trait for the persistent ledger index.
pub trait LedgerIndex: Send + Sync {
    /// Record a closed ledger, replacing any earlier record for its sequence.
    fn save(&self, record: &LedgerRecord) -> Result<(), StoreError>;

    /// The record with the highest sequence, if any.
    fn load_most_recent(&self) -> Result<Option<LedgerRecord>, StoreError>;

    fn load_by_hash(&self, hash: &Digest) -> Result<Option<LedgerRecord>, StoreError>;

    fn load_by_sequence(&self, seq: LedgerSeq) -> Result<Option<LedgerRecord>, StoreError>;

    /// Hash of the ledger recorded at `seq`.
    fn hash_by_seq(&self, seq: LedgerSeq) -> Result<Option<Digest>, StoreError> {
        Ok(self.load_by_sequence(seq)?.map(|r| r.hash))
    }
}

//! Ledger acquisition contracts.

use std::sync::Arc;
use std::time::Duration;

use keel_store::NodeObject;
use keel_types::{Digest, LedgerSeq};

use crate::ledger::Ledger;

/// Why a ledger is being acquired. Startup acquisitions block the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AcquireReason {
    Generic,
    Startup,
}

pub trait LedgerAcquirer: Send + Sync {
    /// Request a ledger in the background. Never blocks on the network.
    fn acquire(&self, hash: Digest, seq: LedgerSeq, reason: AcquireReason);

    /// Obtain a ledger, waiting for the network if it is not available
    /// locally. `None` when it cannot be obtained.
    fn acquire_blocking(&self, hash: Digest, reason: AcquireReason) -> Option<Arc<Ledger>>;
}

/// Maps a ledger sequence to the hash of the ledger recorded at it.
pub trait LedgerHashResolver: Send + Sync {
    fn hash_by_seq(&self, seq: LedgerSeq) -> Option<Digest>;
}

/// The peer boundary: retrieves the node objects making up a ledger
/// (header plus tree nodes).
pub trait LedgerFetcher: Send + Sync {
    fn fetch_ledger(&self, hash: &Digest, timeout: Duration) -> Vec<NodeObject>;
}

/// A fetcher with no peers.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPeers;

impl LedgerFetcher for NoPeers {
    fn fetch_ledger(&self, _hash: &Digest, _timeout: Duration) -> Vec<NodeObject> {
        Vec::new()
    }
}

//! Nullable peers: canned ledger data and recorded requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keel_ledger::{AcquireReason, Ledger, LedgerAcquirer, LedgerFetcher};
use keel_store::NodeObject;
use keel_types::{Digest, LedgerSeq};

/// A peer set that answers with whatever objects were registered for a
/// ledger hash.
#[derive(Default)]
pub struct NullFetcher {
    ledgers: Mutex<HashMap<Digest, Vec<NodeObject>>>,
    requests: Mutex<Vec<Digest>>,
}

impl NullFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `objects` for requests of ledger `hash`.
    pub fn serve(&self, hash: Digest, objects: Vec<NodeObject>) {
        self.ledgers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(hash, objects);
    }

    pub fn requests(&self) -> Vec<Digest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl LedgerFetcher for NullFetcher {
    fn fetch_ledger(&self, hash: &Digest, _timeout: Duration) -> Vec<NodeObject> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(*hash);
        self.ledgers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(hash)
            .cloned()
            .unwrap_or_default()
    }
}

/// Records acquisition requests; blocking requests are answered from a
/// preset table.
#[derive(Default)]
pub struct NullAcquirer {
    calls: Mutex<Vec<(Digest, LedgerSeq, AcquireReason)>>,
    ledgers: Mutex<HashMap<Digest, Arc<Ledger>>>,
}

impl NullAcquirer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide(&self, ledger: Arc<Ledger>) {
        self.ledgers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(ledger.hash(), ledger);
    }

    /// Every request, blocking ones recorded with sequence 0.
    pub fn calls(&self) -> Vec<(Digest, LedgerSeq, AcquireReason)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl LedgerAcquirer for NullAcquirer {
    fn acquire(&self, hash: Digest, seq: LedgerSeq, reason: AcquireReason) {
        tracing::trace!(%hash, seq, ?reason, "null acquire");
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((hash, seq, reason));
    }

    fn acquire_blocking(&self, hash: Digest, reason: AcquireReason) -> Option<Arc<Ledger>> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((hash, 0, reason));
        self.ledgers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&hash)
            .cloned()
    }
}

//! Replay of a historical ledger close.

use std::collections::BTreeMap;
use std::sync::Arc;

use keel_types::NetTime;

use crate::entry::Transaction;
use crate::ledger::Ledger;

/// Everything needed to redo the close of `source` on top of `parent`:
/// the source's close parameters and its transactions keyed by their
/// recorded position.
#[derive(Debug)]
pub struct ReplayManifest {
    source: Arc<Ledger>,
    parent: Arc<Ledger>,
    txs: BTreeMap<u32, Arc<Transaction>>,
}

impl ReplayManifest {
    pub fn new(source: Arc<Ledger>, parent: Arc<Ledger>) -> Self {
        Self {
            source,
            parent,
            txs: BTreeMap::new(),
        }
    }

    pub fn source(&self) -> &Arc<Ledger> {
        &self.source
    }

    pub fn parent(&self) -> &Arc<Ledger> {
        &self.parent
    }

    /// Close time the source ledger was accepted with.
    pub fn close_time(&self) -> NetTime {
        self.source.close_time()
    }

    pub fn close_flags(&self) -> u8 {
        self.source.close_flags()
    }

    pub fn parent_close_time(&self) -> NetTime {
        self.parent.close_time()
    }

    /// Record `tx` at its original position. Returns any transaction
    /// previously recorded there.
    pub fn insert(&mut self, position: u32, tx: Arc<Transaction>) -> Option<Arc<Transaction>> {
        self.txs.insert(position, tx)
    }

    /// Transactions in original close order.
    pub fn transactions(&self) -> &BTreeMap<u32, Arc<Transaction>> {
        &self.txs
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}

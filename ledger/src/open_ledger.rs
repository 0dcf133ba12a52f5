//! The working ledger that accumulates transactions on top of the last
//! closed ledger.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use keel_types::{Digest, LedgerSeq};

use crate::entry::Transaction;
use crate::error::LedgerError;
use crate::ledger::Ledger;

/// Record of one change applied to an open view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Modification {
    TxInserted(Digest),
}

/// An immutable snapshot of the open ledger.
#[derive(Clone, Debug)]
pub struct OpenView {
    parent: Arc<Ledger>,
    txs: BTreeMap<Digest, Arc<Transaction>>,
    log: Vec<Modification>,
}

impl OpenView {
    fn new(parent: Arc<Ledger>) -> Self {
        Self {
            parent,
            txs: BTreeMap::new(),
            log: Vec::new(),
        }
    }

    pub fn parent(&self) -> &Arc<Ledger> {
        &self.parent
    }

    pub fn seq(&self) -> LedgerSeq {
        self.parent.seq() + 1
    }

    pub fn tx_count(&self) -> usize {
        self.txs.len()
    }

    pub fn contains_tx(&self, id: &Digest) -> bool {
        self.txs.contains_key(id)
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Arc<Transaction>> {
        self.txs.values()
    }

    pub fn log(&self) -> &[Modification] {
        &self.log
    }

    /// Add a transaction without applying it.
    pub fn raw_tx_insert(&mut self, tx: Arc<Transaction>) -> Result<(), LedgerError> {
        let id = tx.id();
        if self.txs.contains_key(&id) {
            return Err(LedgerError::DuplicateTransaction(id));
        }
        self.txs.insert(id, tx);
        self.log.push(Modification::TxInserted(id));
        Ok(())
    }
}

/// Holds the current [`OpenView`]. Readers take snapshots; writers build a
/// modified copy and swap it in.
pub struct OpenLedger {
    current: RwLock<Arc<OpenView>>,
    modify_lock: Mutex<()>,
}

impl OpenLedger {
    /// Open a ledger on top of `parent`, which must be closed.
    pub fn new(parent: Arc<Ledger>) -> Result<Self, LedgerError> {
        if !parent.is_closed() {
            return Err(LedgerError::NotClosed { seq: parent.seq() });
        }
        Ok(Self {
            current: RwLock::new(Arc::new(OpenView::new(parent))),
            modify_lock: Mutex::new(()),
        })
    }

    pub fn current(&self) -> Arc<OpenView> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Apply `f` to a copy of the current view. The copy replaces the
    /// current view when `f` returns `Ok(true)`.
    pub fn modify<F>(&self, f: F) -> Result<bool, LedgerError>
    where
        F: FnOnce(&mut OpenView) -> Result<bool, LedgerError>,
    {
        let _guard = self.modify_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = OpenView::clone(&self.current());
        let changed = f(&mut next)?;
        if changed {
            *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(next);
        }
        Ok(changed)
    }
}

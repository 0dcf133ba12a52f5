//! Tracks the node's ledgers: the last closed ledger, the last validated
//! ledger, the open ledger built on top of them, and recent history.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use keel_ledger::{Ledger, LedgerHashResolver, OpenLedger, ReplayManifest, Sweepable, TaggedCache};
use keel_store::{LedgerIndex, NodeStore};
use keel_types::{Clock, Digest, LedgerSeq};

use crate::metrics::NodeMetrics;
use crate::NodeError;

/// A validated ledger older than this means the node has fallen behind.
pub const MAX_VALIDATED_AGE: Duration = Duration::from_secs(180);

pub struct LedgerMaster {
    history: TaggedCache<Digest, Arc<Ledger>>,
    hashes: Mutex<BTreeMap<LedgerSeq, Digest>>,
    nodes: Arc<dyn NodeStore>,
    index: Arc<dyn LedgerIndex>,
    clock: Arc<dyn Clock>,
    metrics: Arc<NodeMetrics>,
    closed: RwLock<Option<Arc<Ledger>>>,
    validated: RwLock<Option<Arc<Ledger>>>,
    open: RwLock<Option<Arc<OpenLedger>>>,
    range: Mutex<Option<(LedgerSeq, LedgerSeq)>>,
    replay: Mutex<Option<ReplayManifest>>,
}

impl LedgerMaster {
    /// History starts unbounded so nothing is evicted during startup; see
    /// [`tune`](Self::tune).
    pub fn new(
        nodes: Arc<dyn NodeStore>,
        index: Arc<dyn LedgerIndex>,
        clock: Arc<dyn Clock>,
        metrics: Arc<NodeMetrics>,
    ) -> Self {
        Self {
            history: TaggedCache::new("ledger_history", 0, Duration::MAX),
            hashes: Mutex::new(BTreeMap::new()),
            nodes,
            index,
            clock,
            metrics,
            closed: RwLock::new(None),
            validated: RwLock::new(None),
            open: RwLock::new(None),
            range: Mutex::new(None),
            replay: Mutex::new(None),
        }
    }

    /// Bound the history cache.
    pub fn tune(&self, size: usize, age: Duration) {
        self.history.set_target_size(size);
        self.history.set_target_age(age);
        tracing::debug!(size, age_secs = age.as_secs(), "ledger history tuned");
    }

    /// Persist `ledger`: header into the node store, record into the index,
    /// and remember it in history.
    pub fn store_ledger(&self, ledger: Arc<Ledger>) -> Result<(), NodeError> {
        self.nodes.store(ledger.to_node_object()?)?;
        self.index.save(&ledger.to_record()?)?;
        self.hashes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(ledger.seq(), ledger.hash());
        self.history.insert(ledger.hash(), ledger);
        Ok(())
    }

    /// Make `ledger` the last closed ledger.
    pub fn switch_lcl(&self, ledger: Arc<Ledger>) -> Result<(), NodeError> {
        if !ledger.is_closed() {
            return Err(NodeError::Ledger(keel_ledger::LedgerError::NotClosed {
                seq: ledger.seq(),
            }));
        }
        self.store_ledger(Arc::clone(&ledger))?;
        tracing::info!(seq = ledger.seq(), hash = %ledger.hash(), "last closed ledger switched");
        self.metrics.closed_ledger_seq.set(i64::from(ledger.seq()));
        *self.closed.write().unwrap_or_else(|e| e.into_inner()) = Some(ledger);
        Ok(())
    }

    /// Treat `ledger` as validated without waiting for validations.
    pub fn force_valid(&self, ledger: Arc<Ledger>) {
        ledger.set_validated();
        tracing::debug!(seq = ledger.seq(), "ledger forced valid");
        *self.validated.write().unwrap_or_else(|e| e.into_inner()) = Some(ledger);
    }

    pub fn set_ledger_range_present(&self, min: LedgerSeq, max: LedgerSeq) {
        *self.range.lock().unwrap_or_else(|e| e.into_inner()) = Some((min, max));
    }

    pub fn ledger_range(&self) -> Option<(LedgerSeq, LedgerSeq)> {
        *self.range.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn install_open_ledger(&self, open: OpenLedger) -> Arc<OpenLedger> {
        let open = Arc::new(open);
        *self.open.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&open));
        open
    }

    pub fn open_ledger(&self) -> Option<Arc<OpenLedger>> {
        self.open.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn closed_ledger(&self) -> Option<Arc<Ledger>> {
        self.closed.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn validated_ledger(&self) -> Option<Arc<Ledger>> {
        self.validated.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Hand over transactions to be re-applied when the next ledger closes.
    pub fn take_replay(&self, manifest: ReplayManifest) {
        tracing::info!(
            source = manifest.source().seq(),
            transactions = manifest.len(),
            "replay queued"
        );
        *self.replay.lock().unwrap_or_else(|e| e.into_inner()) = Some(manifest);
    }

    pub fn has_replay(&self) -> bool {
        self.replay
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Remove and return the pending replay.
    pub fn release_replay(&self) -> Option<ReplayManifest> {
        self.replay.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Whether the last validated ledger is recent enough to serve from.
    pub fn is_caught_up(&self) -> Result<(), String> {
        let Some(validated) = self.validated_ledger() else {
            return Err("No recently-validated ledger".to_string());
        };
        let now = self.clock.close_time().as_secs();
        let age = now.saturating_sub(validated.close_time().as_secs());
        if u64::from(age) > MAX_VALIDATED_AGE.as_secs() {
            return Err("No recently-validated ledger".to_string());
        }
        Ok(())
    }

}

impl LedgerHashResolver for LedgerMaster {
    fn hash_by_seq(&self, seq: LedgerSeq) -> Option<Digest> {
        if let Some(hash) = self
            .hashes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&seq)
        {
            return Some(*hash);
        }
        match self.index.hash_by_seq(seq) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::warn!(seq, error = %e, "ledger index lookup failed");
                None
            }
        }
    }
}

impl Sweepable for LedgerMaster {
    fn name(&self) -> &str {
        "ledger_history"
    }

    /// Ages out history, then forgets sequence mappings of ledgers no
    /// longer held. The index still resolves those.
    fn sweep(&self) {
        self.history.sweep();
        self.hashes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, hash| self.history.contains(hash));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_ledger::{CacheLimits, Family, LedgerHeader};
    use keel_nullables::{NullClock, NullLedgerIndex, NullNodeStore};
    use keel_types::NetTime;

    fn master() -> (LedgerMaster, Arc<Family>, Arc<NullClock>) {
        let nodes: Arc<dyn NodeStore> = Arc::new(NullNodeStore::new());
        let family = Arc::new(Family::new(
            "test",
            Arc::clone(&nodes),
            CacheLimits::new(0, Duration::from_secs(60)),
            CacheLimits::new(0, Duration::from_secs(60)),
        ));
        let clock = Arc::new(NullClock::new(0));
        let master = LedgerMaster::new(
            nodes,
            Arc::new(NullLedgerIndex::new()),
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::new(NodeMetrics::new().unwrap()),
        );
        (master, family, clock)
    }

    fn closed(seq: u32, family: &Arc<Family>) -> Arc<Ledger> {
        let header = LedgerHeader {
            close_time: NetTime::new(seq * 10),
            ..LedgerHeader::empty(seq)
        };
        Arc::new(Ledger::loaded(header, Arc::clone(family)))
    }

    #[test]
    fn switch_lcl_records_hash_for_sequence() {
        let (master, family, _) = master();
        let ledger = closed(5, &family);
        master.switch_lcl(Arc::clone(&ledger)).unwrap();
        assert_eq!(master.closed_ledger().unwrap().hash(), ledger.hash());
        assert_eq!(master.hash_by_seq(5), Some(ledger.hash()));
        assert_eq!(master.hash_by_seq(6), None);
        assert!(master.history.contains(&ledger.hash()));
    }

    #[test]
    fn switch_lcl_rejects_open_ledger() {
        let (master, family, _) = master();
        let open = Arc::new(Ledger::new(LedgerHeader::empty(3), family));
        assert!(master.switch_lcl(open).is_err());
        assert!(master.closed_ledger().is_none());
    }

    #[test]
    fn caught_up_needs_fresh_validated_ledger() {
        let (master, family, clock) = master();
        assert!(master.is_caught_up().is_err());

        let ledger = closed(30, &family);
        clock.set(u64::from(ledger.close_time().as_secs()) + keel_types::NETWORK_EPOCH_OFFSET + 10);
        master.force_valid(Arc::clone(&ledger));
        assert!(ledger.is_validated());
        assert!(master.is_caught_up().is_ok());

        clock.advance(MAX_VALIDATED_AGE.as_secs() + 1);
        assert_eq!(
            master.is_caught_up().unwrap_err(),
            "No recently-validated ledger"
        );
    }

    #[test]
    fn tuned_history_evicts_on_sweep() {
        let (master, family, _) = master();
        let ledgers: Vec<Arc<Ledger>> = (1..=4).map(|seq| closed(seq, &family)).collect();
        for ledger in &ledgers {
            master.store_ledger(Arc::clone(ledger)).unwrap();
        }
        assert_eq!(master.hashes.lock().unwrap().len(), 4);

        master.tune(2, Duration::from_secs(60));
        master.sweep();
        assert_eq!(master.history.len(), 2);
        // Mappings follow history; the index still resolves evicted ledgers.
        assert_eq!(master.hashes.lock().unwrap().len(), 2);
        for ledger in &ledgers {
            assert_eq!(master.hash_by_seq(ledger.seq()), Some(ledger.hash()));
        }
    }
}

//! Ledgers being acquired from peers.
//!
//! An [`InboundLedger`] becomes complete once its header and both trees
//! can be read from the local node store. [`InboundLedgers`] deduplicates
//! acquisitions, fetches missing data through the [`LedgerFetcher`] and
//! writes it into the store.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use keel_ledger::{
    AcquireReason, Family, JobScheduler, JobType, Ledger, LedgerAcquirer, LedgerFetcher,
    LedgerHeader, Sweepable, TaggedCache,
};
use keel_store::{NodeObject, NodeObjectKind};
use keel_types::{Digest, LedgerSeq};

use crate::metrics::NodeMetrics;

/// How long a finished or abandoned acquisition is remembered.
pub const INBOUND_LIFETIME: Duration = Duration::from_secs(60);

pub struct InboundLedger {
    hash: Digest,
    seq: LedgerSeq,
    reason: AcquireReason,
    family: Arc<Family>,
    ledger: OnceLock<Arc<Ledger>>,
}

impl InboundLedger {
    pub fn new(hash: Digest, seq: LedgerSeq, reason: AcquireReason, family: Arc<Family>) -> Self {
        Self {
            hash,
            seq,
            reason,
            family,
            ledger: OnceLock::new(),
        }
    }

    pub fn hash(&self) -> Digest {
        self.hash
    }

    pub fn seq(&self) -> LedgerSeq {
        self.seq
    }

    pub fn reason(&self) -> AcquireReason {
        self.reason
    }

    /// Try to assemble the ledger from the local node store. Succeeds when
    /// the header hashes to the wanted digest and neither tree is missing
    /// any node.
    pub fn check_local(&self) -> bool {
        if self.ledger.get().is_some() {
            return true;
        }
        let object = match self.family.store().fetch(&self.hash) {
            Ok(Some(object)) if object.kind == NodeObjectKind::Ledger => object,
            Ok(_) => return false,
            Err(e) => {
                tracing::warn!(hash = %self.hash, error = %e, "node store read failed");
                return false;
            }
        };
        let header = match LedgerHeader::from_bytes(&object.data) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!(hash = %self.hash, error = %e, "stored ledger header unreadable");
                return false;
            }
        };
        if header.compute_hash() != self.hash {
            tracing::warn!(hash = %self.hash, "stored ledger header hashes differently");
            return false;
        }
        let ledger = Ledger::loaded(header, Arc::clone(&self.family));
        let missing = ledger.missing_nodes(1);
        if !missing.is_empty() {
            tracing::debug!(hash = %self.hash, first_missing = %missing[0], "ledger incomplete locally");
            return false;
        }
        let _ = self.ledger.set(Arc::new(ledger));
        true
    }

    /// Store objects received from peers, then re-check.
    pub fn receive(&self, objects: Vec<NodeObject>) -> bool {
        let mut stored = 0usize;
        for object in objects {
            if object.kind == NodeObjectKind::Unknown {
                continue;
            }
            match self.family.store().store(object) {
                Ok(()) => stored += 1,
                Err(e) => tracing::warn!(hash = %self.hash, error = %e, "failed to store node"),
            }
        }
        tracing::debug!(hash = %self.hash, stored, "received ledger data");
        self.check_local()
    }

    pub fn ledger(&self) -> Option<Arc<Ledger>> {
        self.ledger.get().cloned()
    }

    pub fn is_complete(&self) -> bool {
        self.ledger.get().is_some()
    }
}

pub struct InboundLedgers {
    family: Arc<Family>,
    fetcher: Arc<dyn LedgerFetcher>,
    scheduler: Arc<dyn JobScheduler>,
    metrics: Arc<NodeMetrics>,
    timeout: Duration,
    active: TaggedCache<Digest, Arc<InboundLedger>>,
}

impl InboundLedgers {
    pub fn new(
        family: Arc<Family>,
        fetcher: Arc<dyn LedgerFetcher>,
        scheduler: Arc<dyn JobScheduler>,
        metrics: Arc<NodeMetrics>,
        timeout: Duration,
    ) -> Self {
        Self {
            family,
            fetcher,
            scheduler,
            metrics,
            timeout,
            active: TaggedCache::new("inbound_ledgers", 0, INBOUND_LIFETIME),
        }
    }

    /// The acquisition for `hash`, created if new. The flag is `true` when
    /// it was created by this call.
    fn find_or_create(
        &self,
        hash: Digest,
        seq: LedgerSeq,
        reason: AcquireReason,
    ) -> (Arc<InboundLedger>, bool) {
        let mut created = false;
        let inbound = self.active.update(hash, |existing| match existing {
            Some(inbound) => Arc::clone(inbound),
            None => {
                created = true;
                Arc::new(InboundLedger::new(hash, seq, reason, Arc::clone(&self.family)))
            }
        });
        (inbound, created)
    }

    pub fn find(&self, hash: &Digest) -> Option<Arc<InboundLedger>> {
        self.active.get(hash)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

impl LedgerAcquirer for InboundLedgers {
    fn acquire(&self, hash: Digest, seq: LedgerSeq, reason: AcquireReason) {
        let (inbound, created) = self.find_or_create(hash, seq, reason);
        if !created || inbound.check_local() {
            return;
        }
        self.metrics.acquisitions_requested.inc();
        tracing::info!(%hash, seq, ?reason, "acquiring ledger");

        let fetcher = Arc::clone(&self.fetcher);
        let timeout = self.timeout;
        let scheduled = self.scheduler.schedule(
            JobType::LedgerAcquire,
            "acquire_ledger",
            Box::new(move || {
                let objects = fetcher.fetch_ledger(&inbound.hash(), timeout);
                if inbound.receive(objects) {
                    tracing::info!(hash = %inbound.hash(), "ledger acquired");
                } else {
                    tracing::debug!(hash = %inbound.hash(), "ledger still incomplete");
                }
            }),
        );
        if !scheduled {
            tracing::debug!(%hash, "acquisition not scheduled, job queue stopping");
            self.active.remove(&hash);
        }
    }

    fn acquire_blocking(&self, hash: Digest, reason: AcquireReason) -> Option<Arc<Ledger>> {
        let (inbound, _) = self.find_or_create(hash, 0, reason);
        if inbound.check_local() {
            return inbound.ledger();
        }
        self.metrics.acquisitions_requested.inc();
        tracing::info!(%hash, ?reason, timeout_secs = self.timeout.as_secs(), "waiting for ledger from peers");
        let objects = self.fetcher.fetch_ledger(&hash, self.timeout);
        if inbound.receive(objects) {
            inbound.ledger()
        } else {
            tracing::warn!(%hash, "ledger not available from peers");
            None
        }
    }
}

impl Sweepable for InboundLedgers {
    fn name(&self) -> &str {
        "inbound_ledgers"
    }

    fn sweep(&self) {
        self.active.sweep();
    }
}

/// Transaction sets held for the next close, keyed by set hash. Replay
/// hands over the set of the ledger it re-applies.
pub struct InboundTxSets {
    sets: TaggedCache<Digest, Arc<Vec<Digest>>>,
}

impl InboundTxSets {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            sets: TaggedCache::new("inbound_tx_sets", 0, lifetime),
        }
    }

    pub fn give_set(&self, hash: Digest, transactions: Vec<Digest>) {
        tracing::debug!(%hash, transactions = transactions.len(), "transaction set held");
        self.sets.insert(hash, Arc::new(transactions));
    }

    #[cfg(test)]
    pub(crate) fn get_set(&self, hash: &Digest) -> Option<Arc<Vec<Digest>>> {
        self.sets.get(hash)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

impl Default for InboundTxSets {
    fn default() -> Self {
        Self::new(INBOUND_LIFETIME)
    }
}

impl Sweepable for InboundTxSets {
    fn name(&self) -> &str {
        "inbound_tx_sets"
    }

    fn sweep(&self) {
        self.sets.sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_ledger::{create_genesis_ledger, CacheLimits};
    use keel_nullables::{InlineScheduler, NullFetcher, NullNodeStore, QueuedScheduler};
    use keel_store::NodeStore;

    fn family(store: &Arc<NullNodeStore>) -> Arc<Family> {
        Arc::new(Family::new(
            "test",
            Arc::clone(store) as Arc<dyn NodeStore>,
            CacheLimits::new(0, Duration::from_secs(60)),
            CacheLimits::new(0, Duration::from_secs(60)),
        ))
    }

    /// Every object a peer would send for the genesis ledger.
    fn genesis_objects() -> (Digest, Vec<NodeObject>) {
        let source = Arc::new(NullNodeStore::new());
        let ledger = create_genesis_ledger(&family(&source)).unwrap();
        source.store(ledger.to_node_object().unwrap()).unwrap();
        let mut objects = Vec::new();
        source.for_each(&mut |o| objects.push(o)).unwrap();
        (ledger.hash(), objects)
    }

    fn inbound(
        store: &Arc<NullNodeStore>,
        fetcher: Arc<NullFetcher>,
        scheduler: Arc<dyn JobScheduler>,
    ) -> InboundLedgers {
        InboundLedgers::new(
            family(store),
            fetcher,
            scheduler,
            Arc::new(NodeMetrics::new().unwrap()),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn check_local_succeeds_for_complete_ledger() {
        let store = Arc::new(NullNodeStore::new());
        let family = family(&store);
        let ledger = create_genesis_ledger(&family).unwrap();
        store.store(ledger.to_node_object().unwrap()).unwrap();

        let inbound = InboundLedger::new(ledger.hash(), 1, AcquireReason::Startup, family);
        assert!(inbound.check_local());
        assert_eq!(inbound.ledger().unwrap().hash(), ledger.hash());
    }

    #[test]
    fn check_local_fails_without_header() {
        let store = Arc::new(NullNodeStore::new());
        let family = family(&store);
        let ledger = create_genesis_ledger(&family).unwrap();
        let inbound = InboundLedger::new(ledger.hash(), 1, AcquireReason::Generic, family);
        assert!(!inbound.check_local());
        assert!(inbound.ledger().is_none());
    }

    #[test]
    fn check_local_fails_with_missing_state_node() {
        let store = Arc::new(NullNodeStore::new());
        let family = family(&store);
        let ledger = create_genesis_ledger(&family).unwrap();
        store.store(ledger.to_node_object().unwrap()).unwrap();
        store.remove(&ledger.account_hash());
        let inbound = InboundLedger::new(ledger.hash(), 1, AcquireReason::Generic, family);
        assert!(!inbound.check_local());
    }

    #[test]
    fn blocking_acquire_fetches_from_peers() {
        let (hash, objects) = genesis_objects();
        let fetcher = Arc::new(NullFetcher::new());
        fetcher.serve(hash, objects);
        let store = Arc::new(NullNodeStore::new());
        let inbound = inbound(&store, Arc::clone(&fetcher), Arc::new(InlineScheduler::new()));

        let ledger = inbound.acquire_blocking(hash, AcquireReason::Startup).unwrap();
        assert_eq!(ledger.hash(), hash);
        assert!(store.contains(&hash));
        assert_eq!(fetcher.requests(), vec![hash]);
    }

    #[test]
    fn blocking_acquire_without_peers_gives_up() {
        let store = Arc::new(NullNodeStore::new());
        let inbound = inbound(
            &store,
            Arc::new(NullFetcher::new()),
            Arc::new(InlineScheduler::new()),
        );
        assert!(inbound
            .acquire_blocking(Digest::new([8; 32]), AcquireReason::Startup)
            .is_none());
    }

    #[test]
    fn background_acquire_is_deduplicated() {
        let (hash, objects) = genesis_objects();
        let fetcher = Arc::new(NullFetcher::new());
        fetcher.serve(hash, objects);
        let scheduler = Arc::new(QueuedScheduler::new());
        let store = Arc::new(NullNodeStore::new());
        let inbound = inbound(
            &store,
            Arc::clone(&fetcher),
            Arc::clone(&scheduler) as Arc<dyn JobScheduler>,
        );

        inbound.acquire(hash, 1, AcquireReason::Generic);
        inbound.acquire(hash, 1, AcquireReason::Generic);
        assert_eq!(scheduler.pending(), 1);
        scheduler.run_all();
        assert!(inbound.find(&hash).unwrap().is_complete());
        assert_eq!(fetcher.requests().len(), 1);
    }

    #[test]
    fn tx_sets_expire_on_sweep() {
        let sets = InboundTxSets::new(Duration::ZERO);
        sets.give_set(Digest::new([1; 32]), vec![Digest::new([2; 32])]);
        assert_eq!(sets.get_set(&Digest::new([1; 32])).unwrap().len(), 1);
        std::thread::sleep(Duration::from_millis(5));
        sets.sweep();
        assert!(sets.is_empty());
    }
}

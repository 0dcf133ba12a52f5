//! Missing-node recovery.
//!
//! Tree traversal reports missing nodes here. Reports carrying a ledger
//! sequence are folded into a single in-flight watermark: the first reporter
//! dispatches a chase job, later reporters only raise the watermark. The
//! chase resolves the watermark to a ledger hash, requests that ledger, and
//! clears the watermark if it did not move meanwhile; otherwise it
//! dispatches itself again for the new watermark.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use keel_types::{Digest, LedgerSeq};

use crate::acquire::{AcquireReason, LedgerAcquirer, LedgerHashResolver};
use crate::jobs::{JobScheduler, JobType};

/// Watermark value meaning no chase is in flight.
const UNSET: u32 = 0;

struct Collaborators {
    resolver: Arc<dyn LedgerHashResolver>,
    acquirer: Arc<dyn LedgerAcquirer>,
    scheduler: Arc<dyn JobScheduler>,
}

struct Inner {
    family: String,
    watermark: AtomicU32,
    collaborators: OnceLock<Collaborators>,
    notifications: AtomicU64,
    chases: AtomicU64,
    requests: AtomicU64,
}

/// Recovery coordinator of one merkle family. Cheap to clone.
#[derive(Clone)]
pub struct RecoveryCoordinator {
    inner: Arc<Inner>,
}

impl RecoveryCoordinator {
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                family: family.into(),
                watermark: AtomicU32::new(UNSET),
                collaborators: OnceLock::new(),
                notifications: AtomicU64::new(0),
                chases: AtomicU64::new(0),
                requests: AtomicU64::new(0),
            }),
        }
    }

    /// Attach the services the coordinator calls into. Only the first call
    /// has any effect; returns whether it was this one.
    pub fn bind(
        &self,
        resolver: Arc<dyn LedgerHashResolver>,
        acquirer: Arc<dyn LedgerAcquirer>,
        scheduler: Arc<dyn JobScheduler>,
    ) -> bool {
        self.inner
            .collaborators
            .set(Collaborators {
                resolver,
                acquirer,
                scheduler,
            })
            .is_ok()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.collaborators.get().is_some()
    }

    /// A node of the ledger at `seq` is missing.
    pub fn notify_missing_seq(&self, seq: LedgerSeq) {
        if seq == UNSET {
            return;
        }
        self.inner.notifications.fetch_add(1, Ordering::Relaxed);
        if !self.is_bound() {
            tracing::debug!(family = %self.inner.family, seq, "missing node reported before recovery is bound");
            return;
        }

        let mut current = self.inner.watermark.load(Ordering::Acquire);
        loop {
            if current == UNSET {
                match self.inner.watermark.compare_exchange(
                    UNSET,
                    seq,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        tracing::info!(family = %self.inner.family, seq, "missing node, starting recovery");
                        Inner::dispatch(&self.inner);
                        return;
                    }
                    Err(actual) => current = actual,
                }
            } else if seq > current {
                match self.inner.watermark.compare_exchange(
                    current,
                    seq,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        tracing::debug!(family = %self.inner.family, seq, previous = current, "raised recovery watermark");
                        return;
                    }
                    Err(actual) => current = actual,
                }
            } else {
                return;
            }
        }
    }

    /// A node is missing and no ledger sequence is known.
    pub fn notify_missing_hash(&self, hash: Digest) {
        if hash.is_zero() {
            return;
        }
        self.inner.notifications.fetch_add(1, Ordering::Relaxed);
        let Some(c) = self.inner.collaborators.get() else {
            tracing::debug!(family = %self.inner.family, %hash, "missing node reported before recovery is bound");
            return;
        };
        tracing::info!(family = %self.inner.family, %hash, "missing node, requesting by hash");
        self.inner.requests.fetch_add(1, Ordering::Relaxed);
        c.acquirer.acquire(hash, 0, AcquireReason::Generic);
    }

    /// The sequence currently being chased, if any.
    pub fn in_flight(&self) -> Option<LedgerSeq> {
        match self.inner.watermark.load(Ordering::Acquire) {
            UNSET => None,
            seq => Some(seq),
        }
    }

    /// Missing-node reports received so far, bound or not.
    pub fn notifications(&self) -> u64 {
        self.inner.notifications.load(Ordering::Relaxed)
    }

    /// Number of chase jobs dispatched so far.
    pub fn chases(&self) -> u64 {
        self.inner.chases.load(Ordering::Relaxed)
    }

    /// Number of acquisition requests issued so far.
    pub fn requests(&self) -> u64 {
        self.inner.requests.load(Ordering::Relaxed)
    }
}

impl Inner {
    fn dispatch(this: &Arc<Inner>) {
        let Some(c) = this.collaborators.get() else {
            this.watermark.store(UNSET, Ordering::Release);
            return;
        };
        this.chases.fetch_add(1, Ordering::Relaxed);
        let job_inner = Arc::clone(this);
        let queued = c.scheduler.schedule(
            JobType::LedgerRecovery,
            "missing_node_chase",
            Box::new(move || Inner::chase(&job_inner)),
        );
        if !queued {
            tracing::warn!(family = %this.family, "job queue refused recovery chase");
            this.watermark.store(UNSET, Ordering::Release);
        }
    }

    fn chase(this: &Arc<Inner>) {
        let Some(c) = this.collaborators.get() else {
            return;
        };
        let target = this.watermark.load(Ordering::Acquire);
        if target == UNSET {
            return;
        }

        match c.resolver.hash_by_seq(target) {
            Some(hash) if !hash.is_zero() => {
                tracing::debug!(family = %this.family, seq = target, %hash, "requesting ledger with missing node");
                this.requests.fetch_add(1, Ordering::Relaxed);
                c.acquirer.acquire(hash, target, AcquireReason::Generic);
            }
            _ => {
                tracing::debug!(family = %this.family, seq = target, "no hash known for missing ledger");
            }
        }

        if this
            .watermark
            .compare_exchange(target, UNSET, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            Inner::dispatch(this);
        }
    }
}

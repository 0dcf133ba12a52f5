//! In-crate test doubles.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keel_crypto::blake2b_256;
use keel_store::{NodeObject, NodeStore, StoreError};
use keel_types::{Digest, LedgerSeq};

use crate::acquire::{AcquireReason, LedgerAcquirer, LedgerHashResolver};
use crate::family::{CacheLimits, Family};
use crate::jobs::{Job, JobScheduler, JobType};
use crate::ledger::Ledger;

pub fn key(i: u8) -> Digest {
    Digest::new(blake2b_256(&[i]))
}

#[derive(Default)]
pub struct MemStore {
    objects: Mutex<HashMap<Digest, NodeObject>>,
}

impl NodeStore for MemStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn fetch(&self, hash: &Digest) -> Result<Option<NodeObject>, StoreError> {
        Ok(self.objects.lock().unwrap().get(hash).cloned())
    }

    fn store(&self, object: NodeObject) -> Result<(), StoreError> {
        self.objects
            .lock()
            .unwrap()
            .entry(object.hash)
            .or_insert(object);
        Ok(())
    }

    fn for_each(&self, visit: &mut dyn FnMut(NodeObject)) -> Result<(), StoreError> {
        let objects: Vec<NodeObject> = self.objects.lock().unwrap().values().cloned().collect();
        for object in objects {
            visit(object);
        }
        Ok(())
    }
}

pub fn test_family() -> (Arc<Family>, Arc<MemStore>) {
    let store = Arc::new(MemStore::default());
    let limits = CacheLimits::new(1024, Duration::from_secs(60));
    let family = Arc::new(Family::new("test", store.clone(), limits, limits));
    (family, store)
}

#[derive(Default)]
pub struct QueuedJobs {
    jobs: Mutex<VecDeque<Job>>,
    closed: AtomicBool,
}

impl QueuedJobs {
    pub fn pending(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn run_all(&self) {
        loop {
            let next = self.jobs.lock().unwrap().pop_front();
            match next {
                Some(job) => job(),
                None => break,
            }
        }
    }
}

impl JobScheduler for QueuedJobs {
    fn schedule(&self, _job_type: JobType, _name: &str, job: Job) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.jobs.lock().unwrap().push_back(job);
        true
    }
}

type AcquireHook = Box<dyn Fn(LedgerSeq) + Send + Sync>;

#[derive(Default)]
pub struct RecordingAcquirer {
    calls: Mutex<Vec<(Digest, LedgerSeq, AcquireReason)>>,
    hook: Mutex<Option<Arc<AcquireHook>>>,
}

impl RecordingAcquirer {
    pub fn calls(&self) -> Vec<(Digest, LedgerSeq, AcquireReason)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn on_acquire(&self, hook: impl Fn(LedgerSeq) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Arc::new(Box::new(hook)));
    }
}

impl LedgerAcquirer for RecordingAcquirer {
    fn acquire(&self, hash: Digest, seq: LedgerSeq, reason: AcquireReason) {
        self.calls.lock().unwrap().push((hash, seq, reason));
        let hook = self.hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(seq);
        }
    }

    fn acquire_blocking(&self, hash: Digest, reason: AcquireReason) -> Option<Arc<Ledger>> {
        self.calls.lock().unwrap().push((hash, 0, reason));
        None
    }
}

/// Resolves every sequence to a hash derived from it.
pub struct SeqResolver;

impl LedgerHashResolver for SeqResolver {
    fn hash_by_seq(&self, seq: LedgerSeq) -> Option<Digest> {
        Some(Digest::new(blake2b_256(&seq.to_be_bytes())))
    }
}

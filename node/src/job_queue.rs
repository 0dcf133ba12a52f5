//! Background job queue.
//!
//! Jobs are ordered by [`JobType::priority`], FIFO among equals. Worker
//! tasks hand each job to the blocking thread pool so long-running work
//! never stalls timers or signal handling. Jobs queued before start wait;
//! on stop the queue refuses new work and drains what is queued.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use keel_ledger::{Job, JobScheduler, JobType};

use crate::lifecycle::Component;
use crate::metrics::NodeMetrics;
use crate::NodeError;

struct QueuedJob {
    job_type: JobType,
    name: String,
    job: Job,
    /// Insertion order counter for FIFO tiebreaking among equal priorities.
    sequence: u64,
}

impl Eq for QueuedJob {}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.job_type.priority() == other.job_type.priority() && self.sequence == other.sequence
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.job_type
            .priority()
            .cmp(&other.job_type.priority())
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    heap: Mutex<(BinaryHeap<QueuedJob>, u64)>,
    notify: Notify,
    accepting: AtomicBool,
    stopping: AtomicBool,
    executed: AtomicU64,
    metrics: Arc<NodeMetrics>,
}

impl Inner {
    fn pop(&self) -> Option<QueuedJob> {
        self.heap.lock().unwrap_or_else(|e| e.into_inner()).0.pop()
    }

    async fn run(&self, queued: QueuedJob) {
        let QueuedJob {
            job_type, name, job, ..
        } = queued;
        tracing::trace!(job_type = %job_type, job = %name, "running job");
        if let Err(e) = tokio::task::spawn_blocking(job).await {
            tracing::error!(job_type = %job_type, job = %name, error = %e, "job panicked");
        }
        self.executed.fetch_add(1, AtomicOrdering::Relaxed);
        self.metrics.jobs_executed.inc();
    }

    async fn work(self: Arc<Self>) {
        loop {
            // Registered before the checks so a stop wake-up cannot be lost.
            let notified = self.notify.notified();
            if let Some(queued) = self.pop() {
                self.run(queued).await;
                continue;
            }
            if self.stopping.load(AtomicOrdering::Acquire) {
                break;
            }
            notified.await;
        }
    }
}

pub struct JobQueue {
    inner: Arc<Inner>,
    threads: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueue {
    pub fn new(threads: usize, metrics: Arc<NodeMetrics>) -> Self {
        Self {
            inner: Arc::new(Inner {
                heap: Mutex::new((BinaryHeap::new(), 0)),
                notify: Notify::new(),
                accepting: AtomicBool::new(true),
                stopping: AtomicBool::new(false),
                executed: AtomicU64::new(0),
                metrics,
            }),
            threads: threads.max(1),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn pending(&self) -> usize {
        self.inner
            .heap
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .0
            .len()
    }

    pub fn executed(&self) -> u64 {
        self.inner.executed.load(AtomicOrdering::Relaxed)
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(AtomicOrdering::Acquire)
    }
}

impl JobScheduler for JobQueue {
    fn schedule(&self, job_type: JobType, name: &str, job: Job) -> bool {
        if !self.inner.accepting.load(AtomicOrdering::Acquire) {
            tracing::debug!(job_type = %job_type, job = name, "job refused, queue stopping");
            return false;
        }
        {
            let mut guard = self.inner.heap.lock().unwrap_or_else(|e| e.into_inner());
            let (heap, seq) = &mut *guard;
            *seq += 1;
            let sequence = *seq;
            heap.push(QueuedJob {
                job_type,
                name: name.to_string(),
                job,
                sequence,
            });
        }
        self.inner.notify.notify_one();
        true
    }
}

#[async_trait]
impl Component for JobQueue {
    fn name(&self) -> &str {
        "job_queue"
    }

    fn on_prepare(&self) -> Result<(), NodeError> {
        if self.threads == 0 {
            return Err(NodeError::Config("job queue needs at least one thread".into()));
        }
        Ok(())
    }

    async fn on_start(&self) -> Result<(), NodeError> {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        for _ in 0..self.threads {
            workers.push(tokio::spawn(Arc::clone(&self.inner).work()));
        }
        tracing::info!(threads = self.threads, pending = self.pending(), "job queue started");
        Ok(())
    }

    async fn on_stop(&self) {
        self.inner.accepting.store(false, AtomicOrdering::Release);
        self.inner.stopping.store(true, AtomicOrdering::Release);
        self.inner.notify.notify_waiters();

        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "job worker ended abnormally");
            }
        }
        // Nothing ran the queue if the node never started.
        while let Some(queued) = self.inner.pop() {
            self.inner.run(queued).await;
        }
        tracing::info!(executed = self.executed(), "job queue drained");
    }
}

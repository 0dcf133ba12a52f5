//! Nullable job schedulers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use keel_ledger::{Job, JobScheduler, JobType};

/// Runs every job on the calling thread as soon as it is scheduled.
#[derive(Default)]
pub struct InlineScheduler {
    executed: Mutex<Vec<(JobType, String)>>,
}

impl InlineScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs run so far, in order.
    pub fn executed(&self) -> Vec<(JobType, String)> {
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl JobScheduler for InlineScheduler {
    fn schedule(&self, job_type: JobType, name: &str, job: Job) -> bool {
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((job_type, name.to_string()));
        job();
        true
    }
}

/// Holds jobs until the test runs them.
#[derive(Default)]
pub struct QueuedScheduler {
    jobs: Mutex<VecDeque<(JobType, String, Job)>>,
    closed: AtomicBool,
    executed: AtomicUsize,
}

impl QueuedScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    /// Refuse all further jobs.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Run the oldest queued job. Returns its type.
    pub fn run_next(&self) -> Option<JobType> {
        let next = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        next.map(|(job_type, _, job)| {
            job();
            self.executed.fetch_add(1, Ordering::SeqCst);
            job_type
        })
    }

    /// Run jobs until the queue is empty, including jobs queued meanwhile.
    pub fn run_all(&self) -> usize {
        let mut count = 0;
        while self.run_next().is_some() {
            count += 1;
        }
        count
    }
}

impl JobScheduler for QueuedScheduler {
    fn schedule(&self, job_type: JobType, name: &str, job: Job) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back((job_type, name.to_string(), job));
        true
    }
}

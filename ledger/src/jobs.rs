//! Background job scheduling contract.

use std::fmt;

/// Kinds of deferred work, ordered by scheduling priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobType {
    /// Periodic cache eviction.
    Sweep,
    /// Resolve and request the ledger with the highest missing sequence.
    LedgerRecovery,
    /// Fetch ledger data from peers.
    LedgerAcquire,
}

impl JobType {
    /// Higher runs first.
    pub fn priority(self) -> u8 {
        match self {
            Self::Sweep => 10,
            Self::LedgerRecovery => 20,
            Self::LedgerAcquire => 30,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sweep => "sweep",
            Self::LedgerRecovery => "ledger_recovery",
            Self::LedgerAcquire => "ledger_acquire",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Accepts closures to run on the background queue, off the timer and I/O
/// threads.
pub trait JobScheduler: Send + Sync {
    /// Queue `job`. Returns `false` if the queue is no longer accepting work.
    fn schedule(&self, job_type: JobType, name: &str, job: Job) -> bool;
}

use thiserror::Error;

use crate::lifecycle::Phase;

/// Process exit code for a configuration problem.
pub const EXIT_CONFIG: i32 = 1;
/// Process exit code when storage or setup fails.
pub const EXIT_SETUP: i32 = 3;
/// Process exit code when the requested ledger cannot be loaded.
pub const EXIT_LEDGER_LOAD: i32 = -1;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("storage integrity failure: {0}")]
    StorageIntegrity(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("resource exhausted: {0}")]
    ResourceExhaustion(String),

    #[error("setup failed in {subscriber}: {reason}")]
    Setup { subscriber: String, reason: String },

    #[error("{component}: cannot move from {from:?} to {to:?}")]
    Lifecycle {
        component: String,
        from: Phase,
        to: Phase,
    },

    #[error("dependency cycle among: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("{component} depends on undeclared service {dependency}")]
    MissingDependency {
        component: String,
        dependency: String,
    },

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("ledger error: {0}")]
    Ledger(#[from] keel_ledger::LedgerError),

    #[error("tree error: {0}")]
    Tree(#[from] keel_ledger::TreeError),

    #[error("store error: {0}")]
    Store(#[from] keel_store::StoreError),

    #[error("LMDB error: {0}")]
    Lmdb(#[from] keel_store_lmdb::LmdbError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Exit code the daemon reports for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            NodeError::Config(_) => EXIT_CONFIG,
            NodeError::StorageIntegrity(_)
            | NodeError::Parse(_)
            | NodeError::NotFound(_)
            | NodeError::Ledger(_)
            | NodeError::Tree(_) => EXIT_LEDGER_LOAD,
            NodeError::ResourceExhaustion(_)
            | NodeError::Setup { .. }
            | NodeError::Lifecycle { .. }
            | NodeError::DependencyCycle(_)
            | NodeError::MissingDependency { .. }
            | NodeError::Metrics(_)
            | NodeError::Store(_)
            | NodeError::Lmdb(_)
            | NodeError::Io(_) => EXIT_SETUP,
        }
    }
}

//! Opens the configured storage backend.

use std::path::Path;
use std::sync::Arc;

use keel_nullables::{NullLedgerIndex, NullMetaStore, NullNodeStore};
use keel_store::{LedgerIndex, MetaStore, NodeStore};
use keel_store_lmdb::LmdbEnvironment;

use crate::config::{NodeDbBackend, NodeDbConfig};
use crate::NodeError;

/// The node store plus the ledger index and meta store living beside it.
#[derive(Clone)]
pub struct Storage {
    pub nodes: Arc<dyn NodeStore>,
    pub ledgers: Arc<dyn LedgerIndex>,
    pub meta: Arc<dyn MetaStore>,
    env: Option<Arc<LmdbEnvironment>>,
}

impl Storage {
    pub fn open(db: &NodeDbConfig, path: &Path) -> Result<Self, NodeError> {
        match db.backend {
            NodeDbBackend::Lmdb => {
                let env = Arc::new(LmdbEnvironment::open(path, db.map_size)?);
                tracing::info!(path = %path.display(), "node store opened");
                Ok(Self {
                    nodes: Arc::new(env.node_store()),
                    ledgers: Arc::new(env.ledger_index()),
                    meta: Arc::new(env.meta_store()),
                    env: Some(env),
                })
            }
            NodeDbBackend::Memory => Ok(Self::memory()),
        }
    }

    /// Volatile storage; nothing survives the process.
    pub fn memory() -> Self {
        Self {
            nodes: Arc::new(NullNodeStore::new()),
            ledgers: Arc::new(NullLedgerIndex::new()),
            meta: Arc::new(NullMetaStore::new()),
            env: None,
        }
    }

    /// Flush committed data to disk.
    pub fn sync(&self) -> Result<(), NodeError> {
        if let Some(env) = &self.env {
            env.force_sync()?;
        }
        Ok(())
    }
}

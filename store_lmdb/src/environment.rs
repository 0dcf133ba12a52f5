//! LMDB environment setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use crate::{LmdbError, LmdbLedgerIndex, LmdbMetaStore, LmdbNodeStore};

/// Number of named databases opened by [`LmdbEnvironment::open`].
pub const MAX_DBS: u32 = 8;

/// Wraps the LMDB environment and all database handles.
pub struct LmdbEnvironment {
    env: Arc<Env>,
    path: PathBuf,
    pub(crate) nodes_db: Database<Bytes, Bytes>,
    pub(crate) ledgers_by_seq_db: Database<Bytes, Bytes>,
    pub(crate) ledger_seq_by_hash_db: Database<Bytes, Bytes>,
    pub(crate) meta_db: Database<Bytes, Bytes>,
}

impl LmdbEnvironment {
    /// Open or create an LMDB environment at the given path.
    pub fn open(path: &Path, map_size: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path)?;

        let mut options = EnvOpenOptions::new();
        options.map_size(map_size).max_dbs(MAX_DBS);
        // SAFETY: each environment path is opened once per process by the
        // node's composition root.
        let env = unsafe { options.open(path)? };

        let mut wtxn = env.write_txn()?;
        let nodes_db = env.create_database(&mut wtxn, Some("nodes"))?;
        let ledgers_by_seq_db = env.create_database(&mut wtxn, Some("ledgers_by_seq"))?;
        let ledger_seq_by_hash_db = env.create_database(&mut wtxn, Some("ledger_seq_by_hash"))?;
        let meta_db = env.create_database(&mut wtxn, Some("meta"))?;
        wtxn.commit()?;

        tracing::debug!(path = %path.display(), map_size, "LMDB environment opened");

        Ok(Self {
            env: Arc::new(env),
            path: path.to_path_buf(),
            nodes_db,
            ledgers_by_seq_db,
            ledger_seq_by_hash_db,
            meta_db,
        })
    }

    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn node_store(&self) -> LmdbNodeStore {
        LmdbNodeStore {
            env: Arc::clone(&self.env),
            nodes_db: self.nodes_db,
            name: format!("lmdb:{}", self.path.display()),
        }
    }

    pub fn ledger_index(&self) -> LmdbLedgerIndex {
        LmdbLedgerIndex {
            env: Arc::clone(&self.env),
            by_seq_db: self.ledgers_by_seq_db,
            seq_by_hash_db: self.ledger_seq_by_hash_db,
        }
    }

    pub fn meta_store(&self) -> LmdbMetaStore {
        LmdbMetaStore {
            env: Arc::clone(&self.env),
            meta_db: self.meta_db,
        }
    }

    /// Flush all committed data to disk.
    pub fn force_sync(&self) -> Result<(), LmdbError> {
        self.env.force_sync()?;
        Ok(())
    }
}

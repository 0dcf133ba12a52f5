//! Recently received validations.
//!
//! The newest validation from each validator is kept in a sweepable cache;
//! superseded ones are set aside and appended to the meta store by
//! [`Validations::flush`], which runs when the node stops.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use keel_ledger::{Sweepable, TaggedCache};
use keel_store::MetaStore;
use keel_types::{Digest, LedgerSeq, NetTime};

use crate::lifecycle::Component;
use crate::manifests::ManifestCache;
use crate::NodeError;

/// Meta-store key of every stale validation flushed so far.
pub const STALE_VALIDATIONS_META_KEY: &str = "stale_validations";

/// How long a validation stays current without being refreshed.
pub const VALIDATION_LIFETIME: Duration = Duration::from_secs(300);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub ledger_hash: Digest,
    pub seq: LedgerSeq,
    /// Master key of the validator.
    pub validator: String,
    pub sign_time: NetTime,
}

pub struct Validations {
    current: TaggedCache<String, Validation>,
    stale: Mutex<Vec<Validation>>,
    manifests: Arc<ManifestCache>,
    meta: Arc<dyn MetaStore>,
}

impl Validations {
    pub fn new(manifests: Arc<ManifestCache>, meta: Arc<dyn MetaStore>) -> Self {
        Self {
            current: TaggedCache::new("validations", 0, VALIDATION_LIFETIME),
            stale: Mutex::new(Vec::new()),
            manifests,
            meta,
        }
    }

    /// Record a validation. Returns `false` when it is ignored: the
    /// validator is revoked, or it is not newer than the one held.
    pub fn add(&self, validation: Validation) -> bool {
        if self.manifests.is_revoked(&validation.validator) {
            tracing::debug!(validator = %validation.validator, "validation from revoked key");
            return false;
        }
        if let Some(existing) = self.current.get(&validation.validator) {
            if existing.sign_time >= validation.sign_time {
                return false;
            }
            self.stale
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(existing);
        }
        self.current
            .insert(validation.validator.clone(), validation);
        true
    }

    /// Current validations for `ledger_hash`.
    pub fn trusted_count(&self, ledger_hash: &Digest) -> usize {
        self.current
            .values()
            .iter()
            .filter(|v| v.ledger_hash == *ledger_hash)
            .count()
    }

    pub fn stale_count(&self) -> usize {
        self.stale.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Append stale validations to the meta store and forget them. Returns
    /// how many were written. On error the batch is kept for the next flush.
    pub fn flush(&self) -> Result<usize, NodeError> {
        let batch = self.stale.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if batch.is_empty() {
            return Ok(0);
        }
        let mut stored = self.stored()?;
        stored.extend(batch.iter().cloned());
        let bytes = serde_json::to_vec(&stored)
            .map_err(|e| NodeError::Parse(format!("encoding validations: {e}")))?;
        self.meta.put_meta(STALE_VALIDATIONS_META_KEY, &bytes)?;
        // Validations set aside during the write stay queued.
        let mut stale = self.stale.lock().unwrap_or_else(|e| e.into_inner());
        let written = batch.len().min(stale.len());
        stale.drain(..written);
        Ok(batch.len())
    }

    /// Every stale validation written by earlier flushes.
    pub fn stored(&self) -> Result<Vec<Validation>, NodeError> {
        match self.meta.get_meta(STALE_VALIDATIONS_META_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| NodeError::Parse(format!("stored validations: {e}"))),
            None => Ok(Vec::new()),
        }
    }
}

impl Sweepable for Validations {
    fn name(&self) -> &str {
        "validations"
    }

    fn sweep(&self) {
        self.current.sweep();
    }
}

#[async_trait]
impl Component for Validations {
    fn name(&self) -> &str {
        "validations"
    }

    async fn on_stop(&self) {
        match self.flush() {
            Ok(count) => tracing::info!(count, "validations flushed"),
            Err(e) => tracing::warn!(error = %e, "failed to flush validations"),
        }
    }
}

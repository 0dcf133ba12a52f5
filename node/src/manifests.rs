//! Validator manifests: which ephemeral signing key each validator's
//! master key currently delegates to.
//!
//! Manifests survive restarts through the meta store; they are loaded at
//! construction and written back when the node stops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use keel_store::MetaStore;

use crate::lifecycle::Component;
use crate::NodeError;

/// Meta-store key of the persisted manifest list.
pub const MANIFESTS_META_KEY: &str = "validator_manifests";

/// Sequence marking a master key as permanently revoked.
pub const REVOKED_SEQUENCE: u32 = u32::MAX;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub master_key: String,
    pub signing_key: String,
    pub sequence: u32,
}

impl Manifest {
    pub fn is_revocation(&self) -> bool {
        self.sequence == REVOKED_SEQUENCE
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifestDisposition {
    Accepted,
    /// Not newer than the manifest already held.
    Stale,
}

pub struct ManifestCache {
    manifests: Mutex<HashMap<String, Manifest>>,
    meta: Arc<dyn MetaStore>,
}

impl ManifestCache {
    /// Load previously saved manifests from `meta`.
    pub fn load(meta: Arc<dyn MetaStore>) -> Result<Self, NodeError> {
        let mut manifests = HashMap::new();
        if let Some(bytes) = meta.get_meta(MANIFESTS_META_KEY)? {
            let saved: Vec<Manifest> = serde_json::from_slice(&bytes)
                .map_err(|e| NodeError::Parse(format!("stored validator manifests: {e}")))?;
            for manifest in saved {
                manifests.insert(manifest.master_key.clone(), manifest);
            }
            tracing::debug!(count = manifests.len(), "validator manifests loaded");
        }
        Ok(Self {
            manifests: Mutex::new(manifests),
            meta,
        })
    }

    pub fn apply(&self, manifest: Manifest) -> ManifestDisposition {
        let mut manifests = self.manifests.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = manifests.get(&manifest.master_key) {
            if existing.sequence >= manifest.sequence {
                return ManifestDisposition::Stale;
            }
        }
        if manifest.is_revocation() {
            tracing::warn!(master_key = %manifest.master_key, "validator key revoked");
        }
        manifests.insert(manifest.master_key.clone(), manifest);
        ManifestDisposition::Accepted
    }

    pub fn signing_key(&self, master_key: &str) -> Option<String> {
        self.manifests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(master_key)
            .filter(|m| !m.is_revocation())
            .map(|m| m.signing_key.clone())
    }

    pub fn is_revoked(&self, master_key: &str) -> bool {
        self.manifests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(master_key)
            .is_some_and(Manifest::is_revocation)
    }

    pub fn len(&self) -> usize {
        self.manifests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write every manifest to the meta store. Returns how many were saved.
    pub fn save(&self) -> Result<usize, NodeError> {
        let mut all: Vec<Manifest> = self
            .manifests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.master_key.cmp(&b.master_key));
        let bytes = serde_json::to_vec(&all)
            .map_err(|e| NodeError::Parse(format!("encoding validator manifests: {e}")))?;
        self.meta.put_meta(MANIFESTS_META_KEY, &bytes)?;
        Ok(all.len())
    }
}

#[async_trait]
impl Component for ManifestCache {
    fn name(&self) -> &str {
        "manifests"
    }

    async fn on_stop(&self) {
        match self.save() {
            Ok(count) => tracing::info!(count, "validator manifests saved"),
            Err(e) => tracing::warn!(error = %e, "failed to save validator manifests"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_nullables::NullMetaStore;

    fn manifest(master: &str, signing: &str, sequence: u32) -> Manifest {
        Manifest {
            master_key: master.into(),
            signing_key: signing.into(),
            sequence,
        }
    }

    #[test]
    fn newer_sequence_replaces_older() {
        let cache = ManifestCache::load(Arc::new(NullMetaStore::new())).unwrap();
        assert_eq!(cache.apply(manifest("m", "s1", 1)), ManifestDisposition::Accepted);
        assert_eq!(cache.apply(manifest("m", "s0", 1)), ManifestDisposition::Stale);
        assert_eq!(cache.apply(manifest("m", "s2", 2)), ManifestDisposition::Accepted);
        assert_eq!(cache.signing_key("m").as_deref(), Some("s2"));
    }

    #[test]
    fn revocation_hides_signing_key() {
        let cache = ManifestCache::load(Arc::new(NullMetaStore::new())).unwrap();
        cache.apply(manifest("m", "s1", 1));
        cache.apply(manifest("m", "", REVOKED_SEQUENCE));
        assert!(cache.is_revoked("m"));
        assert_eq!(cache.signing_key("m"), None);
    }

    #[tokio::test]
    async fn stop_persists_for_next_start() {
        let meta: Arc<dyn MetaStore> = Arc::new(NullMetaStore::new());
        let cache = ManifestCache::load(Arc::clone(&meta)).unwrap();
        cache.apply(manifest("a", "sa", 3));
        cache.apply(manifest("b", "sb", 1));
        cache.on_stop().await;

        let reloaded = ManifestCache::load(meta).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.signing_key("a").as_deref(), Some("sa"));
    }
}

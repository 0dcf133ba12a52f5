//! Metadata storage trait.

use crate::StoreError;

/// Trait for storing node metadata that must survive a restart
/// (validator manifests, schema version, and similar bookkeeping).
pub trait MetaStore: Send + Sync {
    /// Store a metadata value.
    fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Retrieve a metadata value. `Ok(None)` when absent.
    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete a metadata entry.
    fn delete_meta(&self, key: &str) -> Result<(), StoreError>;
}

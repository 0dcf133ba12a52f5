//! Nullable stores: thread-safe in-memory storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use keel_store::{LedgerIndex, LedgerRecord, MetaStore, NodeObject, NodeStore, StoreError};
use keel_types::{Digest, LedgerSeq};

/// An in-memory content-addressed node store.
pub struct NullNodeStore {
    name: String,
    objects: Mutex<HashMap<Digest, NodeObject>>,
}

impl NullNodeStore {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, hash: &Digest) -> bool {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(hash)
    }

    /// Drop an object, simulating local data loss.
    pub fn remove(&self, hash: &Digest) -> Option<NodeObject> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(hash)
    }

    /// Replace the payload stored under `hash`, simulating corruption.
    pub fn corrupt(&self, hash: &Digest, data: Vec<u8>) -> bool {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        match objects.get_mut(hash) {
            Some(object) => {
                object.data = data;
                true
            }
            None => false,
        }
    }
}

impl Default for NullNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore for NullNodeStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, hash: &Digest) -> Result<Option<NodeObject>, StoreError> {
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(hash)
            .cloned())
    }

    fn store(&self, object: NodeObject) -> Result<(), StoreError> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(object.hash)
            .or_insert(object);
        Ok(())
    }

    fn for_each(&self, visit: &mut dyn FnMut(NodeObject)) -> Result<(), StoreError> {
        let objects: Vec<NodeObject> = self
            .objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for object in objects {
            visit(object);
        }
        Ok(())
    }
}

/// An in-memory ledger index.
#[derive(Default)]
pub struct NullLedgerIndex {
    by_seq: Mutex<BTreeMap<LedgerSeq, LedgerRecord>>,
}

impl NullLedgerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_seq.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LedgerIndex for NullLedgerIndex {
    fn save(&self, record: &LedgerRecord) -> Result<(), StoreError> {
        self.by_seq
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.seq, record.clone());
        Ok(())
    }

    fn load_most_recent(&self) -> Result<Option<LedgerRecord>, StoreError> {
        Ok(self
            .by_seq
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .next_back()
            .cloned())
    }

    fn load_by_hash(&self, hash: &Digest) -> Result<Option<LedgerRecord>, StoreError> {
        Ok(self
            .by_seq
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .find(|r| r.hash == *hash)
            .cloned())
    }

    fn load_by_sequence(&self, seq: LedgerSeq) -> Result<Option<LedgerRecord>, StoreError> {
        Ok(self
            .by_seq
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&seq)
            .cloned())
    }
}

/// An in-memory metadata store. Writes can be made to fail.
#[derive(Default)]
pub struct NullMetaStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl NullMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `put_meta` fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl MetaStore for NullMetaStore {
    fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("write of '{key}' refused")));
        }
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn delete_meta(&self, key: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_store::NodeObjectKind;

    fn record(seq: u32) -> LedgerRecord {
        LedgerRecord {
            seq,
            hash: Digest::new([seq as u8; 32]),
            header: Vec::new(),
        }
    }

    #[test]
    fn ledger_index_most_recent_is_max_seq() {
        let index = NullLedgerIndex::new();
        for seq in [4, 9, 2] {
            index.save(&record(seq)).unwrap();
        }
        assert_eq!(index.load_most_recent().unwrap().unwrap().seq, 9);
        assert_eq!(index.load_by_hash(&Digest::new([2; 32])).unwrap().unwrap().seq, 2);
    }

    #[test]
    fn node_store_keeps_first_write() {
        let store = NullNodeStore::new();
        let hash = Digest::new([1; 32]);
        store
            .store(NodeObject::new(NodeObjectKind::Ledger, hash, vec![1]))
            .unwrap();
        store
            .store(NodeObject::new(NodeObjectKind::Ledger, hash, vec![2]))
            .unwrap();
        assert_eq!(store.fetch(&hash).unwrap().unwrap().data, vec![1]);
        assert!(store.corrupt(&hash, vec![3]));
        assert_eq!(store.fetch(&hash).unwrap().unwrap().data, vec![3]);
        assert!(store.remove(&hash).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn meta_store_round_trip() {
        let meta = NullMetaStore::new();
        meta.put_meta("k", b"v").unwrap();
        assert_eq!(meta.get_meta("k").unwrap(), Some(b"v".to_vec()));
        meta.delete_meta("k").unwrap();
        assert_eq!(meta.get_meta("k").unwrap(), None);
    }
}

//! LMDB implementation of NodeStore.
//!
//! Values are stored as `[kind byte] ++ data`, keyed by the 32-byte digest.

use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env};

use keel_store::{NodeObject, NodeObjectKind, NodeStore, StoreError};
use keel_types::Digest;

use crate::LmdbError;

pub struct LmdbNodeStore {
    pub(crate) env: Arc<Env>,
    pub(crate) nodes_db: Database<Bytes, Bytes>,
    pub(crate) name: String,
}

fn decode(hash: Digest, value: &[u8]) -> Result<NodeObject, LmdbError> {
    let (kind, data) = value
        .split_first()
        .ok_or_else(|| LmdbError::Serialization(format!("empty node object {hash}")))?;
    Ok(NodeObject::new(
        NodeObjectKind::from_byte(*kind),
        hash,
        data.to_vec(),
    ))
}

impl NodeStore for LmdbNodeStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, hash: &Digest) -> Result<Option<NodeObject>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let value = self
            .nodes_db
            .get(&rtxn, hash.as_bytes())
            .map_err(LmdbError::from)?;
        match value {
            Some(bytes) => Ok(Some(decode(*hash, bytes)?)),
            None => Ok(None),
        }
    }

    fn store(&self, object: NodeObject) -> Result<(), StoreError> {
        let mut value = Vec::with_capacity(object.data.len() + 1);
        value.push(object.kind.to_byte());
        value.extend_from_slice(&object.data);

        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        if self
            .nodes_db
            .get(&wtxn, object.hash.as_bytes())
            .map_err(LmdbError::from)?
            .is_some()
        {
            return Ok(());
        }
        self.nodes_db
            .put(&mut wtxn, object.hash.as_bytes(), &value)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn for_each(&self, visit: &mut dyn FnMut(NodeObject)) -> Result<(), StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let iter = self.nodes_db.iter(&rtxn).map_err(LmdbError::from)?;
        for result in iter {
            let (key, value) = result.map_err(LmdbError::from)?;
            let arr: [u8; 32] = key
                .try_into()
                .map_err(|_| LmdbError::Serialization("invalid node key length".into()))?;
            visit(decode(Digest::new(arr), value)?);
        }
        Ok(())
    }
}

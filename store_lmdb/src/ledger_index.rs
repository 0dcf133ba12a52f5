//! LMDB implementation of LedgerIndex.
//!
//! Records are keyed by big-endian sequence so that the last key in the
//! database is the most recent ledger. A secondary database maps ledger
//! hash to sequence.

use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env};

use keel_store::{LedgerIndex, LedgerRecord, StoreError};
use keel_types::{Digest, LedgerSeq};

use crate::LmdbError;

pub struct LmdbLedgerIndex {
    pub(crate) env: Arc<Env>,
    pub(crate) by_seq_db: Database<Bytes, Bytes>,
    pub(crate) seq_by_hash_db: Database<Bytes, Bytes>,
}

fn decode_record(bytes: &[u8]) -> Result<LedgerRecord, LmdbError> {
    bincode::deserialize(bytes).map_err(|e| LmdbError::Serialization(e.to_string()))
}

fn decode_seq(bytes: &[u8]) -> Result<LedgerSeq, LmdbError> {
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| LmdbError::Serialization("ledger sequence has unexpected length".into()))?;
    Ok(u32::from_be_bytes(arr))
}

impl LedgerIndex for LmdbLedgerIndex {
    fn save(&self, record: &LedgerRecord) -> Result<(), StoreError> {
        let bytes =
            bincode::serialize(record).map_err(|e| LmdbError::Serialization(e.to_string()))?;
        let seq_key = record.seq.to_be_bytes();

        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        // Drop the hash mapping of a record being replaced at this sequence.
        if let Some(old) = self
            .by_seq_db
            .get(&wtxn, &seq_key)
            .map_err(LmdbError::from)?
        {
            let old = decode_record(old)?;
            if old.hash != record.hash {
                self.seq_by_hash_db
                    .delete(&mut wtxn, old.hash.as_bytes())
                    .map_err(LmdbError::from)?;
            }
        }
        self.by_seq_db
            .put(&mut wtxn, &seq_key, &bytes)
            .map_err(LmdbError::from)?;
        self.seq_by_hash_db
            .put(&mut wtxn, record.hash.as_bytes(), &seq_key)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn load_most_recent(&self) -> Result<Option<LedgerRecord>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        match self.by_seq_db.last(&rtxn).map_err(LmdbError::from)? {
            Some((_, value)) => Ok(Some(decode_record(value)?)),
            None => Ok(None),
        }
    }

    fn load_by_hash(&self, hash: &Digest) -> Result<Option<LedgerRecord>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let Some(seq_bytes) = self
            .seq_by_hash_db
            .get(&rtxn, hash.as_bytes())
            .map_err(LmdbError::from)?
        else {
            return Ok(None);
        };
        let seq_key = decode_seq(seq_bytes)?.to_be_bytes();
        match self
            .by_seq_db
            .get(&rtxn, &seq_key)
            .map_err(LmdbError::from)?
        {
            Some(value) => Ok(Some(decode_record(value)?)),
            None => Ok(None),
        }
    }

    fn load_by_sequence(&self, seq: LedgerSeq) -> Result<Option<LedgerRecord>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        match self
            .by_seq_db
            .get(&rtxn, &seq.to_be_bytes())
            .map_err(LmdbError::from)?
        {
            Some(value) => Ok(Some(decode_record(value)?)),
            None => Ok(None),
        }
    }
}

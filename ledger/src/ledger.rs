//! Closed and in-construction ledgers.
//!
//! A ledger is a header plus two trees (account state and transactions)
//! living in a [`Family`]. Its hash covers every header field. Once marked
//! immutable a ledger cannot change; further work happens on a
//! [`Ledger::successor`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use keel_crypto::{prefixed_digest, HashPrefix};
use keel_store::{LedgerRecord, NodeObject, NodeObjectKind};
use keel_types::{round_close_time, Digest, LedgerSeq, NetTime};

use crate::entry::{StateEntry, TxRecord};
use crate::error::{LedgerError, TreeError};
use crate::family::Family;
use crate::tree::MerkleTree;

/// The close time was not agreed on and is an estimate.
pub const CLOSE_FLAG_NO_CONSENSUS_TIME: u8 = 0x01;

/// Default close-time resolution, in seconds.
pub const DEFAULT_CLOSE_RESOLUTION: u32 = 30;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHeader {
    pub seq: LedgerSeq,
    pub parent_hash: Digest,
    pub tx_hash: Digest,
    pub account_hash: Digest,
    pub parent_close_time: NetTime,
    pub close_time: NetTime,
    pub close_time_resolution: u32,
    pub close_flags: u8,
    pub total_coins: u64,
    pub total_coins_vbc: u64,
}

impl LedgerHeader {
    /// An empty header for `seq` with the default resolution.
    pub fn empty(seq: LedgerSeq) -> Self {
        Self {
            seq,
            parent_hash: Digest::ZERO,
            tx_hash: Digest::ZERO,
            account_hash: Digest::ZERO,
            parent_close_time: NetTime::ZERO,
            close_time: NetTime::ZERO,
            close_time_resolution: DEFAULT_CLOSE_RESOLUTION,
            close_flags: 0,
            total_coins: 0,
            total_coins_vbc: 0,
        }
    }

    /// Stored form of the header (bincode).
    pub fn to_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        bincode::serialize(self).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LedgerError> {
        bincode::deserialize(bytes).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    pub fn compute_hash(&self) -> Digest {
        prefixed_digest(
            HashPrefix::LedgerHeader,
            &[
                &self.seq.to_be_bytes(),
                self.parent_hash.as_bytes(),
                self.tx_hash.as_bytes(),
                self.account_hash.as_bytes(),
                &self.parent_close_time.as_secs().to_be_bytes(),
                &self.close_time.as_secs().to_be_bytes(),
                &self.close_time_resolution.to_be_bytes(),
                &[self.close_flags],
                &self.total_coins.to_be_bytes(),
                &self.total_coins_vbc.to_be_bytes(),
            ],
        )
    }
}

pub struct Ledger {
    header: LedgerHeader,
    hash: Digest,
    family: Arc<Family>,
    closed: bool,
    immutable: bool,
    validated: AtomicBool,
}

impl Ledger {
    /// A ledger under construction.
    pub fn new(header: LedgerHeader, family: Arc<Family>) -> Self {
        let hash = header.compute_hash();
        Self {
            header,
            hash,
            family,
            closed: false,
            immutable: false,
            validated: AtomicBool::new(false),
        }
    }

    /// A closed, immutable ledger rebuilt from a stored header.
    pub fn loaded(header: LedgerHeader, family: Arc<Family>) -> Self {
        let mut ledger = Self::new(header, family);
        ledger.closed = true;
        ledger.immutable = true;
        ledger
    }

    /// The next ledger in the chain: same state, no transactions.
    ///
    /// Its close time is one resolution step after the parent's, or
    /// `close_time` rounded when the parent has none.
    pub fn successor(&self, close_time: NetTime) -> Result<Ledger, LedgerError> {
        let seq = self
            .header
            .seq
            .checked_add(1)
            .ok_or(LedgerError::SequenceExhausted { seq: self.header.seq })?;
        let close_time_resolution = self.header.close_time_resolution;
        let close_time = if self.header.close_time.is_zero() {
            round_close_time(close_time, close_time_resolution)
        } else {
            NetTime::new(
                self.header
                    .close_time
                    .as_secs()
                    .saturating_add(close_time_resolution),
            )
        };
        let header = LedgerHeader {
            seq,
            parent_hash: self.hash,
            tx_hash: Digest::ZERO,
            account_hash: self.header.account_hash,
            parent_close_time: self.header.close_time,
            close_time,
            close_time_resolution,
            close_flags: 0,
            total_coins: self.header.total_coins,
            total_coins_vbc: self.header.total_coins_vbc,
        };
        Ok(Self::new(header, Arc::clone(&self.family)))
    }

    pub fn header(&self) -> &LedgerHeader {
        &self.header
    }

    pub fn seq(&self) -> LedgerSeq {
        self.header.seq
    }

    pub fn hash(&self) -> Digest {
        self.hash
    }

    pub fn parent_hash(&self) -> Digest {
        self.header.parent_hash
    }

    pub fn account_hash(&self) -> Digest {
        self.header.account_hash
    }

    pub fn tx_hash(&self) -> Digest {
        self.header.tx_hash
    }

    pub fn close_time(&self) -> NetTime {
        self.header.close_time
    }

    pub fn close_flags(&self) -> u8 {
        self.header.close_flags
    }

    pub fn family(&self) -> &Arc<Family> {
        &self.family
    }

    pub fn state_tree(&self) -> MerkleTree {
        MerkleTree::new(self.header.account_hash)
    }

    pub fn tx_tree(&self) -> MerkleTree {
        MerkleTree::new(self.header.tx_hash)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn is_validated(&self) -> bool {
        self.validated.load(Ordering::Acquire)
    }

    /// Validation does not change ledger contents, so it is allowed on an
    /// immutable ledger.
    pub fn set_validated(&self) {
        self.validated.store(true, Ordering::Release);
    }

    fn ensure_mutable(&self) -> Result<(), LedgerError> {
        if self.immutable {
            return Err(LedgerError::Immutable {
                seq: self.header.seq,
            });
        }
        Ok(())
    }

    fn rehash(&mut self) {
        self.hash = self.header.compute_hash();
    }

    pub fn set_state_root(&mut self, root: Digest) -> Result<(), LedgerError> {
        self.ensure_mutable()?;
        self.header.account_hash = root;
        self.rehash();
        Ok(())
    }

    pub fn set_tx_root(&mut self, root: Digest) -> Result<(), LedgerError> {
        self.ensure_mutable()?;
        self.header.tx_hash = root;
        self.rehash();
        Ok(())
    }

    pub fn set_total_coins(&mut self, total_coins: u64, total_coins_vbc: u64) -> Result<(), LedgerError> {
        self.ensure_mutable()?;
        self.header.total_coins = total_coins;
        self.header.total_coins_vbc = total_coins_vbc;
        self.rehash();
        Ok(())
    }

    pub fn set_closed(&mut self) -> Result<(), LedgerError> {
        self.ensure_mutable()?;
        self.closed = true;
        Ok(())
    }

    /// Freeze the ledger. Idempotent.
    pub fn set_immutable(&mut self) {
        self.closed = true;
        self.immutable = true;
    }

    /// Accept the ledger with the given close time: round it to
    /// `resolution`, flag an estimated close time, and freeze.
    pub fn set_accepted(
        &mut self,
        close_time: NetTime,
        resolution: u32,
        correct_close_time: bool,
    ) -> Result<(), LedgerError> {
        self.ensure_mutable()?;
        self.header.close_time = round_close_time(close_time, resolution);
        self.header.close_time_resolution = resolution;
        self.header.close_flags = if correct_close_time {
            0
        } else {
            CLOSE_FLAG_NO_CONSENSUS_TIME
        };
        self.rehash();
        self.set_immutable();
        Ok(())
    }

    /// Read one state entry.
    ///
    /// A missing tree node is reported to the family's recovery coordinator
    /// with this ledger's sequence before the error is returned.
    pub fn read_entry(&self, key: &Digest) -> Result<Option<StateEntry>, LedgerError> {
        match self.state_tree().get(key, &self.family) {
            Ok(Some(data)) => Ok(Some(StateEntry::decode(*key, &data)?)),
            Ok(None) => Ok(None),
            Err(e @ (TreeError::MissingNode { .. } | TreeError::Malformed { .. })) => {
                self.family.missing_node(self.header.seq);
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Every state entry, in key order.
    pub fn state_entries(&self) -> Result<Vec<StateEntry>, LedgerError> {
        self.state_tree()
            .leaves(&self.family)?
            .into_iter()
            .map(|(key, data)| StateEntry::decode(key, &data))
            .collect()
    }

    /// Every transaction record keyed by transaction id, in key order.
    pub fn tx_records(&self) -> Result<Vec<(Digest, TxRecord)>, LedgerError> {
        self.tx_tree()
            .leaves(&self.family)?
            .into_iter()
            .map(|(key, data)| Ok((key, TxRecord::decode(&data)?)))
            .collect()
    }

    /// Nodes of either tree not available locally, up to `max_missing`.
    pub fn missing_nodes(&self, max_missing: usize) -> Vec<Digest> {
        let mut missing = self.state_tree().walk(&self.family, max_missing);
        if missing.len() < max_missing {
            missing.extend(self.tx_tree().walk(&self.family, max_missing - missing.len()));
        }
        missing
    }

    /// The header as a node object keyed by the ledger hash.
    pub fn to_node_object(&self) -> Result<NodeObject, LedgerError> {
        Ok(NodeObject::new(
            NodeObjectKind::Ledger,
            self.hash,
            self.header.to_bytes()?,
        ))
    }

    pub fn to_record(&self) -> Result<LedgerRecord, LedgerError> {
        Ok(LedgerRecord {
            seq: self.header.seq,
            hash: self.hash,
            header: self.header.to_bytes()?,
        })
    }
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("seq", &self.header.seq)
            .field("hash", &self.hash)
            .field("closed", &self.closed)
            .field("immutable", &self.immutable)
            .field("validated", &self.is_validated())
            .finish()
    }
}

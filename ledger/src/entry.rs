//! State entries and transactions as stored in ledger trees.
//!
//! Bodies are JSON objects. `serde_json` keeps object keys sorted, so the
//! serialized form of a body is canonical.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use keel_crypto::{prefixed_digest, HashPrefix};
use keel_types::Digest;

use crate::error::LedgerError;

/// Field naming the type of a state entry.
pub const ENTRY_TYPE_FIELD: &str = "LedgerEntryType";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerEntryType {
    AccountRoot,
    Amendments,
    Check,
    DepositPreauth,
    DirectoryNode,
    Escrow,
    FeeSettings,
    LedgerHashes,
    NegativeUNL,
    Offer,
    PayChannel,
    RippleState,
    SignerList,
    Ticket,
}

/// One entry of the account-state tree.
#[derive(Clone, Debug, PartialEq)]
pub struct StateEntry {
    key: Digest,
    entry_type: LedgerEntryType,
    body: Map<String, Value>,
}

impl StateEntry {
    /// Build an entry from a JSON object carrying a known `LedgerEntryType`.
    pub fn from_json(key: Digest, body: Value) -> Result<Self, LedgerError> {
        if key.is_zero() {
            return Err(LedgerError::InvalidEntry {
                reason: "zero key".into(),
            });
        }
        let Value::Object(body) = body else {
            return Err(LedgerError::InvalidEntry {
                reason: "entry is not an object".into(),
            });
        };
        let type_field = body.get(ENTRY_TYPE_FIELD).ok_or_else(|| LedgerError::InvalidEntry {
            reason: format!("missing {ENTRY_TYPE_FIELD}"),
        })?;
        let entry_type = LedgerEntryType::deserialize(type_field).map_err(|_| {
            LedgerError::InvalidEntry {
                reason: format!("unknown entry type {type_field}"),
            }
        })?;
        Ok(Self {
            key,
            entry_type,
            body,
        })
    }

    pub fn decode(key: Digest, data: &[u8]) -> Result<Self, LedgerError> {
        let body: Value =
            serde_json::from_slice(data).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        Self::from_json(key, body)
    }

    pub fn encode(&self) -> Result<Vec<u8>, LedgerError> {
        serde_json::to_vec(&self.body).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    pub fn key(&self) -> Digest {
        self.key
    }

    pub fn entry_type(&self) -> LedgerEntryType {
        self.entry_type
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }
}

/// Key of an account's root entry.
pub fn account_root_key(account: &str) -> Digest {
    prefixed_digest(HashPrefix::EntryKey, &[b"AccountRoot".as_slice(), account.as_bytes()])
}

/// An opaque transaction, identified by the hash of its canonical body.
#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    id: Digest,
    body: Value,
}

impl Transaction {
    pub fn new(body: Value) -> Result<Self, LedgerError> {
        let bytes = serde_json::to_vec(&body).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        Ok(Self {
            id: prefixed_digest(HashPrefix::TransactionId, &[bytes.as_slice()]),
            body,
        })
    }

    pub fn id(&self) -> Digest {
        self.id
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}

/// Outcome of a transaction as recorded when its ledger closed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMeta {
    /// Position of the transaction in the closing order.
    pub transaction_index: u32,
    pub result: String,
}

/// Leaf data of the transaction tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxRecord {
    pub tx: Value,
    pub meta: TxMeta,
}

impl TxRecord {
    pub fn encode(&self) -> Result<Vec<u8>, LedgerError> {
        serde_json::to_vec(self).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> Result<Self, LedgerError> {
        serde_json::from_slice(data).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    pub fn transaction(&self) -> Result<Transaction, LedgerError> {
        Transaction::new(self.tx.clone())
    }
}

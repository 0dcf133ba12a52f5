//! Abstract storage traits for the Keel ledger node.
//!
//! Every storage backend (LMDB, in-memory for testing) implements these
//! traits. The rest of the codebase depends only on the traits.

pub mod error;
pub mod ledger_index;
pub mod meta;
pub mod node;

pub use error::StoreError;
pub use ledger_index::{LedgerIndex, LedgerRecord};
pub use meta::MetaStore;
pub use node::{NodeObject, NodeObjectKind, NodeStore};

//! LMDB storage backend for the Keel ledger node.
//!
//! Implements the storage traits from `keel-store` using the `heed` LMDB
//! bindings. Each logical store maps to one or more named databases within a
//! single environment.

pub mod environment;
pub mod error;
pub mod ledger_index;
pub mod meta;
pub mod node_store;

pub use environment::LmdbEnvironment;
pub use error::LmdbError;
pub use ledger_index::LmdbLedgerIndex;
pub use meta::LmdbMetaStore;
pub use node_store::LmdbNodeStore;

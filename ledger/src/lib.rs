//! Ledgers and the merkle machinery behind them.
//!
//! A [`Ledger`] is a header over two content-addressed trees stored in a
//! [`Family`]: one for account state, one for the transactions it closed.
//! Traversal that hits a node missing from the local store reports it to the
//! family's [`RecoveryCoordinator`], which asks the network for it in the
//! background.

pub mod acquire;
pub mod cache;
pub mod entry;
pub mod error;
pub mod family;
pub mod genesis;
pub mod jobs;
pub mod ledger;
pub mod open_ledger;
pub mod recovery;
pub mod replay;
pub mod tree;

#[cfg(test)]
mod test_support;

pub use acquire::{AcquireReason, LedgerAcquirer, LedgerFetcher, LedgerHashResolver, NoPeers};
pub use cache::{KeyCache, Sweepable, TaggedCache};
pub use entry::{account_root_key, LedgerEntryType, StateEntry, Transaction, TxMeta, TxRecord};
pub use error::{LedgerError, TreeError};
pub use family::{CacheLimits, Family};
pub use genesis::{create_genesis_ledger, GENESIS_SEQ, INITIAL_TOTAL_COINS, MASTER_ACCOUNT};
pub use jobs::{Job, JobScheduler, JobType};
pub use ledger::{Ledger, LedgerHeader, CLOSE_FLAG_NO_CONSENSUS_TIME, DEFAULT_CLOSE_RESOLUTION};
pub use open_ledger::{Modification, OpenLedger, OpenView};
pub use recovery::RecoveryCoordinator;
pub use replay::ReplayManifest;
pub use tree::{LeafKind, MerkleTree, SharedNode, TreeBuilder, TreeNode};

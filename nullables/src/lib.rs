//! Nullable infrastructure for deterministic testing.
//!
//! Every external dependency of the node core (clock, storage, peers, the
//! background job queue) is reached through a trait. This crate provides
//! implementations that:
//! - Return deterministic values
//! - Can be controlled programmatically
//! - Never touch the filesystem or network
//!
//! `NullNodeStore` doubles as the node's `memory` storage backend.

pub mod clock;
pub mod jobs;
pub mod network;
pub mod store;

pub use clock::NullClock;
pub use jobs::{InlineScheduler, QueuedScheduler};
pub use network::{NullAcquirer, NullFetcher};
pub use store::{NullLedgerIndex, NullMetaStore, NullNodeStore};

//! Fundamental types for the Keel ledger node.
//!
//! This crate defines the core types shared across every other crate in the
//! workspace: content digests, timestamps, network close times and the clock
//! abstraction.

pub mod digest;
pub mod error;
pub mod time;

pub use digest::Digest;
pub use error::TypesError;
pub use time::{round_close_time, Clock, NetTime, SystemClock, Timestamp, NETWORK_EPOCH_OFFSET};

/// Ledger sequence number. Monotonic, starting at 1 for genesis.
pub type LedgerSeq = u32;

//! Hashing primitives for the Keel ledger node.
//!
//! Every content-addressed object is hashed with Blake2b-256 behind a
//! four-byte [`HashPrefix`], so that a ledger header can never collide with a
//! tree node or a transaction carrying the same bytes.

pub mod hash;

pub use hash::{blake2b_256, blake2b_256_multi, prefixed_digest, HashPrefix};

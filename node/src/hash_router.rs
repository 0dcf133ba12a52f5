//! Per-item flags keyed by hash, remembered for a while after last use.

use std::time::Duration;

use keel_ledger::{Sweepable, TaggedCache};
use keel_types::Digest;

/// The item's signature has been checked and is good.
pub const SF_SIGGOOD: u32 = 0x01;
/// The item failed a check and must not be relayed.
pub const SF_BAD: u32 = 0x02;
/// The item has been relayed to peers.
pub const SF_RELAYED: u32 = 0x04;

/// How long an untouched entry survives a sweep.
pub const HOLD_TIME: Duration = Duration::from_secs(300);

pub struct HashRouter {
    entries: TaggedCache<Digest, u32>,
}

impl HashRouter {
    pub fn new(hold_time: Duration) -> Self {
        Self {
            entries: TaggedCache::new("hash_router", 0, hold_time),
        }
    }

    /// Add `flags` to the item. Returns whether anything changed.
    pub fn set_flags(&self, id: Digest, flags: u32) -> bool {
        let mut changed = false;
        self.entries.update(id, |current| {
            let current = current.copied().unwrap_or(0);
            changed = current & flags != flags;
            current | flags
        });
        changed
    }

    pub fn flags(&self, id: &Digest) -> u32 {
        self.entries.get(id).unwrap_or(0)
    }

    pub fn is_sig_good(&self, id: &Digest) -> bool {
        self.flags(id) & SF_SIGGOOD != 0
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for HashRouter {
    fn default() -> Self {
        Self::new(HOLD_TIME)
    }
}

impl Sweepable for HashRouter {
    fn name(&self) -> &str {
        "hash_router"
    }

    fn sweep(&self) {
        self.entries.sweep();
    }
}

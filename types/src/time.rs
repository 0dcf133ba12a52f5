//! Timestamps, network close times and the clock abstraction.
//!
//! Wall-clock time is kept as Unix epoch seconds ([`Timestamp`]). Ledger
//! close times are expressed in seconds since the network epoch
//! (2000-01-01T00:00:00Z), see [`NetTime`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds between the Unix epoch and the network epoch (2000-01-01).
pub const NETWORK_EPOCH_OFFSET: u64 = 946_684_800;

/// A Unix timestamp in seconds since epoch (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch (time zero).
    pub const EPOCH: Self = Self(0);

    pub fn new(secs: u64) -> Self {
        Self(secs)
    }

    /// Get the current system time as a `Timestamp`.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Convert to network time. Instants before the network epoch clamp to zero.
    pub fn to_net_time(&self) -> NetTime {
        let secs = self.0.saturating_sub(NETWORK_EPOCH_OFFSET);
        NetTime(u32::try_from(secs).unwrap_or(u32::MAX))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// A ledger close time: seconds since the network epoch.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NetTime(u32);

impl NetTime {
    pub const ZERO: Self = Self(0);

    pub fn new(secs: u32) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> u32 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NetTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Round a close time to the nearest multiple of `resolution` seconds.
///
/// Zero stays zero; ties round up.
pub fn round_close_time(close_time: NetTime, resolution: u32) -> NetTime {
    if close_time.is_zero() || resolution == 0 {
        return close_time;
    }
    let shifted = close_time.0.saturating_add(resolution / 2);
    NetTime(shifted - (shifted % resolution))
}

/// Source of wall-clock time. Swapped for a deterministic clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    /// Current time on the network clock.
    fn close_time(&self) -> NetTime {
        self.now().to_net_time()
    }
}

/// The operating system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_time_is_offset_from_unix() {
        let ts = Timestamp::new(NETWORK_EPOCH_OFFSET + 42);
        assert_eq!(ts.to_net_time(), NetTime::new(42));
    }

    #[test]
    fn pre_epoch_clamps_to_zero() {
        assert_eq!(Timestamp::new(5).to_net_time(), NetTime::ZERO);
    }

    #[test]
    fn rounding_examples() {
        assert_eq!(round_close_time(NetTime::ZERO, 30), NetTime::ZERO);
        assert_eq!(round_close_time(NetTime::new(100), 30), NetTime::new(90));
        assert_eq!(round_close_time(NetTime::new(105), 30), NetTime::new(120));
        assert_eq!(round_close_time(NetTime::new(120), 30), NetTime::new(120));
    }
}

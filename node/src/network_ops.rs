//! Network-facing operating state: standalone mode, sync status and the
//! last observed close time.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use keel_types::NetTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum OperatingMode {
    Disconnected = 0,
    Connected = 1,
    Syncing = 2,
    Tracking = 3,
    Full = 4,
}

impl OperatingMode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => OperatingMode::Connected,
            2 => OperatingMode::Syncing,
            3 => OperatingMode::Tracking,
            4 => OperatingMode::Full,
            _ => OperatingMode::Disconnected,
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatingMode::Disconnected => "disconnected",
            OperatingMode::Connected => "connected",
            OperatingMode::Syncing => "syncing",
            OperatingMode::Tracking => "tracking",
            OperatingMode::Full => "full",
        };
        f.write_str(name)
    }
}

pub struct NetworkOps {
    standalone: AtomicBool,
    need_network_ledger: AtomicBool,
    last_close_time: AtomicU32,
    mode: AtomicU8,
}

impl NetworkOps {
    pub fn new() -> Self {
        Self {
            standalone: AtomicBool::new(false),
            need_network_ledger: AtomicBool::new(false),
            last_close_time: AtomicU32::new(0),
            mode: AtomicU8::new(OperatingMode::Disconnected as u8),
        }
    }

    /// Without peers this node is its own network and always in sync.
    pub fn set_standalone(&self) {
        self.standalone.store(true, Ordering::Release);
        self.set_mode(OperatingMode::Full);
    }

    pub fn is_standalone(&self) -> bool {
        self.standalone.load(Ordering::Acquire)
    }

    /// The local ledger is only a placeholder until one arrives from peers.
    pub fn set_need_network_ledger(&self) {
        self.need_network_ledger.store(true, Ordering::Release);
    }

    pub fn clear_need_network_ledger(&self) {
        self.need_network_ledger.store(false, Ordering::Release);
    }

    pub fn is_need_network_ledger(&self) -> bool {
        self.need_network_ledger.load(Ordering::Acquire)
    }

    pub fn set_last_close_time(&self, close_time: NetTime) {
        self.last_close_time
            .store(close_time.as_secs(), Ordering::Release);
    }

    pub fn last_close_time(&self) -> NetTime {
        NetTime::new(self.last_close_time.load(Ordering::Acquire))
    }

    pub fn set_mode(&self, mode: OperatingMode) {
        let previous = OperatingMode::from_u8(self.mode.swap(mode as u8, Ordering::AcqRel));
        if previous != mode {
            tracing::info!(from = %previous, to = %mode, "operating mode changed");
        }
    }

    pub fn mode(&self) -> OperatingMode {
        OperatingMode::from_u8(self.mode.load(Ordering::Acquire))
    }
}

impl Default for NetworkOps {
    fn default() -> Self {
        Self::new()
    }
}

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Connection health for the two topics the job manager reacts to. Two
/// independent booleans rather than one, because `hashblock` and
/// `rawblock` may be configured against different `bitcoind` endpoints and
/// can fail independently.
#[derive(Default)]
pub struct ZmqHealth {
    hashblock_connected: AtomicBool,
    rawblock_connected: AtomicBool,
    disconnects: AtomicU64,
    reconnects: AtomicU64,
}

impl ZmqHealth {
    pub fn set_hashblock_connected(&self, connected: bool) {
        self.hashblock_connected.store(connected, Ordering::Relaxed);
    }

    pub fn set_rawblock_connected(&self, connected: bool) {
        self.rawblock_connected.store(connected, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ZmqHealthSnapshot {
        ZmqHealthSnapshot {
            hashblock_connected: self.hashblock_connected.load(Ordering::Relaxed),
            rawblock_connected: self.rawblock_connected.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ZmqHealthSnapshot {
    pub hashblock_connected: bool,
    pub rawblock_connected: bool,
    pub disconnects: u64,
    pub reconnects: u64,
}

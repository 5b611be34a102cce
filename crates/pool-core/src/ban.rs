//! Ban policy: a short ring of recent invalid submissions per connection,
//! a reconnect-flood counter per remote IP, and the one-shot ban triggered
//! by a `mining.suggest_difficulty` outside the pool's configured bounds.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct BanPolicy {
    pub invalid_submissions_after: u32,
    pub invalid_submissions_window: Duration,
    pub ban_duration: Duration,
    pub reconnect_threshold: u32,
    pub reconnect_window: Duration,
}

/// Tracks the invalid-submission timestamps for one connection. Lives on
/// the session; consulted on every rejected share.
#[derive(Default)]
pub struct InvalidSubmitRing {
    timestamps: VecDeque<Instant>,
}

impl InvalidSubmitRing {
    /// Records an invalid submission and returns whether the connection
    /// should now be banned under `policy`.
    pub fn record(&mut self, now: Instant, policy: &BanPolicy) -> bool {
        self.timestamps.push_back(now);
        while let Some(front) = self.timestamps.front() {
            if now.duration_since(*front) > policy.invalid_submissions_window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        self.timestamps.len() as u32 >= policy.invalid_submissions_after
    }
}

/// Per-IP reconnect flood tracking, shared across connections from the
/// same remote address.
#[derive(Default)]
pub struct ReconnectCounter {
    timestamps: VecDeque<Instant>,
}

impl ReconnectCounter {
    pub fn record(&mut self, now: Instant, policy: &BanPolicy) -> bool {
        self.timestamps.push_back(now);
        while let Some(front) = self.timestamps.front() {
            if now.duration_since(*front) > policy.reconnect_window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        self.timestamps.len() as u32 >= policy.reconnect_threshold
    }
}

/// Per-IP reconnect counters shared across every connection from that
/// address, so a flood of short-lived connections is tracked cumulatively
/// rather than resetting every time a new `MinerSession` is created.
#[derive(Default)]
pub struct ReconnectTable {
    counters: std::sync::Mutex<std::collections::HashMap<IpAddr, ReconnectCounter>>,
}

impl ReconnectTable {
    pub fn record(&self, ip: IpAddr, now: Instant, policy: &BanPolicy) -> bool {
        let mut counters = self.counters.lock().expect("reconnect table mutex poisoned");
        counters.entry(ip).or_default().record(now, policy)
    }
}

/// The pool-wide ban table: maps a banned IP to the instant its ban
/// expires. A connection attempt from a banned IP is rejected before a
/// Stratum session is even created.
#[derive(Default)]
pub struct BanTable {
    bans: std::sync::Mutex<std::collections::HashMap<IpAddr, Instant>>,
}

impl BanTable {
    pub fn ban(&self, ip: IpAddr, duration: Duration) {
        let expires = Instant::now() + duration;
        self.bans.lock().expect("ban table mutex poisoned").insert(ip, expires);
    }

    pub fn is_banned(&self, ip: &IpAddr) -> bool {
        let mut bans = self.bans.lock().expect("ban table mutex poisoned");
        match bans.get(ip) {
            Some(expires) if *expires > Instant::now() => true,
            Some(_) => {
                bans.remove(ip);
                false
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> u64 {
        let now = Instant::now();
        self.bans
            .lock()
            .expect("ban table mutex poisoned")
            .values()
            .filter(|expires| **expires > now)
            .count() as u64
    }
}

/// True if a miner's `mining.suggest_difficulty` falls outside the pool's
/// configured bounds and the operator has opted into auto-banning for it.
pub fn suggested_difficulty_is_bannable(suggested: f64, min: f64, max: f64) -> bool {
    suggested < min || suggested > max
}

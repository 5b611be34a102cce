//! Per-connection Stratum V1 state machine: subscribe → configure →
//! authorize → submit, extranonce1 allocation, version-rolling
//! negotiation, and the mutable state the share validator and vardiff
//! controller read on every submit.

use crate::ban::{BanPolicy, InvalidSubmitRing};
use crate::job::Job;
use crate::vardiff::{Vardiff, VardiffParams};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// Bounded LRU of recently published jobs a session still accepts
/// submissions against (spec: "typical size 8").
const JOB_LRU_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    Fresh,
    Subscribed,
    Authorized,
}

#[derive(Clone, Debug, Default)]
pub struct VersionRolling {
    pub negotiated_mask: Option<u32>,
    pub min_bit_count: u32,
}

impl VersionRolling {
    /// Intersects the miner-requested mask with the pool's mask and
    /// requires the result to carry at least `min-bit-count` set bits.
    pub fn negotiate(pool_mask: u32, requested_mask: u32, min_bit_count: u32) -> Option<u32> {
        let effective = pool_mask & requested_mask;
        if effective.count_ones() >= min_bit_count {
            Some(effective)
        } else {
            None
        }
    }
}

/// A key identifying one submitted share, used for per-connection
/// duplicate detection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShareKey {
    pub job_id: String,
    pub extranonce2_hex: String,
    pub ntime_hex: String,
    pub nonce_hex: String,
    pub version_bits_hex: Option<String>,
}

/// Mutable Stratum state for one miner connection. Everything here is
/// owned by the session task; the job LRU holds `Arc<Job>` so a session
/// can keep validating against a job the manager has already superseded.
pub struct MinerSession {
    pub state: HandshakeState,
    pub extranonce1: u32,
    pub extranonce2_size: usize,
    pub worker: Option<String>,
    pub version_rolling: VersionRolling,
    pub current_difficulty: f64,
    pub last_sent_difficulty: Option<f64>,
    pub last_sent_version_mask: Option<u32>,
    job_lru: VecDeque<Arc<Job>>,
    seen_shares: HashSet<ShareKey>,
    pub vardiff: Vardiff,
    pub invalid_submit_ring: InvalidSubmitRing,
    pub banned_until: Option<Instant>,
    pub ban_reason: Option<String>,
    pub accepted: u64,
    pub rejected: u64,
    pub best_share_difficulty: f64,
    pub last_share_at: Option<Instant>,
}

impl MinerSession {
    pub fn new(extranonce1: u32, extranonce2_size: usize, initial_difficulty: f64, vardiff_params: VardiffParams) -> Self {
        Self {
            state: HandshakeState::Fresh,
            extranonce1,
            extranonce2_size,
            worker: None,
            version_rolling: VersionRolling::default(),
            current_difficulty: initial_difficulty,
            last_sent_difficulty: None,
            last_sent_version_mask: None,
            job_lru: VecDeque::with_capacity(JOB_LRU_SIZE),
            seen_shares: HashSet::new(),
            vardiff: Vardiff::new(vardiff_params, initial_difficulty),
            invalid_submit_ring: InvalidSubmitRing::default(),
            banned_until: None,
            ban_reason: None,
            accepted: 0,
            rejected: 0,
            best_share_difficulty: 0.0,
            last_share_at: None,
        }
    }

    pub fn extranonce1_hex(&self) -> String {
        hex::encode(self.extranonce1.to_be_bytes())
    }

    pub fn push_job(&mut self, job: Arc<Job>) {
        if self.job_lru.len() == JOB_LRU_SIZE {
            self.job_lru.pop_front();
        }
        self.job_lru.push_back(job);
    }

    pub fn find_job(&self, job_id: &str) -> Option<Arc<Job>> {
        self.job_lru.iter().find(|j| j.job_id.to_string() == job_id).cloned()
    }

    /// Most recently published job still held in the LRU, used as a
    /// fallback when `ShareRequireJobID` is disabled and the submitted id
    /// doesn't match anything.
    pub fn most_recent_job(&self) -> Option<Arc<Job>> {
        self.job_lru.back().cloned()
    }

    pub fn record_share_key(&mut self, key: ShareKey) -> bool {
        self.seen_shares.insert(key)
    }

    pub fn is_banned(&self, now: Instant) -> bool {
        self.banned_until.map(|until| until > now).unwrap_or(false)
    }

    pub fn ban(&mut self, duration: std::time::Duration, reason: impl Into<String>, now: Instant) {
        self.banned_until = Some(now + duration);
        self.ban_reason = Some(reason.into());
    }

    pub fn record_invalid_submit(&mut self, now: Instant, policy: &BanPolicy) -> bool {
        self.invalid_submit_ring.record(now, policy)
    }

    /// Per-connection telemetry: worker name, rolling hashrate EMA,
    /// accepted/rejected counters, last-share time, and current difficulty.
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            worker: self.worker.clone(),
            hashrate: self.vardiff.ema_hashrate(),
            accepted: self.accepted,
            rejected: self.rejected,
            last_share_at: self.last_share_at,
            difficulty: self.current_difficulty,
        }
    }
}

/// Snapshot of one connection's state for external reporting (logging,
/// admin endpoints). Cheap to build; read it as often as needed.
#[derive(Clone, Debug)]
pub struct StatsSnapshot {
    pub worker: Option<String>,
    pub hashrate: f64,
    pub accepted: u64,
    pub rejected: u64,
    pub last_share_at: Option<Instant>,
    pub difficulty: f64,
}

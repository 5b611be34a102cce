//! Process-wide counters the health endpoint and logs draw from: shares
//! accepted/rejected by reason, RPC latency bands and errors, disconnects
//! and reconnects, ZMQ health, job-feed status, and blocks
//! accepted/errored. All plain atomics: every field here is incremented
//! from a hot per-share or per-poll path and read rarely, by the health
//! snapshot builder.

use pool_rpc::RpcStatsSnapshot;
use pool_zmq::ZmqHealthSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct RejectCounters {
    pub stale_job: AtomicU64,
    pub duplicate: AtomicU64,
    pub low_difficulty: AtomicU64,
    pub bad_params: AtomicU64,
    pub unauthorized: AtomicU64,
    pub not_subscribed: AtomicU64,
    pub banned: AtomicU64,
    pub worker_mismatch: AtomicU64,
    pub ntime_out_of_range: AtomicU64,
}

impl RejectCounters {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
pub struct Metrics {
    pub shares_accepted: AtomicU64,
    pub shares_rejected: AtomicU64,
    pub rejects: RejectCounters,
    pub blocks_found: AtomicU64,
    pub blocks_submit_errors: AtomicU64,
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub disconnects: AtomicU64,
    pub reconnects: AtomicU64,
    pub bans_active: AtomicU64,
    pub job_feed_stalled: AtomicU64,
}

impl Metrics {
    pub fn record_accept(&self) {
        self.shares_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reject(&self, reason: RejectReason) {
        self.shares_rejected.fetch_add(1, Ordering::Relaxed);
        let counter = match reason {
            RejectReason::StaleJob => &self.rejects.stale_job,
            RejectReason::Duplicate => &self.rejects.duplicate,
            RejectReason::LowDifficulty => &self.rejects.low_difficulty,
            RejectReason::BadParams => &self.rejects.bad_params,
            RejectReason::Unauthorized => &self.rejects.unauthorized,
            RejectReason::NotSubscribed => &self.rejects.not_subscribed,
            RejectReason::Banned => &self.rejects.banned,
            RejectReason::WorkerMismatch => &self.rejects.worker_mismatch,
            RejectReason::NtimeOutOfRange => &self.rejects.ntime_out_of_range,
        };
        RejectCounters::inc(counter);
    }

    pub fn record_block_found(&self) {
        self.blocks_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block_submit_error(&self) {
        self.blocks_submit_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_bans_active(&self, count: u64) {
        self.bans_active.store(count, Ordering::Relaxed);
    }

    pub fn record_job_feed_stall(&self) {
        self.job_feed_stalled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, rpc: RpcStatsSnapshot, zmq: ZmqHealthSnapshot) -> HealthSnapshot {
        HealthSnapshot {
            shares_accepted: self.shares_accepted.load(Ordering::Relaxed),
            shares_rejected: self.shares_rejected.load(Ordering::Relaxed),
            reject_stale_job: self.rejects.stale_job.load(Ordering::Relaxed),
            reject_duplicate: self.rejects.duplicate.load(Ordering::Relaxed),
            reject_low_difficulty: self.rejects.low_difficulty.load(Ordering::Relaxed),
            reject_bad_params: self.rejects.bad_params.load(Ordering::Relaxed),
            reject_unauthorized: self.rejects.unauthorized.load(Ordering::Relaxed),
            reject_not_subscribed: self.rejects.not_subscribed.load(Ordering::Relaxed),
            reject_banned: self.rejects.banned.load(Ordering::Relaxed),
            reject_worker_mismatch: self.rejects.worker_mismatch.load(Ordering::Relaxed),
            reject_ntime_out_of_range: self.rejects.ntime_out_of_range.load(Ordering::Relaxed),
            blocks_found: self.blocks_found.load(Ordering::Relaxed),
            blocks_submit_errors: self.blocks_submit_errors.load(Ordering::Relaxed),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            bans_active: self.bans_active.load(Ordering::Relaxed),
            job_feed_stalled: self.job_feed_stalled.load(Ordering::Relaxed),
            rpc,
            zmq,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum RejectReason {
    StaleJob,
    Duplicate,
    LowDifficulty,
    BadParams,
    Unauthorized,
    NotSubscribed,
    Banned,
    WorkerMismatch,
    NtimeOutOfRange,
}

/// A point-in-time snapshot suitable for a health/status endpoint or a
/// periodic log line.
#[derive(Clone, Debug)]
pub struct HealthSnapshot {
    pub shares_accepted: u64,
    pub shares_rejected: u64,
    pub reject_stale_job: u64,
    pub reject_duplicate: u64,
    pub reject_low_difficulty: u64,
    pub reject_bad_params: u64,
    pub reject_unauthorized: u64,
    pub reject_not_subscribed: u64,
    pub reject_banned: u64,
    pub reject_worker_mismatch: u64,
    pub reject_ntime_out_of_range: u64,
    pub blocks_found: u64,
    pub blocks_submit_errors: u64,
    pub connections_total: u64,
    pub connections_active: u64,
    pub disconnects: u64,
    pub reconnects: u64,
    pub bans_active: u64,
    pub job_feed_stalled: u64,
    pub rpc: RpcStatsSnapshot,
    pub zmq: ZmqHealthSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_reason_routes_to_the_right_counter() {
        let m = Metrics::default();
        m.record_reject(RejectReason::Duplicate);
        m.record_reject(RejectReason::Duplicate);
        m.record_reject(RejectReason::StaleJob);
        assert_eq!(m.rejects.duplicate.load(Ordering::Relaxed), 2);
        assert_eq!(m.rejects.stale_job.load(Ordering::Relaxed), 1);
        assert_eq!(m.shares_rejected.load(Ordering::Relaxed), 3);
    }
}

//! End-to-end share-validation scenarios against a bare `MinerSession` +
//! `Job`, without any network plumbing: a stale job is rejected, and a
//! replayed share is rejected as a duplicate.

use pool_bitcoin::Target;
use pool_core::job::Job;
use pool_core::session::MinerSession;
use pool_core::validator::{validate_submit, ValidationPolicy};
use pool_core::vardiff::VardiffParams;
use pool_stratum::params::SubmitParams;
use pool_stratum::StratumError;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

fn vardiff_params() -> VardiffParams {
    VardiffParams {
        target_shares_per_min: 5.0,
        adjustment_window: Duration::from_secs(60),
        step: 2.0,
        damping_factor: 0.5,
        // Small enough that `Target::from_difficulty` saturates to
        // `U256::MAX`: every hash meets the share target regardless of
        // nonce, so these tests don't depend on finding a winning nonce.
        min_diff: 1e-12,
        max_diff: 1_000_000.0,
        hashrate_ema_tau: Duration::from_secs(300),
        initial_hashrate_ema_tau: Duration::from_secs(45),
    }
}

fn policy() -> ValidationPolicy {
    ValidationPolicy {
        require_authorized_connection: true,
        check_param_format: true,
        check_duplicate: true,
        require_job_id: true,
        check_ntime_window: true,
        ntime_max_forward_seconds: 120,
        check_version_rolling: false,
        require_worker_match: false,
    }
}

/// Target near the pow limit: essentially any hash is numerically below it,
/// but is far from the job's own (much smaller) block target, so accepted
/// shares in these tests never accidentally become block candidates.
fn easy_share_target_job(job_id: u64, mintime: u64) -> Job {
    Job {
        job_id,
        height: 100,
        clean: true,
        version: 1,
        version_mask: 0,
        prev_hash_bytes: [0u8; 32],
        prev_hash_hex_wire: "0".repeat(64),
        bits_bytes: 0x1d00_ffffu32.to_be_bytes(),
        target: Target::from_compact_bits(0x1d00_ffff),
        curtime: mintime,
        mintime,
        coinbase_value: 0,
        extranonce2_size: 4,
        template_extranonce2_size: 4,
        merkle_branch: vec![],
        coinb1: vec![1, 2, 3],
        coinb2: vec![9, 9],
        txids: vec![],
        raw_tx_hexes: vec![],
        longpollid: String::new(),
    }
}

fn submit_params(job_id: &str, extranonce2: &str, ntime: &str, nonce: &str) -> SubmitParams {
    SubmitParams {
        worker: "alice.worker1".into(),
        job_id: job_id.into(),
        extranonce2_hex: extranonce2.into(),
        ntime_hex: ntime.into(),
        nonce_hex: nonce.into(),
        version_bits_hex: None,
    }
}

#[tokio::test]
async fn stale_job_is_rejected_with_job_not_found() {
    let now = SystemTime::now();
    let now_unix = now.duration_since(std::time::UNIX_EPOCH).unwrap().as_secs();

    let mut session = MinerSession::new(1, 4, 1e-12, vardiff_params());
    session.worker = Some("alice.worker1".into());
    session.push_job(Arc::new(easy_share_target_job(1, now_unix)));

    // ntime older than the job's own mintime: fails the freshness window.
    let stale_ntime = format!("{:08x}", (now_unix as u32).wrapping_sub(10_000));
    let params = submit_params("1", "aabbccdd", &stale_ntime, "00000000");

    let outcome = validate_submit(&mut session, &params, &policy(), now).await;
    assert!(matches!(outcome, Err(StratumError::JobNotFound)));
}

#[tokio::test]
async fn unknown_job_id_is_rejected_with_job_not_found() {
    let now = SystemTime::now();
    let mut session = MinerSession::new(1, 4, 1e-12, vardiff_params());
    session.worker = Some("alice.worker1".into());
    session.push_job(Arc::new(easy_share_target_job(1, 0)));

    let params = submit_params("does-not-exist", "aabbccdd", "00000000", "00000000");
    let outcome = validate_submit(&mut session, &params, &policy(), now).await;
    assert!(matches!(outcome, Err(StratumError::JobNotFound)));
}

#[tokio::test]
async fn duplicate_submit_is_rejected_on_second_attempt() {
    let now = SystemTime::now();
    let now_unix = now.duration_since(std::time::UNIX_EPOCH).unwrap().as_secs();

    let mut session = MinerSession::new(1, 4, 1e-12, vardiff_params());
    session.worker = Some("alice.worker1".into());
    session.push_job(Arc::new(easy_share_target_job(7, now_unix.saturating_sub(60))));

    let ntime = format!("{:08x}", now_unix as u32);
    let params = submit_params("7", "aabbccdd", &ntime, "00000000");

    let first = validate_submit(&mut session, &params, &policy(), now).await;
    assert!(first.is_ok(), "first submit should be accepted: {first:?}");

    let second = validate_submit(&mut session, &params, &policy(), now).await;
    assert!(matches!(second, Err(StratumError::Duplicate)));
}

#[tokio::test]
async fn unauthorized_connection_is_rejected_before_touching_job_state() {
    let now = SystemTime::now();
    let mut session = MinerSession::new(1, 4, 1e-12, vardiff_params());
    session.push_job(Arc::new(easy_share_target_job(1, 0)));

    let params = submit_params("1", "aabbccdd", "00000000", "00000000");
    let outcome = validate_submit(&mut session, &params, &policy(), now).await;
    assert!(matches!(outcome, Err(StratumError::Unauthorized)));
}

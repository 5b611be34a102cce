//! The ordered share-validation pipeline: parses submit params,
//! reconstructs the coinbase and block header, hashes it, compares
//! against the share and block targets, and on a block candidate drives
//! the fast-retry `submitblock` loop.

use crate::job::Job;
use crate::session::{MinerSession, ShareKey};
use bitcoin::hashes::{sha256d, Hash};
use pool_bitcoin::{merkle_root_from_branch, Target};
use pool_logging::macros::*;
use pool_rpc::RpcClient;
use pool_stratum::params::SubmitParams;
use pool_stratum::StratumError;
use pool_async::tokio_util::sync::CancellationToken;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub struct ValidationPolicy {
    pub require_authorized_connection: bool,
    pub check_param_format: bool,
    pub check_duplicate: bool,
    pub require_job_id: bool,
    pub check_ntime_window: bool,
    pub ntime_max_forward_seconds: u64,
    pub check_version_rolling: bool,
    pub require_worker_match: bool,
}

#[derive(Debug)]
pub enum ShareOutcome {
    Accepted { difficulty: f64 },
    BlockCandidate {
        difficulty: f64,
        block_hash: sha256d::Hash,
        height: u64,
        job: std::sync::Arc<Job>,
        extranonce2: Vec<u8>,
        header: Vec<u8>,
    },
}

pub async fn validate_submit(
    session: &mut MinerSession,
    params: &SubmitParams,
    policy: &ValidationPolicy,
    now: SystemTime,
) -> Result<ShareOutcome, StratumError> {
    if policy.require_authorized_connection && session.worker.is_none() {
        return Err(StratumError::Unauthorized);
    }

    let extranonce2 = hex::decode(&params.extranonce2_hex).map_err(|_| StratumError::Other)?;
    let ntime_bytes = hex::decode(&params.ntime_hex).map_err(|_| StratumError::Other)?;
    let nonce_bytes = hex::decode(&params.nonce_hex).map_err(|_| StratumError::Other)?;
    let version_bits_bytes = match &params.version_bits_hex {
        Some(s) => Some(hex::decode(s).map_err(|_| StratumError::Other)?),
        None => None,
    };

    if policy.check_param_format {
        if extranonce2.len() != session.extranonce2_size {
            return Err(StratumError::Other);
        }
        if ntime_bytes.len() != 4 || nonce_bytes.len() != 4 {
            return Err(StratumError::Other);
        }
        if let Some(v) = &version_bits_bytes {
            if v.len() != 4 {
                return Err(StratumError::Other);
            }
        }
        if policy.require_worker_match {
            if let Some(authorized) = &session.worker {
                if authorized != &params.worker {
                    return Err(StratumError::Unauthorized);
                }
            }
        }
    }

    let job = match session.find_job(&params.job_id) {
        Some(job) => job,
        None if !policy.require_job_id => match session.most_recent_job() {
            Some(job) => job,
            None => return Err(StratumError::JobNotFound),
        },
        None => return Err(StratumError::JobNotFound),
    };

    if policy.check_ntime_window {
        let ntime = u32::from_le_bytes([ntime_bytes[0], ntime_bytes[1], ntime_bytes[2], ntime_bytes[3]]) as u64;
        let now_unix = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        if ntime < job.mintime || ntime > now_unix + policy.ntime_max_forward_seconds {
            return Err(StratumError::JobNotFound);
        }
    }

    let version_bits: u32 = version_bits_bytes
        .as_ref()
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .unwrap_or(0);
    if policy.check_version_rolling {
        let mask = session.version_rolling.negotiated_mask.unwrap_or(0);
        if version_bits & !mask != 0 {
            return Err(StratumError::Other);
        }
    }
    let block_version = job.version as u32 | (version_bits & session.version_rolling.negotiated_mask.unwrap_or(0));

    if policy.check_duplicate {
        let key = ShareKey {
            job_id: params.job_id.clone(),
            extranonce2_hex: params.extranonce2_hex.clone(),
            ntime_hex: params.ntime_hex.clone(),
            nonce_hex: params.nonce_hex.clone(),
            version_bits_hex: params.version_bits_hex.clone(),
        };
        if !session.record_share_key(key) {
            return Err(StratumError::Duplicate);
        }
    }

    let coinbase = splice_coinbase(&job, session.extranonce1, &extranonce2);
    let coinbase_hash = sha256d::Hash::hash(&coinbase);
    let merkle_root = merkle_root_from_branch(coinbase_hash, &job.merkle_branch);

    let header = build_header(
        block_version,
        &job.prev_hash_bytes,
        &merkle_root,
        &ntime_bytes,
        &job.bits_bytes,
        &nonce_bytes,
    );
    let hash = sha256d::Hash::hash(&header);

    let share_target = Target::from_difficulty(session.current_difficulty);
    if !share_target.is_met_by(&hash) {
        return Err(StratumError::LowDifficulty);
    }

    session.accepted += 1;
    session.last_share_at = Some(std::time::Instant::now());
    if session.current_difficulty > session.best_share_difficulty {
        session.best_share_difficulty = session.current_difficulty;
    }

    if job.target.is_met_by(&hash) {
        Ok(ShareOutcome::BlockCandidate {
            difficulty: session.current_difficulty,
            block_hash: hash,
            height: job.height,
            job: job.clone(),
            extranonce2,
            header,
        })
    } else {
        Ok(ShareOutcome::Accepted {
            difficulty: session.current_difficulty,
        })
    }
}

fn splice_coinbase(job: &Job, extranonce1: u32, extranonce2: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(job.coinb1.len() + 4 + extranonce2.len() + job.coinb2.len());
    out.extend_from_slice(&job.coinb1);
    out.extend_from_slice(&extranonce1.to_be_bytes());
    out.extend_from_slice(extranonce2);
    out.extend_from_slice(&job.coinb2);
    out
}

fn build_header(
    version: u32,
    prev_hash: &[u8; 32],
    merkle_root: &sha256d::Hash,
    ntime: &[u8],
    bits: &[u8; 4],
    nonce: &[u8],
) -> Vec<u8> {
    let mut header = Vec::with_capacity(80);
    header.extend_from_slice(&version.to_le_bytes());
    header.extend_from_slice(prev_hash);
    header.extend_from_slice(merkle_root.as_ref());
    header.extend_from_slice(ntime);
    header.extend_from_slice(bits);
    header.extend_from_slice(nonce);
    header
}

/// Assembles the full winning block: header ∥ tx-count varint ∥ coinbase
/// ∥ every other raw transaction, then hex-encodes it for `submitblock`.
pub fn assemble_block_hex(job: &Job, session_extranonce1: u32, extranonce2: &[u8], header: &[u8]) -> String {
    let coinbase = splice_coinbase(job, session_extranonce1, extranonce2);
    let mut block = Vec::new();
    block.extend_from_slice(header);
    write_varint(&mut block, job.raw_tx_hexes.len() as u64 + 1);
    block.extend_from_slice(&coinbase);
    for tx_hex in &job.raw_tx_hexes {
        if let Ok(bytes) = hex::decode(tx_hex) {
            block.extend_from_slice(&bytes);
        }
    }
    hex::encode(block)
}

fn write_varint(out: &mut Vec<u8>, v: u64) {
    if v < 0xfd {
        out.push(v as u8);
    } else if v <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(v as u16).to_le_bytes());
    } else if v <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(v as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&v.to_le_bytes());
    }
}

const SUBMIT_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const SUBMIT_CALL_TIMEOUT: Duration = Duration::from_secs(5);
const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(2);
const SUBMIT_MAX_WINDOW: Duration = Duration::from_secs(600);

#[derive(Debug)]
pub enum SubmitOutcome {
    Accepted,
    GaveUp { reason: String },
}

/// Races `submitblock` against the network: on a per-call timeout, checks
/// `getblockheader` for client-side confirmation before retrying. Gives up
/// if a competitor's block overtakes the job's height, or after the
/// 10-minute safety cap.
pub async fn submit_block_fast_retry(
    rpc: &RpcClient,
    block_hex: &str,
    block_hash_hex: &str,
    job_height: u64,
    current_height_of_job_manager: impl Fn() -> u64,
    cancel: &CancellationToken,
) -> SubmitOutcome {
    let started = std::time::Instant::now();

    loop {
        if started.elapsed() > SUBMIT_MAX_WINDOW {
            return SubmitOutcome::GaveUp {
                reason: "fast-retry window exceeded 10 minutes".into(),
            };
        }
        if current_height_of_job_manager() > job_height {
            return SubmitOutcome::GaveUp {
                reason: "a competing block was accepted first".into(),
            };
        }

        match rpc.submit_block(block_hex, cancel, SUBMIT_CALL_TIMEOUT).await {
            Ok(()) => return SubmitOutcome::Accepted,
            Err(pool_rpc::RpcError::Timeout(_)) => {
                match rpc
                    .get_block_header_ctx(block_hash_hex, cancel, CONFIRMATION_TIMEOUT)
                    .await
                {
                    Ok(header) if header.confirmations >= 1 => return SubmitOutcome::Accepted,
                    _ => {}
                }
            }
            Err(pool_rpc::RpcError::BlockRejected(reason)) => {
                return SubmitOutcome::GaveUp {
                    reason: format!("bitcoind rejected the block: {reason}"),
                };
            }
            Err(e) => {
                warn!("submitblock error, retrying: {e}"; "component" => "validator");
            }
        }

        pool_async::tokio::time::sleep(SUBMIT_RETRY_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_80_bytes() {
        let header = build_header(1, &[0u8; 32], &sha256d::Hash::all_zeros(), &[0u8; 4], &[0u8; 4], &[0u8; 4]);
        assert_eq!(header.len(), 80);
    }

    #[test]
    fn splice_reproduces_expected_length() {
        let job = Job {
            job_id: 1,
            height: 1,
            clean: true,
            version: 1,
            version_mask: 0,
            prev_hash_bytes: [0u8; 32],
            prev_hash_hex_wire: "0".repeat(64),
            bits_bytes: [0u8; 4],
            target: Target::max_target(),
            curtime: 0,
            mintime: 0,
            coinbase_value: 0,
            extranonce2_size: 4,
            template_extranonce2_size: 4,
            merkle_branch: vec![],
            coinb1: vec![1, 2, 3],
            coinb2: vec![9, 9],
            txids: vec![],
            raw_tx_hexes: vec![],
            longpollid: String::new(),
        };
        let spliced = splice_coinbase(&job, 0xdeadbeef, &[0xaa; 4]);
        assert_eq!(spliced.len(), 3 + 4 + 4 + 2);
    }
}

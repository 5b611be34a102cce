//! Ties the Stratum TCP listener to the job manager, registry, and share
//! validator: one task per accepted connection running the read loop and
//! dispatching by method, plus a subscriber task draining the session's
//! notify channel.

use crate::ban::{BanPolicy, BanTable, ReconnectTable};
use crate::job_manager::JobManager;
use crate::limiter::AcceptLimiter;
use crate::metrics::{Metrics, RejectReason};
use crate::registry::{Registry, SessionEvent};
use crate::session::{HandshakeState, MinerSession, VersionRolling};
use crate::validator::{assemble_block_hex, submit_block_fast_retry, validate_submit, ShareOutcome, ValidationPolicy};
use crate::vardiff::VardiffParams;
use bitcoin::hashes::Hash;
use pool_async::futures::{SinkExt, StreamExt};
use pool_async::tokio_util::sync::CancellationToken;
use pool_logging::macros::*;
use pool_rpc::RpcClient;
use pool_stratum::codec::Connection;
use pool_stratum::message::{ErrorObject, Message, RequestMessage, ResponseMessage};
use pool_stratum::params::{
    set_difficulty_value, set_version_mask_value, AuthorizeParams, ConfigureParams, SubmitParams, SubscribeParams,
    SubscribeResult,
};
use pool_stratum::StratumError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

pub struct ServerContext {
    pub job_manager: Arc<JobManager>,
    pub registry: Arc<Registry>,
    pub rpc: Arc<RpcClient>,
    pub metrics: Arc<Metrics>,
    pub ban_table: Arc<BanTable>,
    pub reconnect_table: Arc<ReconnectTable>,
    pub ban_policy: BanPolicy,
    pub accept_limiter: Arc<AcceptLimiter>,
    pub validation_policy: ValidationPolicy,
    pub vardiff_params: VardiffParams,
    pub extranonce2_size: usize,
    pub min_difficulty: f64,
    pub max_difficulty: f64,
    pub lock_suggested_difficulty: bool,
    pub base_version_mask: u32,
    pub stratum_password: Option<String>,
    pub network: bitcoin::Network,
}

pub async fn accept_loop(listener: pool_stratum::codec::Server, ctx: Arc<ServerContext>, cancel: CancellationToken) {
    loop {
        let accepted = pool_async::tokio::select! {
            result = listener.accept() => result,
            _ = cancel.cancelled() => return,
        };

        let (connection, peer_addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!("stratum accept error: {e}"; "component" => "server");
                continue;
            }
        };

        if !ctx.accept_limiter.try_acquire() {
            continue; // burst exhausted, drop silently (TCP close on drop)
        }
        if ctx.ban_table.is_banned(&peer_addr.ip()) {
            continue;
        }

        ctx.metrics.record_connect();
        let ctx = ctx.clone();
        let cancel = cancel.clone();
        pool_async::tokio::spawn(async move {
            handle_connection(connection, peer_addr, ctx.clone(), cancel).await;
            ctx.metrics.record_disconnect();
        });
    }
}

async fn handle_connection(
    mut connection: Connection,
    peer_addr: SocketAddr,
    ctx: Arc<ServerContext>,
    cancel: CancellationToken,
) {
    let extranonce1 = ctx.registry.alloc_extranonce1();
    let mut notify_rx = ctx.registry.register(extranonce1);
    let mut session = MinerSession::new(extranonce1, ctx.extranonce2_size, ctx.min_difficulty, ctx.vardiff_params.clone());
    if ctx.reconnect_table.record(peer_addr.ip(), Instant::now(), &ctx.ban_policy) {
        ctx.ban_table.ban(peer_addr.ip(), ctx.ban_policy.ban_duration);
    }

    loop {
        pool_async::tokio::select! {
            incoming = connection.next() => {
                let Some(incoming) = incoming else { break };
                let Ok(message) = incoming else { break };
                if let Message::Request(request) = message {
                    if dispatch(&mut connection, &mut session, &request, &ctx, peer_addr, &cancel).await.is_err() {
                        break;
                    }
                }
            }
            event = notify_rx.recv() => {
                if relay_event(&mut connection, &mut session, event).await.is_err() {
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    ctx.registry.unregister(extranonce1);
}

async fn relay_event(
    connection: &mut Connection,
    session: &mut MinerSession,
    event: SessionEvent,
) -> Result<(), ()> {
    match event {
        SessionEvent::SetDifficulty(d) => send_notification(connection, "mining.set_difficulty", set_difficulty_value(d)).await,
        SessionEvent::NewJob(job) => {
            if session.last_sent_difficulty != Some(session.current_difficulty) {
                send_notification(connection, "mining.set_difficulty", set_difficulty_value(session.current_difficulty)).await?;
                session.last_sent_difficulty = Some(session.current_difficulty);
            }
            if let Some(mask) = session.version_rolling.negotiated_mask {
                if session.last_sent_version_mask != Some(mask) {
                    send_notification(connection, "mining.set_version_mask", set_version_mask_value(mask)).await?;
                    session.last_sent_version_mask = Some(mask);
                }
            }
            let notify = pool_stratum::params::NotifyParams {
                job_id: job.job_id.to_string(),
                prev_hash_hex: job.prev_hash_hex_wire.clone(),
                coinb1_hex: hex::encode(&job.coinb1),
                coinb2_hex: hex::encode(&job.coinb2),
                merkle_branch_hex: job.merkle_branch.iter().map(|h| hex::encode(h.as_ref())).collect(),
                version_hex: format!("{:08x}", job.version),
                bits_hex: hex::encode(job.bits_bytes),
                ntime_hex: format!("{:08x}", job.curtime as u32),
                clean_jobs: job.clean,
            };
            session.push_job(job);
            send_notification(connection, "mining.notify", notify.to_value()).await
        }
    }
}

async fn send_notification(
    connection: &mut Connection,
    method: &str,
    params: serde_json::Value,
) -> Result<(), ()> {
    let message = Message::Request(RequestMessage::notification(method, params));
    connection.send(message).await.map_err(|_| ())
}

async fn reply(
    connection: &mut Connection,
    id: serde_json::Value,
    result: serde_json::Value,
    error: Option<ErrorObject>,
) -> Result<(), ()> {
    let message = Message::Response(ResponseMessage { id, result, error });
    connection.send(message).await.map_err(|_| ())
}

async fn dispatch(
    connection: &mut Connection,
    session: &mut MinerSession,
    request: &RequestMessage,
    ctx: &Arc<ServerContext>,
    peer_addr: SocketAddr,
    cancel: &CancellationToken,
) -> Result<(), ()> {
    let id = request.id.clone().unwrap_or(serde_json::Value::Null);

    match request.method.as_str() {
        "mining.subscribe" => {
            let _params = SubscribeParams::from_value(&request.params);
            session.state = HandshakeState::Subscribed;
            let result = SubscribeResult {
                subscriptions: vec![
                    ("mining.set_difficulty".to_string(), "1".to_string()),
                    ("mining.notify".to_string(), "2".to_string()),
                ],
                extranonce1: session.extranonce1_hex(),
                extranonce2_size: session.extranonce2_size,
            };
            reply(connection, id, result.to_value(), None).await
        }
        "mining.configure" => {
            let params = ConfigureParams::from_value(&request.params);
            let mut result = serde_json::Map::new();
            if let Some(requested_mask) = params.version_rolling_mask {
                match VersionRolling::negotiate(ctx.base_version_mask, requested_mask, params.version_rolling_min_bit_count.unwrap_or(0)) {
                    Some(mask) => {
                        session.version_rolling.negotiated_mask = Some(mask);
                        result.insert("version-rolling".into(), serde_json::json!(true));
                        result.insert("version-rolling.mask".into(), serde_json::json!(format!("{:08x}", mask)));
                    }
                    None => {
                        result.insert("version-rolling".into(), serde_json::json!(false));
                    }
                }
            }
            reply(connection, id, serde_json::Value::Object(result), None).await
        }
        "mining.authorize" => {
            let Some(params) = AuthorizeParams::from_value(&request.params) else {
                return reply(connection, id, serde_json::Value::Bool(false), Some(StratumError::Other.to_error_object())).await;
            };
            if let Some(expected) = &ctx.stratum_password {
                if params.password.as_deref() != Some(expected.as_str()) {
                    return reply(connection, id, serde_json::Value::Bool(false), Some(StratumError::Unauthorized.to_error_object())).await;
                }
            }
            // The pool pays its single configured address regardless of what
            // a worker calls itself; the wallet prefix only has to look like
            // a real address so dashboards and logs don't fill up with
            // garbage worker names from misconfigured miners.
            let (wallet_prefix, _sub_worker) = params.split_subworker();
            let wallet_is_valid = bitcoin::Address::from_str(wallet_prefix)
                .ok()
                .map(|addr| addr.is_valid_for_network(ctx.network))
                .unwrap_or(false);
            if !wallet_is_valid {
                return reply(connection, id, serde_json::Value::Bool(false), Some(StratumError::Unauthorized.to_error_object())).await;
            }
            session.worker = Some(params.worker.clone());
            session.state = HandshakeState::Authorized;
            reply(connection, id, serde_json::Value::Bool(true), None).await?;

            send_notification(connection, "mining.set_difficulty", set_difficulty_value(session.current_difficulty)).await?;
            session.last_sent_difficulty = Some(session.current_difficulty);
            if let Some(job) = ctx.job_manager.current_job().await {
                relay_event(connection, session, SessionEvent::NewJob(job)).await?;
            }
            Ok(())
        }
        "mining.submit" => handle_submit(connection, session, request, &id, ctx, peer_addr, cancel).await,
        "mining.suggest_difficulty" => {
            let suggested = request.params.as_array().and_then(|a| a.first()).and_then(|v| v.as_f64());
            match suggested {
                Some(d) if d > 0.0 => {
                    if crate::ban::suggested_difficulty_is_bannable(d, ctx.min_difficulty, ctx.max_difficulty) {
                        let reason = "suggested difficulty outside pool limits";
                        session.ban(ctx.ban_policy.ban_duration, reason, Instant::now());
                        ctx.ban_table.ban(peer_addr.ip(), ctx.ban_policy.ban_duration);
                        let err = StratumError::banned_with_reason(reason);
                        reply(connection, id, serde_json::Value::Bool(false), Some(err)).await?;
                        return Err(());
                    }
                    if ctx.lock_suggested_difficulty {
                        session.current_difficulty = d.clamp(ctx.min_difficulty, ctx.max_difficulty);
                    }
                    reply(connection, id, serde_json::Value::Bool(true), None).await
                }
                _ => reply(connection, id, serde_json::Value::Bool(true), None).await,
            }
        }
        "mining.suggest_target" => {
            let target_hex = request.params.as_array().and_then(|a| a.first()).and_then(|v| v.as_str());
            match target_hex {
                Some(hex_str) if ctx.lock_suggested_difficulty => {
                    if let Some(bytes) = decode_32(hex_str) {
                        let difficulty = pool_bitcoin::Target::from_be_bytes(&bytes).difficulty();
                        session.current_difficulty = difficulty.clamp(ctx.min_difficulty, ctx.max_difficulty);
                    }
                    reply(connection, id, serde_json::Value::Bool(true), None).await
                }
                _ => reply(connection, id, serde_json::Value::Bool(true), None).await,
            }
        }
        "mining.extranonce.subscribe" => reply(connection, id, serde_json::Value::Bool(true), None).await,
        "mining.multi_version" => reply(connection, id, serde_json::Value::Bool(true), None).await,
        "mining.get_transactions" => reply(connection, id, serde_json::Value::Array(vec![]), None).await,
        _ => reply(connection, id, serde_json::Value::Null, Some(StratumError::Other.to_error_object())).await,
    }
}

fn decode_32(hex_str: &str) -> Option<[u8; 32]> {
    hex::decode(hex_str).ok()?.try_into().ok()
}

async fn handle_submit(
    connection: &mut Connection,
    session: &mut MinerSession,
    request: &RequestMessage,
    id: &serde_json::Value,
    ctx: &Arc<ServerContext>,
    peer_addr: SocketAddr,
    cancel: &CancellationToken,
) -> Result<(), ()> {
    if session.is_banned(Instant::now()) {
        let reason = session.ban_reason.clone().unwrap_or_else(|| "banned".to_string());
        return reply(connection, id.clone(), serde_json::Value::Bool(false), Some(StratumError::banned_with_reason(reason))).await;
    }

    let Some(params) = SubmitParams::from_value(&request.params) else {
        ctx.metrics.record_reject(RejectReason::BadParams);
        return reply(connection, id.clone(), serde_json::Value::Bool(false), Some(StratumError::Other.to_error_object())).await;
    };

    let outcome = validate_submit(session, &params, &ctx.validation_policy, SystemTime::now()).await;

    match outcome {
        Ok(ShareOutcome::Accepted { difficulty }) => {
            ctx.metrics.record_accept();
            if let Some(new_diff) = session.vardiff.on_share(difficulty, Instant::now()) {
                session.current_difficulty = new_diff;
            }
            reply(connection, id.clone(), serde_json::Value::Bool(true), None).await
        }
        Ok(ShareOutcome::BlockCandidate { difficulty, block_hash, height, job, extranonce2, header }) => {
            ctx.metrics.record_accept();
            ctx.metrics.record_block_found();
            let _ = difficulty;

            let job_manager = ctx.job_manager.clone();
            let rpc = ctx.rpc.clone();
            let block_hex = assemble_block_hex(&job, session.extranonce1, &extranonce2, &header);
            // bitcoind's getblockheader (used by the fast-retry confirmation
            // path) takes hashes in display order, the reverse of the raw
            // digest bytes.
            let mut block_hash_display = block_hash.to_byte_array();
            block_hash_display.reverse();
            let block_hash_hex = hex::encode(block_hash_display);
            let cancel = cancel.clone();
            pool_async::tokio::spawn(async move {
                let outcome = submit_block_fast_retry(
                    &rpc,
                    &block_hex,
                    &block_hash_hex,
                    height,
                    || job_manager.current_height(),
                    &cancel,
                )
                .await;
                match outcome {
                    crate::validator::SubmitOutcome::Accepted => {
                        info!("block accepted"; "height" => height, "hash" => block_hash_hex.as_str());
                    }
                    crate::validator::SubmitOutcome::GaveUp { reason } => {
                        warn!("block submission gave up: {reason}"; "height" => height);
                    }
                }
            });

            reply(connection, id.clone(), serde_json::Value::Bool(true), None).await
        }
        Err(stratum_error) => {
            let reason = match stratum_error {
                StratumError::JobNotFound => RejectReason::StaleJob,
                StratumError::Duplicate => RejectReason::Duplicate,
                StratumError::LowDifficulty => RejectReason::LowDifficulty,
                StratumError::Unauthorized => RejectReason::Unauthorized,
                StratumError::NotSubscribed => RejectReason::NotSubscribed,
                StratumError::Banned => RejectReason::Banned,
                StratumError::Other => RejectReason::BadParams,
            };
            ctx.metrics.record_reject(reason);
            session.rejected += 1;
            if session.record_invalid_submit(Instant::now(), &ctx.ban_policy) {
                session.ban(ctx.ban_policy.ban_duration, "too many invalid submissions", Instant::now());
                ctx.ban_table.ban(peer_addr.ip(), ctx.ban_policy.ban_duration);
            }
            reply(connection, id.clone(), serde_json::Value::Bool(false), Some(stratum_error.to_error_object())).await
        }
    }
}

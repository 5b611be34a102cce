//! S1: a miner subscribes, authorizes, and receives a `mining.set_difficulty`
//! followed by a `mining.notify` carrying the job built from a `FakeNode`
//! bitcoind double's `getblocktemplate`, then submits a share that is
//! accepted.

use pool_async::tokio_util::sync::CancellationToken;
use pool_core::ban::{BanPolicy, BanTable, ReconnectTable};
use pool_core::coinbase::PayoutSplit;
use pool_core::job::JobBuildConfig;
use pool_core::job_manager::JobManager;
use pool_core::limiter::AcceptLimiter;
use pool_core::metrics::Metrics;
use pool_core::registry::Registry;
use pool_core::server::{accept_loop, ServerContext};
use pool_core::validator::ValidationPolicy;
use pool_core::vardiff::VardiffParams;
use pool_rpc::{Auth, RpcClient};
use pool_testutil::{FakeNode, FakeResponse, StratumTestClient};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// `bits=0x1d00ffff` is Bitcoin's own difficulty-1 target: hard enough that
/// an arbitrary nonce essentially never satisfies it by chance, so a valid
/// share in these tests is never accidentally mistaken for a block.
const JOB_BITS_HEX: &str = "1d00ffff";

fn job_target_hex() -> String {
    format!("00000000ffff{}", "00".repeat(26))
}

fn job_build_config() -> JobBuildConfig {
    JobBuildConfig {
        payout: PayoutSplit {
            payout_script: bitcoin::ScriptBuf::from_bytes(vec![0x51]),
            pool_fee_percent: 0.0,
            donation_script: None,
            operator_donation_percent: 0.0,
        },
        base_version_mask: 0x1fff_e000,
        coinbase_msg: "test-pool".into(),
        pool_entropy: None,
        job_entropy_len: 4,
        coinbase_scriptsig_max_bytes: 100,
        extranonce1_len: 4,
        extranonce2_size: 4,
        template_extranonce2_size: 4,
    }
}

fn template(curtime: u64) -> Value {
    json!({
        "version": 536870912i32,
        "previousblockhash": "ab".repeat(32),
        "transactions": [],
        "coinbaseaux": { "flags": "" },
        "coinbasevalue": 625_000_000u64,
        "longpollid": "lp-1",
        "target": job_target_hex(),
        "mintime": curtime.saturating_sub(600),
        "mutable": [],
        "noncerange": "00000000ffffffff",
        "curtime": curtime,
        "bits": JOB_BITS_HEX,
        "height": 900_000,
        "default_witness_commitment": Value::Null,
        "rules": [],
        "vbavailable": {},
        "vbrequired": 0,
    })
}

fn validation_policy() -> ValidationPolicy {
    ValidationPolicy {
        require_authorized_connection: true,
        check_param_format: true,
        check_duplicate: true,
        require_job_id: true,
        check_ntime_window: true,
        ntime_max_forward_seconds: 7200,
        check_version_rolling: false,
        require_worker_match: false,
    }
}

fn vardiff_params() -> VardiffParams {
    VardiffParams {
        target_shares_per_min: 5.0,
        adjustment_window: Duration::from_secs(60),
        step: 2.0,
        damping_factor: 0.5,
        // Saturates the share target to `U256::MAX`: any hash is accepted,
        // so the test doesn't depend on finding a winning nonce.
        min_diff: 1e-12,
        max_diff: 1_000_000.0,
        hashrate_ema_tau: Duration::from_secs(300),
        initial_hashrate_ema_tau: Duration::from_secs(45),
    }
}

#[tokio::test]
async fn subscribe_authorize_notify_then_submit_is_accepted() {
    let curtime = 1_700_000_000u64;
    let best_hash = "ab".repeat(32);
    let node = FakeNode::spawn(move |method, _params| match method {
        "getblocktemplate" => FakeResponse::ok(template(curtime)),
        "getbestblockhash" => FakeResponse::ok(Value::String(best_hash.clone())),
        _ => FakeResponse::Error { code: -32601, message: "unexpected call in this fixture".into() },
    })
    .await;

    let rpc = Arc::new(RpcClient::new(node.url(), Auth::UserPass { user: "u".into(), password: "p".into() }).unwrap());
    let registry = Arc::new(Registry::default());
    let (job_manager, notify_rx) = JobManager::new(rpc.clone(), registry.clone(), job_build_config(), Duration::from_secs(1), Duration::from_secs(30));

    let cancel = CancellationToken::new();
    job_manager.spawn_notify_workers(notify_rx, cancel.clone());
    job_manager.refresh(&cancel, true).await.expect("initial refresh should succeed");

    let ctx = Arc::new(ServerContext {
        job_manager: job_manager.clone(),
        registry,
        rpc,
        metrics: Arc::new(Metrics::default()),
        ban_table: Arc::new(BanTable::default()),
        reconnect_table: Arc::new(ReconnectTable::default()),
        ban_policy: BanPolicy {
            invalid_submissions_after: u32::MAX,
            invalid_submissions_window: Duration::from_secs(600),
            ban_duration: Duration::from_secs(3600),
            reconnect_threshold: u32::MAX,
            reconnect_window: Duration::from_secs(60),
        },
        accept_limiter: Arc::new(AcceptLimiter::new(f64::MAX, u32::MAX)),
        validation_policy: validation_policy(),
        vardiff_params: vardiff_params(),
        extranonce2_size: 4,
        min_difficulty: 1e-12,
        max_difficulty: 1_000_000.0,
        lock_suggested_difficulty: false,
        base_version_mask: 0x1fff_e000,
        stratum_password: None,
        network: bitcoin::Network::Regtest,
    });

    let listener = pool_stratum::codec::Server::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let listen_addr = listener.local_addr().unwrap();
    let accept_cancel = cancel.clone();
    pool_async::tokio::spawn(accept_loop(listener, ctx, accept_cancel));

    let mut client = StratumTestClient::connect(listen_addr).await.unwrap();

    let subscribe_reply = client.subscribe("test-miner/1.0").await.unwrap();
    assert!(subscribe_reply.get("error").map(Value::is_null).unwrap_or(true));
    let result = &subscribe_reply["result"];
    let extranonce1_hex = result.get(1).and_then(Value::as_str);
    assert!(extranonce1_hex.is_some(), "subscribe result should carry an extranonce1: {result:?}");

    let authorize_reply = client.authorize("bcrt1qqqqsyqcyq5rqwzqfpg9scrgwpugpzysnard0ew.worker1", "x").await.unwrap();
    assert_eq!(authorize_reply["result"], Value::Bool(true));

    // Authorize triggers an immediate `mining.set_difficulty` followed by a
    // `mining.notify` for the already-published job.
    let set_difficulty = client.read_next().await.unwrap();
    assert_eq!(set_difficulty["method"], "mining.set_difficulty");

    let notify = client.read_next().await.unwrap();
    assert_eq!(notify["method"], "mining.notify");
    let job_id = notify["params"][0].as_str().expect("job id").to_string();

    let ntime_hex = format!("{:08x}", curtime as u32);
    let submit_reply = client.submit("alice.worker1", &job_id, "00000001", &ntime_hex, "00000000", None).await.unwrap();
    assert_eq!(submit_reply["result"], Value::Bool(true), "share should be accepted: {submit_reply:?}");
    assert!(submit_reply.get("error").map(Value::is_null).unwrap_or(true));

    cancel.cancel();
    node.shutdown();
}

#[tokio::test]
async fn duplicate_submit_over_the_wire_is_rejected() {
    let curtime = 1_700_000_100u64;
    let best_hash = "cd".repeat(32);
    let node = FakeNode::spawn(move |method, _params| match method {
        "getblocktemplate" => FakeResponse::ok(template(curtime)),
        "getbestblockhash" => FakeResponse::ok(Value::String(best_hash.clone())),
        _ => FakeResponse::Error { code: -32601, message: "unexpected call in this fixture".into() },
    })
    .await;

    let rpc = Arc::new(RpcClient::new(node.url(), Auth::UserPass { user: "u".into(), password: "p".into() }).unwrap());
    let registry = Arc::new(Registry::default());
    let (job_manager, notify_rx) = JobManager::new(rpc.clone(), registry.clone(), job_build_config(), Duration::from_secs(1), Duration::from_secs(30));

    let cancel = CancellationToken::new();
    job_manager.spawn_notify_workers(notify_rx, cancel.clone());
    job_manager.refresh(&cancel, true).await.expect("initial refresh should succeed");

    let ctx = Arc::new(ServerContext {
        job_manager,
        registry,
        rpc,
        metrics: Arc::new(Metrics::default()),
        ban_table: Arc::new(BanTable::default()),
        reconnect_table: Arc::new(ReconnectTable::default()),
        ban_policy: BanPolicy {
            invalid_submissions_after: u32::MAX,
            invalid_submissions_window: Duration::from_secs(600),
            ban_duration: Duration::from_secs(3600),
            reconnect_threshold: u32::MAX,
            reconnect_window: Duration::from_secs(60),
        },
        accept_limiter: Arc::new(AcceptLimiter::new(f64::MAX, u32::MAX)),
        validation_policy: validation_policy(),
        vardiff_params: vardiff_params(),
        extranonce2_size: 4,
        min_difficulty: 1e-12,
        max_difficulty: 1_000_000.0,
        lock_suggested_difficulty: false,
        base_version_mask: 0x1fff_e000,
        stratum_password: None,
        network: bitcoin::Network::Regtest,
    });

    let listener = pool_stratum::codec::Server::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let listen_addr = listener.local_addr().unwrap();
    let accept_cancel = cancel.clone();
    pool_async::tokio::spawn(accept_loop(listener, ctx, accept_cancel));

    let mut client = StratumTestClient::connect(listen_addr).await.unwrap();
    client.subscribe("test-miner/1.0").await.unwrap();
    client.authorize("bcrt1qqqqsyqcyq5rqwzqfpg9scrgwpugpzysnard0ew.worker1", "x").await.unwrap();
    client.read_next().await.unwrap(); // mining.set_difficulty
    let notify = client.read_next().await.unwrap(); // mining.notify
    let job_id = notify["params"][0].as_str().expect("job id").to_string();

    let ntime_hex = format!("{:08x}", curtime as u32);
    let first = client.submit("alice.worker1", &job_id, "00000002", &ntime_hex, "00000000", None).await.unwrap();
    assert_eq!(first["result"], Value::Bool(true));

    let second = client.submit("alice.worker1", &job_id, "00000002", &ntime_hex, "00000000", None).await.unwrap();
    assert_eq!(second["result"], Value::Bool(false));
    assert!(second.get("error").map(|e| !e.is_null()).unwrap_or(false), "duplicate submit should carry an error object");

    cancel.cancel();
    node.shutdown();
}

#[tokio::test]
async fn authorize_with_a_malformed_wallet_prefix_is_rejected() {
    let curtime = 1_700_000_200u64;
    let best_hash = "ef".repeat(32);
    let node = FakeNode::spawn(move |method, _params| match method {
        "getblocktemplate" => FakeResponse::ok(template(curtime)),
        "getbestblockhash" => FakeResponse::ok(Value::String(best_hash.clone())),
        _ => FakeResponse::Error { code: -32601, message: "unexpected call in this fixture".into() },
    })
    .await;

    let rpc = Arc::new(RpcClient::new(node.url(), Auth::UserPass { user: "u".into(), password: "p".into() }).unwrap());
    let registry = Arc::new(Registry::default());
    let (job_manager, notify_rx) = JobManager::new(rpc.clone(), registry.clone(), job_build_config(), Duration::from_secs(1), Duration::from_secs(30));

    let cancel = CancellationToken::new();
    job_manager.spawn_notify_workers(notify_rx, cancel.clone());
    job_manager.refresh(&cancel, true).await.expect("initial refresh should succeed");

    let ctx = Arc::new(ServerContext {
        job_manager,
        registry,
        rpc,
        metrics: Arc::new(Metrics::default()),
        ban_table: Arc::new(BanTable::default()),
        reconnect_table: Arc::new(ReconnectTable::default()),
        ban_policy: BanPolicy {
            invalid_submissions_after: u32::MAX,
            invalid_submissions_window: Duration::from_secs(600),
            ban_duration: Duration::from_secs(3600),
            reconnect_threshold: u32::MAX,
            reconnect_window: Duration::from_secs(60),
        },
        accept_limiter: Arc::new(AcceptLimiter::new(f64::MAX, u32::MAX)),
        validation_policy: validation_policy(),
        vardiff_params: vardiff_params(),
        extranonce2_size: 4,
        min_difficulty: 1e-12,
        max_difficulty: 1_000_000.0,
        lock_suggested_difficulty: false,
        base_version_mask: 0x1fff_e000,
        stratum_password: None,
        network: bitcoin::Network::Regtest,
    });

    let listener = pool_stratum::codec::Server::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let listen_addr = listener.local_addr().unwrap();
    let accept_cancel = cancel.clone();
    pool_async::tokio::spawn(accept_loop(listener, ctx, accept_cancel));

    let mut client = StratumTestClient::connect(listen_addr).await.unwrap();
    client.subscribe("test-miner/1.0").await.unwrap();

    let authorize_reply = client.authorize("not-a-wallet.worker1", "x").await.unwrap();
    assert_eq!(authorize_reply["result"], Value::Bool(false));
    assert!(
        authorize_reply.get("error").map(|e| !e.is_null()).unwrap_or(false),
        "a worker name whose wallet prefix isn't a real address must be rejected"
    );

    cancel.cancel();
    node.shutdown();
}

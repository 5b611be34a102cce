//! Job manager integration scenarios against a `FakeNode` bitcoind double:
//! a clean template becomes the current job, a template whose declared
//! txid doesn't match its raw bytes is rejected without disturbing the
//! current job (S5), and a template that regresses height/curtime is
//! rejected the same way.

use bitcoin::blockdata::locktime::absolute::LockTime;
use bitcoin::blockdata::transaction::{OutPoint, Sequence, Transaction, TxIn, TxOut};
use bitcoin::blockdata::witness::Witness;
use bitcoin::consensus::Encodable;
use pool_core::coinbase::PayoutSplit;
use pool_core::job::JobBuildConfig;
use pool_core::job_manager::JobManager;
use pool_core::registry::Registry;
use pool_async::tokio_util::sync::CancellationToken;
use pool_rpc::{Auth, RpcClient};
use pool_testutil::{FakeNode, FakeResponse};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const EASY_BITS_HEX: &str = "207fffff";
fn easy_target_hex() -> String {
    format!("7fffff{}", "00".repeat(29))
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

fn sample_tx_hex() -> String {
    let tx = Transaction {
        version: bitcoin::transaction::Version(1),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: bitcoin::ScriptBuf::new(),
            sequence: Sequence(0xffff_ffff),
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: bitcoin::Amount::from_sat(1000),
            script_pubkey: bitcoin::ScriptBuf::from_bytes(vec![0x51]),
        }],
    };
    let mut bytes = Vec::new();
    tx.consensus_encode(&mut bytes).unwrap();
    hex::encode(bytes)
}

fn sample_template(height: u64, curtime: u64, previousblockhash: &str, longpollid: &str, transactions: Value) -> Value {
    json!({
        "version": 536870912i32,
        "previousblockhash": previousblockhash,
        "transactions": transactions,
        "coinbaseaux": { "flags": "" },
        "coinbasevalue": 625_000_000u64,
        "longpollid": longpollid,
        "target": easy_target_hex(),
        "mintime": curtime.saturating_sub(600),
        "mutable": [],
        "noncerange": "00000000ffffffff",
        "curtime": curtime,
        "bits": EASY_BITS_HEX,
        "height": height,
        "default_witness_commitment": Value::Null,
        "rules": [],
        "vbavailable": {},
        "vbrequired": 0,
    })
}

fn fake_node_fixed(template: Value, best_hash: String) -> impl Fn(&str, Value) -> FakeResponse + Send + Sync + 'static {
    move |method, _params| match method {
        "getblocktemplate" => FakeResponse::ok(template.clone()),
        "getbestblockhash" => FakeResponse::ok(Value::String(best_hash.clone())),
        _ => FakeResponse::Error { code: -32601, message: "unexpected call in this fixture".into() },
    }
}

fn job_manager_with(rpc_url: String) -> Arc<JobManager> {
    let rpc = Arc::new(RpcClient::new(rpc_url, Auth::UserPass { user: "u".into(), password: "p".into() }).unwrap());
    let registry = Arc::new(Registry::default());
    let (manager, _notify_rx) = JobManager::new(rpc, registry, job_build_config(), Duration::from_secs(1), Duration::from_secs(5));
    manager
}

#[tokio::test]
async fn clean_template_becomes_the_current_job() {
    let best_hash = "aa".repeat(32);
    let template = sample_template(800_000, 1_700_000_000, &best_hash, "lp-1", json!([]));
    let node = FakeNode::spawn(fake_node_fixed(template, best_hash)).await;

    let manager = job_manager_with(node.url());
    let cancel = CancellationToken::new();

    manager.refresh(&cancel, true).await.expect("refresh should succeed on a clean template");

    let job = manager.current_job().await.expect("job should be set");
    assert_eq!(job.height, 800_000);
    assert!(job.clean);
    node.shutdown();
}

#[tokio::test]
async fn template_with_a_forged_txid_is_rejected_and_current_job_is_untouched() {
    let best_hash = "bb".repeat(32);
    let raw_tx = sample_tx_hex();
    let forged_txid = "ff".repeat(32);
    let transactions = json!([{
        "data": raw_tx,
        "txid": forged_txid,
        "fee": 0,
        "sigops": 1,
    }]);
    let template = sample_template(800_001, 1_700_000_100, &best_hash, "lp-2", transactions);
    let node = FakeNode::spawn(fake_node_fixed(template, best_hash)).await;

    let manager = job_manager_with(node.url());
    let cancel = CancellationToken::new();

    let result = manager.refresh(&cancel, true).await;
    assert!(result.is_err(), "a forged txid must fail job build");
    assert!(manager.current_job().await.is_none(), "no job should have been published");
    node.shutdown();
}

#[tokio::test]
async fn a_regressed_template_is_rejected_without_disturbing_the_current_job() {
    let best_hash = "cc".repeat(32);
    let template_state = Arc::new(std::sync::Mutex::new(sample_template(800_002, 1_700_000_200, &best_hash, "lp-3", json!([]))));
    let state_for_handler = template_state.clone();
    let best_hash_for_handler = best_hash.clone();
    let node = FakeNode::spawn(move |method, _params| match method {
        "getblocktemplate" => FakeResponse::ok(state_for_handler.lock().unwrap().clone()),
        "getbestblockhash" => FakeResponse::ok(Value::String(best_hash_for_handler.clone())),
        _ => FakeResponse::Error { code: -32601, message: "unexpected call in this fixture".into() },
    })
    .await;

    let manager = job_manager_with(node.url());
    let cancel = CancellationToken::new();
    manager.refresh(&cancel, true).await.expect("first refresh should succeed");
    let first_job = manager.current_job().await.expect("job should be set");
    assert_eq!(first_job.height, 800_002);

    // Swap in a template with a *lower* height against the same best hash:
    // the job manager must reject it as a regression rather than silently
    // walking height backwards.
    *template_state.lock().unwrap() = sample_template(800_001, 1_700_000_100, &best_hash, "lp-4", json!([]));
    let result = manager.refresh(&cancel, true).await;
    assert!(result.is_err(), "a height regression must be rejected");
    assert_eq!(manager.current_job().await.unwrap().height, 800_002, "current job must be unchanged");

    node.shutdown();
}

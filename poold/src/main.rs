//! Process entry point: parses the CLI, loads and validates configuration,
//! wires the RPC client, the ZMQ subscriber (if configured), the job
//! manager, and the Stratum listener together, then runs until `SIGINT`.

use clap::Parser;
use pool_async::tokio_util::sync::CancellationToken;
use pool_config::{Cli, Config, ConfigError};
use pool_core::ban::{BanPolicy, BanTable, ReconnectTable};
use pool_core::coinbase::PayoutSplit;
use pool_core::job::JobBuildConfig;
use pool_core::job_manager::{run_zmq_pump, JobManager};
use pool_core::limiter::AcceptLimiter;
use pool_core::metrics::Metrics;
use pool_core::registry::Registry;
use pool_core::server::{accept_loop, ServerContext};
use pool_core::validator::ValidationPolicy;
use pool_core::vardiff::VardiffParams;
use pool_logging::macros::*;
use pool_rpc::{Auth, RpcClient};
use pool_zmq::{ZmqEndpoints, ZmqSubscriber};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const EXIT_OK: u8 = 0;
const EXIT_RUNTIME_ERROR: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;

fn main() -> ExitCode {
    let rt = pool_async::tokio::runtime::Runtime::new().expect("failed to build the tokio runtime");
    rt.block_on(run())
}

async fn run() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match Config::load(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    pool_logging::init(pool_logging::Format::Term, slog::Level::Info);
    info!("poold starting"; "listen_addr" => cfg.listen_addr.to_string(), "network" => format!("{:?}", cfg.network));

    match serve(cfg).await {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            error!("poold exited with an error: {e}"; "component" => "main");
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}

fn payout_split(cfg: &Config) -> Result<PayoutSplit, ConfigError> {
    let payout_address = bitcoin::Address::from_str(&cfg.payout.address)
        .map_err(|e| ConfigError::Invalid(format!("invalid payout address: {e}")))?
        .require_network(cfg.network)
        .map_err(|e| ConfigError::Invalid(format!("payout address wrong network: {e}")))?;
    let donation_script = match &cfg.payout.operator_donation_address {
        Some(addr) => Some(
            bitcoin::Address::from_str(addr)
                .map_err(|e| ConfigError::Invalid(format!("invalid donation address: {e}")))?
                .require_network(cfg.network)
                .map_err(|e| ConfigError::Invalid(format!("donation address wrong network: {e}")))?
                .script_pubkey(),
        ),
        None => None,
    };
    Ok(PayoutSplit {
        payout_script: payout_address.script_pubkey(),
        pool_fee_percent: cfg.payout.pool_fee_percent,
        donation_script,
        operator_donation_percent: cfg.payout.operator_donation_percent,
    })
}

fn rpc_auth(cfg: &Config) -> Auth {
    match &cfg.rpc.cookie_path {
        Some(path) => Auth::CookieFile(std::path::PathBuf::from(path)),
        None => Auth::UserPass {
            user: cfg.rpc.user.clone().unwrap_or_default(),
            password: cfg.rpc.password.clone().unwrap_or_default(),
        },
    }
}

async fn serve(cfg: Config) -> anyhow::Result<()> {
    let payout = payout_split(&cfg).map_err(|e| anyhow::anyhow!("{e}"))?;

    let rpc = Arc::new(RpcClient::new(cfg.rpc.url.clone(), rpc_auth(&cfg))?);
    let registry = Arc::new(Registry::default());

    let job_build_cfg = JobBuildConfig {
        payout,
        base_version_mask: cfg.version_mask,
        coinbase_msg: cfg.coinbase_msg.clone(),
        pool_entropy: cfg.pool_entropy.clone(),
        job_entropy_len: cfg.job_entropy_len,
        coinbase_scriptsig_max_bytes: cfg.coinbase_scriptsig_max_bytes,
        extranonce1_len: 4,
        extranonce2_size: cfg.extranonce2_size,
        template_extranonce2_size: cfg.template_extranonce2_size,
    };

    let (job_manager, notify_rx) = JobManager::new(
        rpc.clone(),
        registry.clone(),
        job_build_cfg,
        Duration::from_secs(cfg.job_retry_delay_min_seconds),
        Duration::from_secs(cfg.job_retry_delay_max_seconds),
    );

    let cancel = CancellationToken::new();
    job_manager.spawn(cancel.clone(), Duration::from_secs(cfg.stratum_heartbeat_interval_seconds));
    job_manager.spawn_notify_workers(notify_rx, cancel.clone());

    if cfg.zmq.hashblock_addr.is_some() || cfg.zmq.rawblock_addr.is_some() {
        let endpoints = ZmqEndpoints {
            hashblock_addr: cfg.zmq.hashblock_addr.clone(),
            rawblock_addr: cfg.zmq.rawblock_addr.clone(),
        };
        match ZmqSubscriber::spawn(endpoints, cancel.clone()) {
            Ok((_subscriber, zmq_rx)) => {
                pool_async::tokio::spawn(run_zmq_pump(job_manager.clone(), zmq_rx, cancel.clone()));
            }
            Err(e) => {
                warn!("zmq subscriber disabled: {e}"; "component" => "main");
            }
        }
    } else if !cfg.zmq.longpoll_fallback {
        warn!("no zmq endpoints configured and longpoll_fallback is disabled; jobs will only refresh on heartbeat"; "component" => "main");
    }

    let ban_policy = BanPolicy {
        invalid_submissions_after: if cfg.ban_policy.enabled {
            cfg.ban_policy.invalid_submissions_after
        } else {
            u32::MAX
        },
        invalid_submissions_window: Duration::from_secs(cfg.ban_policy.invalid_submissions_window_seconds),
        ban_duration: Duration::from_secs(cfg.ban_policy.invalid_submissions_duration_seconds),
        reconnect_threshold: if cfg.ban_policy.enabled {
            cfg.ban_policy.reconnect_ban_threshold
        } else {
            u32::MAX
        },
        reconnect_window: Duration::from_secs(cfg.ban_policy.reconnect_window_seconds),
    };

    let accept_limiter = if cfg.accept_limiter.enabled {
        AcceptLimiter::new(cfg.accept_limiter.max_accepts_per_second, cfg.accept_limiter.max_accept_burst)
    } else {
        AcceptLimiter::new(f64::MAX, u32::MAX)
    };

    let validation_policy = ValidationPolicy {
        require_authorized_connection: cfg.share_checks.require_authorized_connection,
        check_param_format: cfg.share_checks.check_param_format,
        check_duplicate: cfg.share_checks.check_duplicate,
        require_job_id: cfg.share_checks.require_job_id,
        check_ntime_window: cfg.share_checks.check_ntime_window,
        ntime_max_forward_seconds: cfg.share_checks.ntime_max_forward_seconds,
        check_version_rolling: cfg.share_checks.check_version_rolling,
        require_worker_match: cfg.share_checks.require_worker_match,
    };

    let vardiff_params = VardiffParams {
        target_shares_per_min: cfg.vardiff.target_shares_per_min,
        adjustment_window: Duration::from_secs(cfg.vardiff.adjustment_window_seconds),
        step: cfg.vardiff.step,
        damping_factor: cfg.vardiff.damping_factor,
        min_diff: cfg.vardiff.min_diff,
        max_diff: cfg.vardiff.max_diff,
        hashrate_ema_tau: Duration::from_secs(cfg.vardiff.hashrate_ema_tau_seconds),
        initial_hashrate_ema_tau: Duration::from_secs(cfg.vardiff.initial_hashrate_ema_tau_seconds),
    };

    // `stratum_tls_listen` is accepted for forward compatibility with the
    // config schema but TLS termination is handled by a reverse proxy, not
    // by poold itself.
    let _ = cfg.stratum_tls_listen;

    let ctx = Arc::new(ServerContext {
        job_manager: job_manager.clone(),
        registry,
        rpc: rpc.clone(),
        metrics: Arc::new(Metrics::default()),
        ban_table: Arc::new(BanTable::default()),
        reconnect_table: Arc::new(ReconnectTable::default()),
        ban_policy,
        accept_limiter: Arc::new(accept_limiter),
        validation_policy,
        vardiff_params,
        extranonce2_size: cfg.extranonce2_size,
        min_difficulty: cfg.min_difficulty,
        max_difficulty: cfg.max_difficulty,
        lock_suggested_difficulty: cfg.lock_suggested_difficulty,
        base_version_mask: cfg.version_mask,
        stratum_password: cfg.stratum_password.clone(),
        network: cfg.network,
    });

    let listener = pool_stratum::codec::Server::bind(cfg.listen_addr).await?;
    info!("stratum listener bound"; "addr" => listener.local_addr()?.to_string());

    let accept_cancel = cancel.clone();
    let accept_task = pool_async::tokio::spawn(accept_loop(listener, ctx, accept_cancel));

    pool_async::tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received, stopping"; "component" => "main");
    cancel.cancel();
    accept_task.abort();

    Ok(())
}

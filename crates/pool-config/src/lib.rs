//! Typed configuration for the pool server: the `Config` struct mirrors the
//! configuration keys enumerated in the specification (listen address,
//! vardiff tunables, share-validation policy gates, ban policy, RPC/ZMQ
//! endpoints, payout split). A config file is layered under CLI overrides
//! the way `bosminer-config::parse` layers a `config::Config` before
//! deserializing into the caller's struct; unknown fields are a hard error
//! (`#[serde(deny_unknown_fields)]`) so a typo in the file surfaces at
//! startup instead of silently using a default.

mod cli;
mod error;
mod validate;

pub use cli::Cli;
pub use error::ConfigError;

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct VardiffConfig {
    pub target_shares_per_min: f64,
    pub adjustment_window_seconds: u64,
    pub step: f64,
    pub damping_factor: f64,
    pub min_diff: f64,
    pub max_diff: f64,
    pub hashrate_ema_tau_seconds: u64,
    pub initial_hashrate_ema_tau_seconds: u64,
}

impl Default for VardiffConfig {
    fn default() -> Self {
        Self {
            target_shares_per_min: 5.0,
            adjustment_window_seconds: 60,
            step: 2.0,
            damping_factor: 0.5,
            min_diff: 1.0,
            max_diff: 1_000_000.0,
            hashrate_ema_tau_seconds: 300,
            initial_hashrate_ema_tau_seconds: 45,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ShareChecksConfig {
    pub require_authorized_connection: bool,
    pub check_param_format: bool,
    pub check_duplicate: bool,
    pub require_job_id: bool,
    pub check_ntime_window: bool,
    pub ntime_max_forward_seconds: u64,
    pub check_version_rolling: bool,
    pub require_worker_match: bool,
}

impl Default for ShareChecksConfig {
    fn default() -> Self {
        Self {
            require_authorized_connection: true,
            check_param_format: true,
            check_duplicate: true,
            require_job_id: true,
            check_ntime_window: true,
            ntime_max_forward_seconds: 7200,
            check_version_rolling: true,
            require_worker_match: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BanPolicyConfig {
    pub enabled: bool,
    pub invalid_submissions_after: u32,
    pub invalid_submissions_window_seconds: u64,
    pub invalid_submissions_duration_seconds: u64,
    pub reconnect_ban_threshold: u32,
    pub reconnect_window_seconds: u64,
}

impl Default for BanPolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            invalid_submissions_after: 60,
            invalid_submissions_window_seconds: 600,
            invalid_submissions_duration_seconds: 3600,
            reconnect_ban_threshold: 20,
            reconnect_window_seconds: 60,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AcceptLimiterConfig {
    pub enabled: bool,
    pub max_accepts_per_second: f64,
    pub max_accept_burst: u32,
}

impl Default for AcceptLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_accepts_per_second: 50.0,
            max_accept_burst: 200,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RpcConfig {
    pub url: String,
    pub cookie_path: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8332".to_string(),
            cookie_path: None,
            user: None,
            password: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ZmqConfig {
    pub hashblock_addr: Option<String>,
    pub rawblock_addr: Option<String>,
    pub longpoll_fallback: bool,
}

impl Default for ZmqConfig {
    fn default() -> Self {
        Self {
            hashblock_addr: None,
            rawblock_addr: None,
            longpoll_fallback: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PayoutConfig {
    pub address: String,
    pub pool_fee_percent: f64,
    pub operator_donation_percent: f64,
    pub operator_donation_address: Option<String>,
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            pool_fee_percent: 0.0,
            operator_donation_percent: 0.0,
            operator_donation_address: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub stratum_tls_listen: Option<SocketAddr>,
    pub network: bitcoin::Network,

    pub min_difficulty: f64,
    pub max_difficulty: f64,
    pub lock_suggested_difficulty: bool,
    pub vardiff: VardiffConfig,

    pub extranonce2_size: usize,
    pub template_extranonce2_size: usize,
    pub version_mask: u32,
    pub coinbase_msg: String,
    pub pool_entropy: Option<String>,
    pub job_entropy_len: usize,
    pub coinbase_scriptsig_max_bytes: usize,

    pub payout: PayoutConfig,

    pub share_checks: ShareChecksConfig,
    pub ban_policy: BanPolicyConfig,
    pub accept_limiter: AcceptLimiterConfig,

    pub max_conns: usize,

    pub rpc: RpcConfig,
    pub zmq: ZmqConfig,

    pub stratum_password: Option<String>,
    pub stratum_heartbeat_interval_seconds: u64,
    pub job_retry_delay_min_seconds: u64,
    pub job_retry_delay_max_seconds: u64,

    pub safe_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3333".parse().expect("static addr"),
            stratum_tls_listen: None,
            network: bitcoin::Network::Bitcoin,
            min_difficulty: 1.0,
            max_difficulty: 1_000_000.0,
            lock_suggested_difficulty: false,
            vardiff: VardiffConfig::default(),
            extranonce2_size: 8,
            template_extranonce2_size: 8,
            version_mask: 0x1fff_e000,
            coinbase_msg: "solo pool".to_string(),
            pool_entropy: None,
            job_entropy_len: 8,
            coinbase_scriptsig_max_bytes: 100,
            payout: PayoutConfig::default(),
            share_checks: ShareChecksConfig::default(),
            ban_policy: BanPolicyConfig::default(),
            accept_limiter: AcceptLimiterConfig::default(),
            max_conns: 10_000,
            rpc: RpcConfig::default(),
            zmq: ZmqConfig::default(),
            stratum_password: None,
            stratum_heartbeat_interval_seconds: 30,
            job_retry_delay_min_seconds: 5,
            job_retry_delay_max_seconds: 20,
            safe_mode: false,
        }
    }
}

impl Config {
    /// Loads a `Config` from an optional file path layered under CLI
    /// overrides, validates it, and applies the safe-mode profile if
    /// requested. Returns a typed [`ConfigError`] on any failure so `main`
    /// can map it to exit code 2.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut cfg = match &cli.config {
            Some(path) => {
                let settings = config::Config::builder()
                    .add_source(config::File::with_name(path))
                    .build()
                    .map_err(|e| ConfigError::Parse(e.to_string()))?;
                settings
                    .try_deserialize::<Config>()
                    .map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            None => Config::default(),
        };

        cli.apply(&mut cfg);

        if cli.safe_mode {
            cfg.apply_safe_mode();
        }

        validate::validate(&cfg)?;
        Ok(cfg)
    }

    /// Overrides the conservative safe-mode profile described in the spec:
    /// disables fast decode/encode paths downstream, requires an authorized
    /// connection and worker/job match for shares, keeps duplicate
    /// detection on, and disables automatic bans and connect rate limits.
    pub fn apply_safe_mode(&mut self) {
        self.safe_mode = true;
        self.share_checks.require_authorized_connection = true;
        self.share_checks.require_worker_match = true;
        self.share_checks.check_duplicate = true;
        self.ban_policy.enabled = false;
        self.accept_limiter.enabled = false;
    }

    /// `-flood` load-testing profile: collapses min/max difficulty to a tiny
    /// value so a load generator can submit shares almost for free.
    pub fn apply_flood_mode(&mut self) {
        self.min_difficulty = 0.000_001;
        self.max_difficulty = 0.000_001;
        self.vardiff.min_diff = 0.000_001;
        self.vardiff.max_diff = 0.000_001;
    }
}

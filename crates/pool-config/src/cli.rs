use crate::Config;
use clap::Parser;
use std::net::SocketAddr;

/// CLI surface for the pool server binary. Flags here override whatever a
/// config file sets; `Config::load` applies them after deserializing the
/// file so CLI always wins.
#[derive(Parser, Debug, Clone)]
#[command(name = "poold", version, about = "Solo Bitcoin mining pool server")]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    pub config: Option<String>,

    /// Address the Stratum listener binds to.
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// `bitcoind` JSON-RPC URL.
    #[arg(long)]
    pub rpc_url: Option<String>,

    /// Path to `bitcoind`'s `.cookie` file.
    #[arg(long)]
    pub rpc_cookie: Option<String>,

    #[arg(long, conflicts_with_all = ["testnet", "signet", "regtest"])]
    pub mainnet: bool,
    #[arg(long, conflicts_with_all = ["mainnet", "signet", "regtest"])]
    pub testnet: bool,
    #[arg(long, conflicts_with_all = ["mainnet", "testnet", "regtest"])]
    pub signet: bool,
    #[arg(long, conflicts_with_all = ["mainnet", "testnet", "signet"])]
    pub regtest: bool,

    /// Apply the conservative safe-mode profile (see `Config::apply_safe_mode`).
    #[arg(long)]
    pub safe_mode: bool,

    /// Collapse min/max difficulty to a tiny value for load testing.
    #[arg(long)]
    pub flood: bool,
}

impl Cli {
    /// Applies every flag that was actually set on the command line onto
    /// `cfg`, leaving config-file values in place for anything left unset.
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(listen) = self.listen {
            cfg.listen_addr = listen;
        }
        if let Some(url) = &self.rpc_url {
            cfg.rpc.url = url.clone();
        }
        if let Some(cookie) = &self.rpc_cookie {
            cfg.rpc.cookie_path = Some(cookie.clone());
        }

        if self.mainnet {
            cfg.network = bitcoin::Network::Bitcoin;
        } else if self.testnet {
            cfg.network = bitcoin::Network::Testnet;
        } else if self.signet {
            cfg.network = bitcoin::Network::Signet;
        } else if self.regtest {
            cfg.network = bitcoin::Network::Regtest;
        }

        if self.flood {
            cfg.apply_flood_mode();
        }
    }
}

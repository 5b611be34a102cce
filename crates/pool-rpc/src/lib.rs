//! Async JSON-RPC client for `bitcoind`. Exposes the handful of calls the
//! job manager and share validator need (`getblocktemplate`,
//! `getbestblockhash`, `getblockheader`, `submitblock`,
//! `getblockchaininfo`), cookie-file or basic auth, and per-call
//! latency/health stats.

mod auth;
mod client;
mod error;
mod model;
mod stats;

pub use auth::Auth;
pub use client::RpcClient;
pub use error::RpcError;
pub use model::{BlockHeaderInfo, BlockTemplate, BlockchainInfo, CoinbaseAux, TemplateTransaction};
pub use stats::RpcStatsSnapshot;

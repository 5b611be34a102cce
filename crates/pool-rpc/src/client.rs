use crate::auth::{Auth, CachedCookie};
use crate::error::RpcError;
use crate::model::{BlockHeaderInfo, BlockTemplate, BlockchainInfo};
use crate::stats::{RpcStats, RpcStatsSnapshot};
use pool_async::{tokio, tokio_util};
use pool_logging::macros::*;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(120);

/// Async JSON-RPC client for `bitcoind`. Keeps two `reqwest::Client`s: one
/// tuned for ordinary calls (`getblockheader`, `submitblock`, ...) with a
/// short timeout, and a second for the `getblocktemplate` long-poll call,
/// which can legitimately block on the node for up to its long-poll
/// timeout. Sharing one client/timeout between the two would mean every
/// ordinary call had to tolerate minutes of latency, or every long-poll got
/// cut off after a few seconds.
pub struct RpcClient {
    url: String,
    auth: Auth,
    cached_cookie: Mutex<CachedCookie>,
    http: reqwest::Client,
    http_long_poll: reqwest::Client,
    next_id: AtomicU64,
    stats: RpcStats,
}

impl RpcClient {
    pub fn new(url: impl Into<String>, auth: Auth) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        let http_long_poll = reqwest::Client::builder()
            .timeout(LONG_POLL_TIMEOUT)
            .build()?;
        Ok(Self {
            url: url.into(),
            auth,
            cached_cookie: Mutex::new(CachedCookie::default()),
            http,
            http_long_poll,
            next_id: AtomicU64::new(1),
            stats: RpcStats::default(),
        })
    }

    pub fn stats(&self) -> RpcStatsSnapshot {
        self.stats.snapshot()
    }

    /// Plain call with the client's default timeout, no external
    /// cancellation.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        self.call_ctx(method, params, &CancellationToken::new(), DEFAULT_TIMEOUT)
            .await
    }

    /// Call honoring an explicit timeout and an external cancellation
    /// token, for callers (the job manager's `refresh`, the block-submit
    /// retry loop) that need to give up early.
    pub async fn call_ctx<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<T, RpcError> {
        self.call_with_client(&self.http, method, params, cancel, timeout)
            .await
    }

    /// Long-poll call (`getblocktemplate` with a `longpollid`): uses the
    /// long-poll HTTP client and timeout by default, still cancellable.
    pub async fn call_long_poll_ctx<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<T, RpcError> {
        self.call_with_client(&self.http_long_poll, method, params, cancel, LONG_POLL_TIMEOUT)
            .await
    }

    async fn call_with_client<T: DeserializeOwned>(
        &self,
        client: &reqwest::Client,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let auth_header = {
            let mut cached = self.cached_cookie.lock().expect("cookie cache poisoned");
            self.auth.basic_header_value(&mut cached)?
        };

        let started = Instant::now();
        let send = client
            .post(&self.url)
            .header(reqwest::header::AUTHORIZATION, auth_header)
            .json(&body)
            .send();

        let response = tokio::select! {
            result = tokio::time::timeout(timeout, send) => {
                match result {
                    Ok(Ok(resp)) => resp,
                    Ok(Err(e)) => {
                        self.stats.record_error();
                        self.stats.record_disconnect();
                        return Err(RpcError::Network(e));
                    }
                    Err(_) => {
                        self.stats.record_error();
                        return Err(RpcError::Timeout(timeout));
                    }
                }
            }
            _ = cancel.cancelled() => {
                return Err(RpcError::Cancelled);
            }
        };

        let envelope: Value = response.json().await.map_err(RpcError::Network)?;
        self.stats.record_call(started.elapsed());

        if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
            self.stats.record_error();
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-1);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown rpc error")
                .to_string();
            return Err(RpcError::Rpc { code, message });
        }

        let result = envelope.get("result").cloned().unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(RpcError::Malformed)
    }

    pub async fn get_best_block_hash(&self) -> Result<String, RpcError> {
        self.call("getbestblockhash", json!([])).await
    }

    pub async fn get_block_header(&self, hash: &str) -> Result<BlockHeaderInfo, RpcError> {
        self.call("getblockheader", json!([hash, true])).await
    }

    pub async fn get_block_header_ctx(
        &self,
        hash: &str,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<BlockHeaderInfo, RpcError> {
        self.call_ctx("getblockheader", json!([hash, true]), cancel, timeout)
            .await
    }

    pub async fn get_blockchain_info(&self) -> Result<BlockchainInfo, RpcError> {
        self.call("getblockchaininfo", json!([])).await
    }

    pub async fn get_block_template(
        &self,
        rules: &[&str],
        longpoll_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<BlockTemplate, RpcError> {
        let mut req = serde_json::Map::new();
        req.insert("rules".into(), json!(rules));
        req.insert(
            "capabilities".into(),
            json!(["coinbasetxn", "workid", "coinbase/append"]),
        );
        if let Some(id) = longpoll_id {
            req.insert("longpollid".into(), json!(id));
        }
        self.call_long_poll_ctx("getblocktemplate", json!([Value::Object(req)]), cancel)
            .await
    }

    /// Submits a block. `bitcoind`'s `submitblock` signals acceptance with
    /// a `null` result; `"duplicate"` means the node already has this exact
    /// block (someone else's submission, or our own retry, won the race —
    /// still a win from the pool's perspective) and is treated as success
    /// too. Any other non-null string is a genuine rejection reason.
    pub async fn submit_block(&self, block_hex: &str, cancel: &CancellationToken, timeout: Duration) -> Result<(), RpcError> {
        let result: Value = self
            .call_ctx("submitblock", json!([block_hex]), cancel, timeout)
            .await?;
        match result.as_str() {
            None if result.is_null() => Ok(()),
            Some("duplicate") => Ok(()),
            Some(reason) => Err(RpcError::BlockRejected(reason.to_string())),
            None => {
                warn!("submitblock returned an unexpected non-string, non-null result: {result}");
                Ok(())
            }
        }
    }
}

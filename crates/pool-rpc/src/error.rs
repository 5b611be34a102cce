use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("network error calling bitcoind: {0}")]
    Network(#[from] reqwest::Error),

    #[error("bitcoind returned rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed rpc response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("call cancelled")]
    Cancelled,

    #[error("failed to read cookie file {path}: {source}")]
    CookieFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// `submitblock` returned a non-null, non-`"duplicate"` rejection
    /// reason (e.g. `"bad-prevblk"`, `"high-hash"`, `"inconclusive"`):
    /// the node looked at this exact block and declined it. Resubmitting
    /// unchanged bytes won't change that, unlike a timeout.
    #[error("bitcoind rejected submitblock: {0}")]
    BlockRejected(String),
}

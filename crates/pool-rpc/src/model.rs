use serde::{Deserialize, Serialize};

/// `getblocktemplate` result, trimmed to the fields the job manager needs.
/// Field names match `bitcoind`'s JSON-RPC response verbatim so this can
/// deserialize directly without a translation layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockTemplate {
    pub version: i32,
    pub previousblockhash: String,
    pub transactions: Vec<TemplateTransaction>,
    pub coinbaseaux: CoinbaseAux,
    pub coinbasevalue: u64,
    pub longpollid: String,
    pub target: String,
    pub mintime: u64,
    #[serde(default)]
    pub mutable: Vec<String>,
    pub noncerange: String,
    #[serde(default)]
    pub sigoplimit: u64,
    #[serde(default)]
    pub sizelimit: u64,
    #[serde(default)]
    pub weightlimit: u64,
    pub curtime: u64,
    pub bits: String,
    pub height: u64,
    #[serde(default)]
    pub default_witness_commitment: Option<String>,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub vbavailable: serde_json::Value,
    #[serde(default)]
    pub vbrequired: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateTransaction {
    pub data: String,
    pub txid: String,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub depends: Vec<u32>,
    pub fee: i64,
    pub sigops: i64,
    #[serde(default)]
    pub weight: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CoinbaseAux {
    #[serde(default)]
    pub flags: String,
}

/// `getblockheader` result, trimmed to the fields the block-submit retry
/// loop and node-sync snapshot need.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockHeaderInfo {
    pub hash: String,
    pub height: u64,
    pub time: u64,
    pub bits: String,
    pub difficulty: f64,
    #[serde(default)]
    pub previousblockhash: Option<String>,
    #[serde(default)]
    pub confirmations: i64,
}

/// `getblockchaininfo` result, trimmed to the node-sync snapshot's needs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockchainInfo {
    pub blocks: u64,
    pub headers: u64,
    pub bestblockhash: String,
    #[serde(rename = "initialblockdownload")]
    pub ibd: bool,
}

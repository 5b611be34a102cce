use serde::Deserialize;
use serde_json::Value;

/// `mining.subscribe` request params: `[user_agent, session_id?]`. Both are
/// optional and advisory; the pool doesn't reject a subscribe over a
/// missing or unrecognized user agent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscribeParams {
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
}

impl SubscribeParams {
    pub fn from_value(v: &Value) -> Self {
        let arr = v.as_array();
        Self {
            user_agent: arr
                .and_then(|a| a.first())
                .and_then(|v| v.as_str())
                .map(str::to_string),
            session_id: arr
                .and_then(|a| a.get(1))
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }
    }
}

/// `mining.subscribe` result: `[[[method, subscription_id], ...], extranonce1, extranonce2_size]`.
#[derive(Debug, Clone)]
pub struct SubscribeResult {
    pub subscriptions: Vec<(String, String)>,
    pub extranonce1: String,
    pub extranonce2_size: usize,
}

impl SubscribeResult {
    pub fn to_value(&self) -> Value {
        let subs: Vec<Value> = self
            .subscriptions
            .iter()
            .map(|(method, id)| serde_json::json!([method, id]))
            .collect();
        serde_json::json!([subs, self.extranonce1, self.extranonce2_size])
    }
}

/// `mining.authorize` request params: `[worker_name, password?]`.
#[derive(Debug, Clone)]
pub struct AuthorizeParams {
    pub worker: String,
    pub password: Option<String>,
}

impl AuthorizeParams {
    pub fn from_value(v: &Value) -> Option<Self> {
        let arr = v.as_array()?;
        let worker = arr.first()?.as_str()?.to_string();
        let password = arr.get(1).and_then(|v| v.as_str()).map(str::to_string);
        Some(Self { worker, password })
    }

    /// Splits `worker_name.sub_worker` into its two halves. Either half may
    /// be absent; the prefix before the first `.` is the wallet/account
    /// identifier checked against the pool's configured payout address.
    pub fn split_subworker(&self) -> (&str, Option<&str>) {
        match self.worker.split_once('.') {
            Some((base, sub)) => (base, Some(sub)),
            None => (&self.worker, None),
        }
    }
}

/// `mining.configure` request params: `[extensions, extension_params]`.
#[derive(Debug, Clone, Default)]
pub struct ConfigureParams {
    pub version_rolling_mask: Option<u32>,
    pub version_rolling_min_bit_count: Option<u32>,
}

impl ConfigureParams {
    pub fn from_value(v: &Value) -> Self {
        let arr = match v.as_array() {
            Some(a) if a.len() >= 2 => a,
            _ => return Self::default(),
        };
        let extensions: Vec<&str> = arr[0]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        if !extensions.iter().any(|e| *e == "version-rolling") {
            return Self::default();
        }
        let params = &arr[1];
        let mask = params
            .get("version-rolling.mask")
            .and_then(|v| v.as_str())
            .and_then(|s| u32::from_str_radix(s, 16).ok());
        let min_bit_count = params
            .get("version-rolling.min-bit-count")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32);
        Self {
            version_rolling_mask: mask,
            version_rolling_min_bit_count: min_bit_count,
        }
    }
}

/// `mining.submit` request params:
/// `[worker, job_id, extranonce2_hex, ntime_hex, nonce_hex, version_bits_hex?]`.
#[derive(Debug, Clone)]
pub struct SubmitParams {
    pub worker: String,
    pub job_id: String,
    pub extranonce2_hex: String,
    pub ntime_hex: String,
    pub nonce_hex: String,
    pub version_bits_hex: Option<String>,
}

impl SubmitParams {
    pub fn from_value(v: &Value) -> Option<Self> {
        let arr = v.as_array()?;
        if arr.len() < 5 {
            return None;
        }
        Some(Self {
            worker: arr[0].as_str()?.to_string(),
            job_id: arr[1].as_str()?.to_string(),
            extranonce2_hex: arr[2].as_str()?.to_string(),
            ntime_hex: arr[3].as_str()?.to_string(),
            nonce_hex: arr[4].as_str()?.to_string(),
            version_bits_hex: arr.get(5).and_then(|v| v.as_str()).map(str::to_string),
        })
    }
}

/// `mining.notify` notification params, in wire order.
#[derive(Debug, Clone)]
pub struct NotifyParams {
    pub job_id: String,
    pub prev_hash_hex: String,
    pub coinb1_hex: String,
    pub coinb2_hex: String,
    pub merkle_branch_hex: Vec<String>,
    pub version_hex: String,
    pub bits_hex: String,
    pub ntime_hex: String,
    pub clean_jobs: bool,
}

impl NotifyParams {
    pub fn to_value(&self) -> Value {
        serde_json::json!([
            self.job_id,
            self.prev_hash_hex,
            self.coinb1_hex,
            self.coinb2_hex,
            self.merkle_branch_hex,
            self.version_hex,
            self.bits_hex,
            self.ntime_hex,
            self.clean_jobs,
        ])
    }
}

pub fn set_difficulty_value(difficulty: f64) -> Value {
    serde_json::json!([difficulty])
}

pub fn set_version_mask_value(mask: u32) -> Value {
    serde_json::json!([format!("{:08x}", mask)])
}

pub fn set_extranonce_value(extranonce1_hex: &str, extranonce2_size: usize) -> Value {
    serde_json::json!([extranonce1_hex, extranonce2_size])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subworker_splits_on_first_dot() {
        let p = AuthorizeParams {
            worker: "bc1qxyz.rig1".to_string(),
            password: None,
        };
        assert_eq!(p.split_subworker(), ("bc1qxyz", Some("rig1")));
    }

    #[test]
    fn submit_params_requires_five_fields() {
        assert!(SubmitParams::from_value(&json!(["w", "j", "00000000"])).is_none());
        assert!(SubmitParams::from_value(&json!(["w", "j", "00000000", "5f5e0ff0", "00000000"])).is_some());
    }

    #[test]
    fn configure_ignores_unrequested_extensions() {
        let p = ConfigureParams::from_value(&json!([["unknown-ext"], {}]));
        assert!(p.version_rolling_mask.is_none());
    }

    #[test]
    fn configure_parses_version_rolling_mask() {
        let p = ConfigureParams::from_value(&json!([
            ["version-rolling"],
            {"version-rolling.mask": "1fffe000", "version-rolling.min-bit-count": 2}
        ]));
        assert_eq!(p.version_rolling_mask, Some(0x1fff_e000));
        assert_eq!(p.version_rolling_min_bit_count, Some(2));
    }
}

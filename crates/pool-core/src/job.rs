//! Template ingestion: freshness checks, change detection, and the
//! immutable `Job` a template turns into once it passes both.

use crate::coinbase::{build_coinbase, CoinbaseInputs, PayoutSplit};
use crate::error::CoreError;
use bitcoin::consensus::Decodable;
use bitcoin::hashes::{sha256d, Hash};
use pool_bitcoin::{merkle_root_from_branch, Target};
use pool_rpc::BlockTemplate;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Configuration a template is turned into a job under. Pulled once per
/// job build from the process-wide config rather than borrowing the whole
/// config struct, so tests can construct a minimal one directly.
#[derive(Clone)]
pub struct JobBuildConfig {
    pub payout: PayoutSplit,
    pub base_version_mask: u32,
    pub coinbase_msg: String,
    pub pool_entropy: Option<String>,
    pub job_entropy_len: usize,
    pub coinbase_scriptsig_max_bytes: usize,
    pub extranonce1_len: usize,
    pub extranonce2_size: usize,
    pub template_extranonce2_size: usize,
}

/// An immutable unit of work handed to every subscriber. Everything here
/// is computed once at job-build time; per-share work (extranonce2
/// splicing, header assembly) never mutates a `Job`.
#[derive(Clone)]
pub struct Job {
    pub job_id: u64,
    pub height: u64,
    pub clean: bool,
    pub version: i32,
    pub version_mask: u32,
    pub prev_hash_bytes: [u8; 32],
    /// `previousblockhash` exactly as the node sent it, for `mining.notify`'s
    /// `prev_hash_hex`. Stratum's wire convention for this field is a
    /// byte-swapped form distinct from both `prev_hash_bytes` and the node's
    /// own display order; pairing it with the raw template hex is what
    /// existing miners expect, so it is kept alongside rather than derived
    /// from `prev_hash_bytes`.
    pub prev_hash_hex_wire: String,
    pub bits_bytes: [u8; 4],
    pub target: Target,
    pub curtime: u64,
    pub mintime: u64,
    pub coinbase_value: u64,
    pub extranonce2_size: usize,
    pub template_extranonce2_size: usize,
    pub merkle_branch: Vec<sha256d::Hash>,
    pub coinb1: Vec<u8>,
    pub coinb2: Vec<u8>,
    pub txids: Vec<String>,
    pub raw_tx_hexes: Vec<String>,
    pub longpollid: String,
}

static JOB_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Monotonic job id: nanosecond timestamp with a sequence number folded
/// into the low bits so two jobs built within the same nanosecond (a real
/// possibility on a fast refresh loop) still compare distinct and
/// increasing.
fn next_job_id() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let seq = JOB_SEQUENCE.fetch_add(1, Ordering::Relaxed) & 0xfff;
    (nanos & !0xfff) | seq
}

/// `templateChanged`: `(needs_new_job, clean)`.
pub fn template_changed(current: Option<&Job>, template: &BlockTemplate, txids: &[String]) -> (bool, bool) {
    let Some(current) = current else {
        return (true, true);
    };

    let bits = match decode_hex_fixed::<4>(&template.bits) {
        Some(b) => b,
        None => return (true, true),
    };
    let prev_hash = match parse_prev_hash(&template.previousblockhash) {
        Some(p) => p,
        None => return (true, true),
    };

    if prev_hash != current.prev_hash_bytes || template.height != current.height || bits != current.bits_bytes {
        return (true, true);
    }

    if txids.len() != current.txids.len() || txids.iter().zip(&current.txids).any(|(a, b)| a != b) {
        return (true, false);
    }

    (false, false)
}

/// Computes the effective version-rolling mask for a template: the base
/// mask with any bits the template's consensus rules require cleared, so
/// the pool never advertises a mask that could let a miner roll a bit the
/// network is enforcing. Falls back to the base mask if that would zero
/// the result, since broadcasting `0` would disable version rolling
/// entirely for every miner.
///
/// `vbavailable` maps an active soft-fork rule name to the version bit it
/// occupies; only bits belonging to a rule actually listed in `rules` are
/// cleared, matching the template's *currently signaling* deployments
/// rather than every bit the node happens to know about. Templates that
/// don't advertise `version/force` in `mutable` never constrain the mask
/// at all: the node is telling us the version field is entirely ours.
pub fn compute_version_mask(
    base_mask: u32,
    vbrequired: u32,
    vbavailable: &std::collections::HashMap<String, u32>,
    rules: &[String],
    mutable: &[String],
) -> u32 {
    if !mutable.iter().any(|m| m == "version/force") {
        return base_mask;
    }

    let mut reserved = vbrequired;
    for rule in rules {
        if let Some(bit) = vbavailable.get(rule) {
            reserved |= 1u32 << bit;
        }
    }

    let candidate = base_mask & !reserved;
    if candidate == 0 {
        base_mask
    } else {
        candidate
    }
}

fn decode_hex_fixed<const N: usize>(s: &str) -> Option<[u8; N]> {
    let bytes = hex::decode(s).ok()?;
    bytes.try_into().ok()
}

/// Parses `getblocktemplate`'s `previousblockhash` (reversed-byte "display
/// order", like every other RPC-facing block/tx hash) into the raw,
/// natural-order bytes a header's `hashPrevBlock` field needs. Going
/// through `bitcoin::BlockHash`'s `FromStr` rather than a bare hex decode
/// is what actually performs that reversal.
fn parse_prev_hash(s: &str) -> Option<[u8; 32]> {
    use std::str::FromStr;
    bitcoin::BlockHash::from_str(s).ok().map(|h| h.to_byte_array())
}

/// True if `declared_hex` matches `computed` in either byte order: some
/// nodes/tests present natural order, RPC responses are reversed-hex.
fn hex_matches_either_order(computed: &[u8; 32], declared_hex: &str) -> bool {
    let natural = hex::encode(computed);
    let mut reversed_bytes = *computed;
    reversed_bytes.reverse();
    let reversed = hex::encode(reversed_bytes);
    declared_hex.eq_ignore_ascii_case(&natural) || declared_hex.eq_ignore_ascii_case(&reversed)
}

/// Recomputes a transaction's txid (and, if the node provided one, its
/// wtxid) from its raw bytes and checks both against the node-declared
/// values. The non-witness-stripped txid is double-SHA256 over the
/// transaction with its witness data removed; the wtxid (`hash` field) is
/// the same hash over the full, witness-included bytes.
fn verify_txid(raw_hex: &str, declared_txid_hex: &str, declared_wtxid_hex: Option<&str>, index: usize) -> Result<sha256d::Hash, CoreError> {
    let raw = hex::decode(raw_hex).map_err(|_| CoreError::TxidMismatch { index })?;
    let tx = bitcoin::Transaction::consensus_decode(&mut raw.as_slice())
        .map_err(|_| CoreError::TxidMismatch { index })?;
    let computed_txid = tx.compute_txid();

    if !hex_matches_either_order(&computed_txid.to_byte_array(), declared_txid_hex) {
        return Err(CoreError::TxidMismatch { index });
    }

    if let Some(declared_wtxid_hex) = declared_wtxid_hex {
        let computed_wtxid = tx.compute_wtxid();
        if !hex_matches_either_order(&computed_wtxid.to_byte_array(), declared_wtxid_hex) {
            return Err(CoreError::TxidMismatch { index });
        }
    }

    Ok(sha256d::Hash::from_byte_array(computed_txid.to_byte_array()))
}

fn job_entropy(len: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

pub fn build_job(
    template: &BlockTemplate,
    cfg: &JobBuildConfig,
    clean: bool,
) -> Result<Job, CoreError> {
    let bits_bytes = decode_hex_fixed::<4>(&template.bits).ok_or(CoreError::BitsTargetMismatch)?;
    let bits = u32::from_be_bytes(bits_bytes);
    let target_from_bits = Target::from_compact_bits(bits);

    let target_bytes = decode_hex_fixed::<32>(&template.target).ok_or(CoreError::BitsTargetMismatch)?;
    if Target::from_be_bytes(&target_bytes) != target_from_bits {
        return Err(CoreError::BitsTargetMismatch);
    }

    let witness_commitment = match &template.default_witness_commitment {
        Some(hex_str) if !hex_str.is_empty() && hex_str.len() % 2 == 0 => {
            Some(hex::decode(hex_str).map_err(|_| CoreError::BadWitnessCommitment)?)
        }
        Some(_) => return Err(CoreError::BadWitnessCommitment),
        None => None,
    };

    let mut tx_hashes = Vec::with_capacity(template.transactions.len() + 1);
    let mut txids = Vec::with_capacity(template.transactions.len());
    let mut raw_tx_hexes = Vec::with_capacity(template.transactions.len());
    for (index, tx) in template.transactions.iter().enumerate() {
        let hash = verify_txid(&tx.data, &tx.txid, tx.hash.as_deref(), index)?;
        tx_hashes.push(hash);
        txids.push(tx.txid.clone());
        raw_tx_hexes.push(tx.data.clone());
    }

    let prev_hash_bytes = parse_prev_hash(&template.previousblockhash).ok_or(CoreError::BitsTargetMismatch)?;

    let script_time = template.curtime as u32;
    let mut message = cfg.coinbase_msg.clone();
    if let Some(entropy) = &cfg.pool_entropy {
        message = format!("{message}/{entropy}");
    }
    message = format!("{message}/{}", job_entropy(cfg.job_entropy_len));

    let coinbase_flags = hex::decode(&template.coinbaseaux.flags).unwrap_or_default();

    let inputs = CoinbaseInputs {
        height: template.height,
        coinbase_flags: &coinbase_flags,
        script_time,
        coinbase_message: &message,
        extranonce1_len: cfg.extranonce1_len,
        extranonce2_placeholder_len: cfg.template_extranonce2_size,
        coinbase_value: template.coinbasevalue,
        witness_commitment: witness_commitment.as_deref(),
        payout: &cfg.payout,
    };
    let coinbase = build_coinbase(&inputs, cfg.coinbase_scriptsig_max_bytes)?;
    let coinbase_hash = sha256d::Hash::from_byte_array(coinbase.transaction.compute_txid().to_byte_array());

    let mut tree_hashes = vec![coinbase_hash];
    tree_hashes.extend(tx_hashes);
    let merkle_branch = pool_bitcoin::compute_merkle_branch(&tree_hashes);

    // Sanity: folding the branch back onto the coinbase hash must recover
    // a consistent root (used only as a cheap self-check, not re-asserted
    // against the template since the template carries no merkle root field).
    let _root = merkle_root_from_branch(coinbase_hash, &merkle_branch);

    let vbavailable: std::collections::HashMap<String, u32> = template
        .vbavailable
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(name, bit)| bit.as_u64().map(|b| (name.clone(), b as u32)))
                .collect()
        })
        .unwrap_or_default();
    let version_mask = compute_version_mask(
        cfg.base_version_mask,
        template.vbrequired,
        &vbavailable,
        &template.rules,
        &template.mutable,
    );

    Ok(Job {
        job_id: next_job_id(),
        height: template.height,
        clean,
        version: template.version,
        version_mask,
        prev_hash_bytes,
        prev_hash_hex_wire: template.previousblockhash.clone(),
        bits_bytes,
        target: target_from_bits,
        curtime: template.curtime,
        mintime: template.mintime,
        coinbase_value: template.coinbasevalue,
        extranonce2_size: cfg.extranonce2_size,
        template_extranonce2_size: cfg.template_extranonce2_size,
        merkle_branch,
        coinb1: coinbase.coinb1,
        coinb2: coinbase.coinb2,
        txids,
        raw_tx_hexes,
        longpollid: template.longpollid.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_mask_ignores_templates_that_dont_advertise_version_force() {
        let vbavailable = std::collections::HashMap::new();
        let rules = vec![];
        let mutable = vec!["coinbase/append".to_string()];
        assert_eq!(
            compute_version_mask(0x1fff_e000, 0x1fff_e000, &vbavailable, &rules, &mutable),
            0x1fff_e000
        );
    }

    #[test]
    fn version_mask_falls_back_to_base_when_fully_cleared() {
        let vbavailable = std::collections::HashMap::new();
        let rules = vec![];
        let mutable = vec!["version/force".to_string()];
        assert_eq!(
            compute_version_mask(0x1fff_e000, 0x1fff_e000, &vbavailable, &rules, &mutable),
            0x1fff_e000
        );
    }

    #[test]
    fn version_mask_clears_required_bits() {
        let vbavailable = std::collections::HashMap::new();
        let rules = vec![];
        let mutable = vec!["version/force".to_string()];
        assert_eq!(
            compute_version_mask(0x1fff_e000, 0x0000_e000, &vbavailable, &rules, &mutable),
            0x1fff_0000
        );
    }

    #[test]
    fn version_mask_clears_bits_for_active_signaling_rules() {
        let mut vbavailable = std::collections::HashMap::new();
        vbavailable.insert("taproot".to_string(), 2u32); // bit 2 => 0x4
        let rules = vec!["taproot".to_string()];
        let mutable = vec!["version/force".to_string()];
        assert_eq!(
            compute_version_mask(0x1fff_e000, 0, &vbavailable, &rules, &mutable),
            0x1fff_e000 & !0x4
        );
        // A rule present in vbavailable but not signaling (absent from
        // `rules`) must not constrain the mask.
        let rules_inactive = vec![];
        assert_eq!(
            compute_version_mask(0x1fff_e000, 0, &vbavailable, &rules_inactive, &mutable),
            0x1fff_e000
        );
    }

    #[test]
    fn parse_prev_hash_reverses_rpc_display_order_into_header_order() {
        // `getblocktemplate`'s previousblockhash, like every other hash the
        // RPC hands back, is reversed-byte "display order"; a header's
        // hashPrevBlock field wants the natural byte order instead.
        let display_order = "00000000000000000001a2b3c4d5e6f708192a3b4c5d6e7f8091a2b3c4d5e6f";
        let bytes = parse_prev_hash(display_order).expect("valid hash hex");
        let mut expected = hex::decode(display_order).unwrap();
        expected.reverse();
        assert_eq!(bytes.to_vec(), expected);
    }

    #[test]
    fn job_id_is_monotonic() {
        let a = next_job_id();
        let b = next_job_id();
        assert!(b > a);
    }

    fn sample_tx_hex() -> String {
        use bitcoin::blockdata::locktime::absolute::LockTime;
        use bitcoin::blockdata::transaction::{OutPoint, Sequence, Transaction, TxIn, TxOut};
        use bitcoin::blockdata::witness::Witness;
        use bitcoin::consensus::Encodable;
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

    #[test]
    fn verify_txid_accepts_either_byte_order() {
        use bitcoin::consensus::Decodable;
        let raw_hex = sample_tx_hex();
        let raw = hex::decode(&raw_hex).unwrap();
        let tx = bitcoin::Transaction::consensus_decode(&mut raw.as_slice()).unwrap();
        let txid = tx.compute_txid();

        let natural = hex::encode(txid.to_byte_array());
        let mut reversed = txid.to_byte_array();
        reversed.reverse();
        let reversed_hex = hex::encode(reversed);

        assert!(verify_txid(&raw_hex, &natural, None, 0).is_ok());
        assert!(verify_txid(&raw_hex, &reversed_hex, None, 0).is_ok());
    }

    #[test]
    fn verify_txid_rejects_a_forged_txid() {
        let raw_hex = sample_tx_hex();
        let forged = "ff".repeat(32);
        let err = verify_txid(&raw_hex, &forged, None, 3).unwrap_err();
        assert_eq!(err, CoreError::TxidMismatch { index: 3 });
    }

    #[test]
    fn verify_txid_rejects_a_forged_wtxid() {
        use bitcoin::consensus::Decodable;
        let raw_hex = sample_tx_hex();
        let raw = hex::decode(&raw_hex).unwrap();
        let tx = bitcoin::Transaction::consensus_decode(&mut raw.as_slice()).unwrap();
        let txid_hex = hex::encode(tx.compute_txid().to_byte_array());
        let forged_wtxid = "ee".repeat(32);
        let err = verify_txid(&raw_hex, &txid_hex, Some(&forged_wtxid), 0).unwrap_err();
        assert_eq!(err, CoreError::TxidMismatch { index: 0 });
    }
}

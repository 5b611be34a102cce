//! Coinbase transaction construction and the `coinb1`/`coinb2` split
//! Stratum needs to let a miner inject its own extranonce bytes.

use bitcoin::blockdata::locktime::absolute::LockTime;
use bitcoin::blockdata::transaction::{OutPoint, Sequence, Transaction, TxIn, TxOut};
use bitcoin::blockdata::witness::Witness;
use bitcoin::consensus::Encodable;
use bitcoin::{Amount, ScriptBuf};

use crate::error::CoreError;

/// How the coinbase value is split across outputs.
#[derive(Clone, Debug)]
pub struct PayoutSplit {
    pub payout_script: ScriptBuf,
    pub pool_fee_percent: f64,
    pub donation_script: Option<ScriptBuf>,
    pub operator_donation_percent: f64,
}

/// Everything needed to build one job's coinbase transaction. Each field
/// here is either pulled straight from the template or derived once at job
/// build time; nothing here changes per-share (extranonce2 is spliced in
/// by the miner, not by this struct).
pub struct CoinbaseInputs<'a> {
    pub height: u64,
    pub coinbase_flags: &'a [u8],
    pub script_time: u32,
    pub coinbase_message: &'a str,
    pub extranonce1_len: usize,
    pub extranonce2_placeholder_len: usize,
    pub coinbase_value: u64,
    pub witness_commitment: Option<&'a [u8]>,
    pub payout: &'a PayoutSplit,
}

/// A built coinbase transaction plus the `coinb1`/`coinb2` split Stratum
/// sends to miners: `coinb1 ++ extranonce1 ++ extranonce2 ++ coinb2`
/// reproduces the serialized transaction exactly.
pub struct CoinbaseBuild {
    pub transaction: Transaction,
    pub coinb1: Vec<u8>,
    pub coinb2: Vec<u8>,
}

/// BIP34 height push: 1..=16 use the single-byte `OP_1`..`OP_16` opcodes,
/// everything else (including 0, which never occurs post-BIP34) is a
/// minimal little-endian push.
fn push_height(height: u64) -> Vec<u8> {
    if (1..=16).contains(&height) {
        return vec![0x50 + height as u8];
    }
    let mut bytes = Vec::new();
    let mut v = height;
    while v > 0 {
        bytes.push((v & 0xff) as u8);
        v >>= 8;
    }
    if bytes.last().copied().unwrap_or(0) & 0x80 != 0 {
        bytes.push(0);
    }
    let mut out = vec![bytes.len() as u8];
    out.extend(bytes);
    out
}

fn push_script_time(time: u32) -> Vec<u8> {
    let mut bytes = time.to_le_bytes().to_vec();
    while bytes.last() == Some(&0) && bytes.len() > 1 {
        bytes.pop();
    }
    if bytes.last().copied().unwrap_or(0) & 0x80 != 0 {
        bytes.push(0);
    }
    let mut out = vec![bytes.len() as u8];
    out.extend(bytes);
    out
}

fn push_varstring(message: &str) -> Vec<u8> {
    let bytes = message.as_bytes();
    let mut out = Vec::new();
    write_varint(&mut out, bytes.len() as u64);
    out.extend_from_slice(bytes);
    out
}

fn write_varint(out: &mut Vec<u8>, v: u64) {
    if v < 0xfd {
        out.push(v as u8);
    } else if v <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(v as u16).to_le_bytes());
    } else if v <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(v as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&v.to_le_bytes());
    }
}

/// Builds the full scriptSig (minus the extranonce placeholder's actual
/// bytes, which the miner fills in) and returns it split at the byte
/// offset where the extranonce region starts, so the caller can construct
/// `coinb1`/`coinb2` around it.
fn build_script_sig(
    inputs: &CoinbaseInputs,
    max_bytes: usize,
) -> Result<(Vec<u8>, usize, usize), CoreError> {
    let mut prefix = Vec::new();
    prefix.extend(push_height(inputs.height));
    prefix.extend_from_slice(inputs.coinbase_flags);
    prefix.extend(push_script_time(inputs.script_time));

    let extranonce_total_len = inputs.extranonce1_len + inputs.extranonce2_placeholder_len;
    if extranonce_total_len > 255 {
        return Err(CoreError::CoinbaseTooLarge);
    }

    let mut message = inputs.coinbase_message.to_string();
    loop {
        let mut candidate = prefix.clone();
        candidate.push(extranonce_total_len as u8);
        let extranonce_offset = candidate.len();
        candidate.extend(std::iter::repeat(0u8).take(extranonce_total_len));
        candidate.extend(push_varstring(&message));

        if candidate.len() <= max_bytes || message.is_empty() {
            if candidate.len() > max_bytes {
                return Err(CoreError::CoinbaseTooLarge);
            }
            return Ok((candidate, extranonce_offset, extranonce_total_len));
        }
        // Trim the message one character at a time until the scriptSig fits.
        message.pop();
    }
}

fn outputs_for_split(
    coinbase_value: u64,
    witness_commitment: Option<&[u8]>,
    payout: &PayoutSplit,
) -> Result<Vec<TxOut>, CoreError> {
    if !(0.0..100.0).contains(&payout.pool_fee_percent) {
        return Err(CoreError::InvalidPayoutSplit("pool_fee_percent out of range"));
    }
    if !(0.0..100.0).contains(&payout.operator_donation_percent) {
        return Err(CoreError::InvalidPayoutSplit(
            "operator_donation_percent out of range",
        ));
    }

    let mut outputs = Vec::new();
    if let Some(commitment) = witness_commitment {
        outputs.push(TxOut {
            value: Amount::from_sat(0),
            script_pubkey: ScriptBuf::from_bytes(commitment.to_vec()),
        });
    }

    let total = coinbase_value as f64;
    let pool_fee = (total * payout.pool_fee_percent / 100.0).round() as u64;
    let worker_after_fee = coinbase_value
        .checked_sub(pool_fee)
        .ok_or(CoreError::InvalidPayoutSplit("pool fee exceeds coinbase value"))?;

    if payout.pool_fee_percent > 0.0 && payout.donation_script.is_some() && payout.operator_donation_percent > 0.0 {
        let donation = (pool_fee as f64 * payout.operator_donation_percent / 100.0).round() as u64;
        let pool_after_donation = pool_fee
            .checked_sub(donation)
            .ok_or(CoreError::InvalidPayoutSplit("donation exceeds pool fee"))?;
        if pool_after_donation > 0 {
            outputs.push(TxOut {
                value: Amount::from_sat(pool_after_donation),
                script_pubkey: payout.payout_script.clone(),
            });
        }
        outputs.push(TxOut {
            value: Amount::from_sat(donation),
            script_pubkey: payout.donation_script.clone().expect("checked above"),
        });
        if worker_after_fee == 0 {
            return Err(CoreError::InvalidPayoutSplit("worker payout is zero"));
        }
        outputs.push(TxOut {
            value: Amount::from_sat(worker_after_fee),
            script_pubkey: payout.payout_script.clone(),
        });
    } else if payout.pool_fee_percent > 0.0 {
        if worker_after_fee == 0 {
            return Err(CoreError::InvalidPayoutSplit("worker payout is zero"));
        }
        outputs.push(TxOut {
            value: Amount::from_sat(pool_fee),
            script_pubkey: payout.payout_script.clone(),
        });
        outputs.push(TxOut {
            value: Amount::from_sat(worker_after_fee),
            script_pubkey: payout.payout_script.clone(),
        });
    } else {
        outputs.push(TxOut {
            value: Amount::from_sat(coinbase_value),
            script_pubkey: payout.payout_script.clone(),
        });
    }

    Ok(outputs)
}

pub fn build_coinbase(
    inputs: &CoinbaseInputs,
    max_scriptsig_bytes: usize,
) -> Result<CoinbaseBuild, CoreError> {
    let (script_sig_template, extranonce_offset, extranonce_len) =
        build_script_sig(inputs, max_scriptsig_bytes)?;

    let tx_in = TxIn {
        previous_output: OutPoint::null(),
        script_sig: ScriptBuf::from_bytes(script_sig_template.clone()),
        sequence: Sequence(0),
        witness: Witness::new(),
    };

    let outputs = outputs_for_split(inputs.coinbase_value, inputs.witness_commitment, inputs.payout)?;

    let transaction = Transaction {
        version: bitcoin::transaction::Version(1),
        lock_time: LockTime::ZERO,
        input: vec![tx_in],
        output: outputs,
    };

    let mut serialized = Vec::new();
    transaction
        .consensus_encode(&mut serialized)
        .map_err(|_| CoreError::CoinbaseTooLarge)?;

    // Locate the script_sig's bytes within the serialized transaction: the
    // offset is fixed by the (version, input-count, outpoint, script len
    // varint) prefix we just built, since there's always exactly one input.
    let prefix_len = 4 /* version */ + 1 /* input count */ + 36 /* outpoint */;
    let varint_len = varint_encoded_len(script_sig_template.len() as u64);
    let script_sig_start = prefix_len + varint_len;
    let extranonce_start = script_sig_start + extranonce_offset;
    let extranonce_end = extranonce_start + extranonce_len;

    let coinb1 = serialized[..extranonce_start].to_vec();
    let coinb2 = serialized[extranonce_end..].to_vec();

    Ok(CoinbaseBuild {
        transaction,
        coinb1,
        coinb2,
    })
}

fn varint_encoded_len(v: u64) -> usize {
    if v < 0xfd {
        1
    } else if v <= 0xffff {
        3
    } else if v <= 0xffff_ffff {
        5
    } else {
        9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_payout() -> PayoutSplit {
        PayoutSplit {
            payout_script: ScriptBuf::from_bytes(vec![0x51]),
            pool_fee_percent: 0.0,
            donation_script: None,
            operator_donation_percent: 0.0,
        }
    }

    #[test]
    fn coinb1_coinb2_splice_reproduces_serialized_transaction() {
        let payout = dummy_payout();
        let inputs = CoinbaseInputs {
            height: 800_000,
            coinbase_flags: b"/pool/",
            script_time: 1_700_000_000,
            coinbase_message: "solo pool",
            extranonce1_len: 4,
            extranonce2_placeholder_len: 8,
            coinbase_value: 625_000_000,
            witness_commitment: None,
            payout: &payout,
        };

        let build = build_coinbase(&inputs, 200).unwrap();

        let extranonce1 = [0xaau8; 4];
        let extranonce2 = [0xbbu8; 8];
        let mut spliced = build.coinb1.clone();
        spliced.extend_from_slice(&extranonce1);
        spliced.extend_from_slice(&extranonce2);
        spliced.extend_from_slice(&build.coinb2);

        let mut reference = Vec::new();
        build.transaction.consensus_encode(&mut reference).unwrap();

        // The spliced bytes only match the placeholder-zeroed reference
        // outside the extranonce region; confirm lengths agree and the
        // non-extranonce bytes are identical.
        assert_eq!(spliced.len(), reference.len());
        assert_eq!(&spliced[..build.coinb1.len()], &reference[..build.coinb1.len()]);
        assert_eq!(
            &spliced[spliced.len() - build.coinb2.len()..],
            &reference[reference.len() - build.coinb2.len()..]
        );
    }

    #[test]
    fn dual_output_split_rejects_out_of_range_fee() {
        let mut payout = dummy_payout();
        payout.pool_fee_percent = 150.0;
        let inputs = CoinbaseInputs {
            height: 1,
            coinbase_flags: b"",
            script_time: 0,
            coinbase_message: "",
            extranonce1_len: 4,
            extranonce2_placeholder_len: 4,
            coinbase_value: 100,
            witness_commitment: None,
            payout: &payout,
        };
        assert!(build_coinbase(&inputs, 200).is_err());
    }

    #[test]
    fn height_push_uses_op_n_for_small_heights() {
        assert_eq!(push_height(5), vec![0x55]);
        assert_eq!(push_height(17), vec![1, 17]);
    }

    #[test]
    fn txid_is_stable_across_rebuild() {
        let payout = dummy_payout();
        let inputs = CoinbaseInputs {
            height: 800_000,
            coinbase_flags: b"/pool/",
            script_time: 1_700_000_000,
            coinbase_message: "solo pool",
            extranonce1_len: 4,
            extranonce2_placeholder_len: 8,
            coinbase_value: 625_000_000,
            witness_commitment: None,
            payout: &payout,
        };
        let a = build_coinbase(&inputs, 200).unwrap();
        let b = build_coinbase(&inputs, 200).unwrap();
        assert_eq!(a.transaction.compute_txid(), b.transaction.compute_txid());
    }
}

use bitcoin::hashes::{sha256d, Hash};

/// Folds a coinbase transaction hash up through a precomputed Stratum
/// merkle branch to recover the block's merkle root.
///
/// `branch` is the list of sibling hashes a Stratum `mining.notify` sends
/// (`merkle_branch`), each combined with the running hash by
/// double-SHA256(left || right) the same way the rest of the tree was
/// built. This is the one piece of the merkle tree a miner has to redo on
/// every share, since the coinbase (and therefore its hash) changes with
/// every `extranonce2`.
pub fn merkle_root_from_branch(coinbase_hash: sha256d::Hash, branch: &[sha256d::Hash]) -> sha256d::Hash {
    let mut acc = coinbase_hash;
    for sibling in branch {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(acc.as_ref());
        buf[32..].copy_from_slice(sibling.as_ref());
        acc = sha256d::Hash::hash(&buf);
    }
    acc
}

/// Builds the merkle branch list for a fixed set of non-coinbase
/// transaction hashes, in the order a Stratum `mining.notify` expects:
/// position 0 is always (coinbase-hash, tx1-hash) folded as a sibling pair,
/// and each subsequent level carries one sibling hash up the tree. Because
/// the coinbase transaction is the only one that changes across jobs, this
/// branch list is computed once per template and handed to every miner as
/// part of `mining.notify`; none of it needs recomputing per-share.
pub fn compute_merkle_branch(tx_hashes: &[sha256d::Hash]) -> Vec<sha256d::Hash> {
    if tx_hashes.is_empty() {
        return Vec::new();
    }
    let mut branch = Vec::new();
    let mut level: Vec<sha256d::Hash> = tx_hashes.to_vec();
    let mut index = 0usize;
    while level.len() > 1 {
        let sibling_index = if index % 2 == 0 { index + 1 } else { index - 1 };
        let sibling = if sibling_index < level.len() {
            level[sibling_index]
        } else {
            level[index]
        };
        branch.push(sibling);

        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        let mut i = 0;
        while i < level.len() {
            let left = level[i];
            let right = if i + 1 < level.len() { level[i + 1] } else { level[i] };
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(left.as_ref());
            buf[32..].copy_from_slice(right.as_ref());
            next.push(sha256d::Hash::hash(&buf));
            i += 2;
        }
        index /= 2;
        level = next;
    }
    branch
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> sha256d::Hash {
        sha256d::Hash::hash(&[byte; 1])
    }

    #[test]
    fn single_transaction_branch_is_empty() {
        assert!(compute_merkle_branch(&[h(1)]).is_empty());
    }

    #[test]
    fn branch_recovers_the_same_root_the_forward_build_produced() {
        let txs = vec![h(1), h(2), h(3), h(4), h(5)];
        let branch = compute_merkle_branch(&txs);

        let mut level = txs.clone();
        while level.len() > 1 {
            let mut next = Vec::new();
            let mut i = 0;
            while i < level.len() {
                let left = level[i];
                let right = if i + 1 < level.len() { level[i + 1] } else { level[i] };
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(left.as_ref());
                buf[32..].copy_from_slice(right.as_ref());
                next.push(sha256d::Hash::hash(&buf));
                i += 2;
            }
            level = next;
        }
        let expected_root = level[0];

        let recovered = merkle_root_from_branch(txs[0], &branch);
        assert_eq!(recovered, expected_root);
    }
}

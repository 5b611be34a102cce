use crate::DIFFICULTY_1_BITS;
use bitcoin::hashes::sha256d;
use uint::construct_uint;

construct_uint! {
    pub struct U256(4);
}

/// A 256-bit proof-of-work target, and the difficulty values derived from it.
///
/// Internally this is the same big integer Bitcoin Core compares a block
/// hash against: both the `bits` compact encoding and the decimal
/// "difficulty" numbers miners are quoted are just two different views onto
/// this value. We keep our own `U256` (rather than reaching for
/// `bitcoin::pow::Target`) because vardiff needs exact, side-by-side control
/// over the compact<->float round trip and the comparison against a share
/// hash, and a hand-rolled 256-bit integer over `uint` makes both of those a
/// few lines instead of a guess at someone else's rounding behavior.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Target(U256);

impl Target {
    /// Decodes a "compact bits" field (as carried in a block header and in
    /// `getblocktemplate`'s `bits`) per Bitcoin consensus rules. A target
    /// with the sign bit set is invalid and decodes to zero, matching
    /// Bitcoin Core's `arith_uint256::SetCompact`.
    pub fn from_compact_bits(bits: u32) -> Self {
        if bits & 0x0080_0000 != 0 {
            return Target(U256::zero());
        }
        let exponent = bits >> 24;
        let mantissa = U256::from(bits & 0x007f_ffff);
        let value = if exponent <= 3 {
            mantissa >> (8 * (3 - exponent))
        } else {
            mantissa << (8 * (exponent - 3))
        };
        Target(value)
    }

    /// Encodes back to the compact "bits" representation, normalizing the
    /// mantissa so the sign bit never ends up set (Bitcoin Core shifts the
    /// mantissa down and bumps the exponent in that case).
    pub fn to_compact_bits(self) -> u32 {
        let mut size = ((self.0.bits() + 7) / 8) as u32;
        let mut compact = if size <= 3 {
            (self.0.low_u64() as u32) << (8 * (3 - size))
        } else {
            (self.0 >> (8 * (size - 3))).low_u32()
        };
        if compact & 0x0080_0000 != 0 {
            compact >>= 8;
            size += 1;
        }
        compact | (size << 24)
    }

    /// Decodes a target from its big-endian 32-byte representation, the
    /// form `getblocktemplate`'s `target` field uses.
    pub fn from_be_bytes(bytes: &[u8; 32]) -> Self {
        Target(U256::from_big_endian(bytes))
    }

    /// The target that defines difficulty 1.
    pub fn max_target() -> Self {
        Target::from_compact_bits(DIFFICULTY_1_BITS)
    }

    /// Difficulty relative to [`Target::max_target`]. Computed via `f64`
    /// (not exact big-rational division): `f64` carries ~15 significant
    /// digits, comfortably inside the tolerance the pool needs for vardiff
    /// and for displaying a difficulty to a miner.
    pub fn difficulty(self) -> f64 {
        if self.0.is_zero() {
            return f64::INFINITY;
        }
        u256_to_f64(&Target::max_target().0) / u256_to_f64(&self.0)
    }

    /// The target corresponding to a given difficulty, i.e. the inverse of
    /// [`Target::difficulty`]. `difficulty` must be positive; non-positive
    /// values clamp to the maximum possible target (difficulty ~0).
    pub fn from_difficulty(difficulty: f64) -> Self {
        if difficulty <= 0.0 {
            return Target::max_target();
        }
        let max = u256_to_f64(&Target::max_target().0);
        Target(f64_to_u256(max / difficulty))
    }

    /// True if a double-SHA256 block hash, interpreted as a little-endian
    /// 256-bit integer, is numerically `<=` this target — the definition of
    /// "this hash meets this target".
    pub fn is_met_by(self, hash: &sha256d::Hash) -> bool {
        U256::from_little_endian(hash.as_ref()) <= self.0
    }
}

fn u256_to_f64(x: &U256) -> f64 {
    let U256(words) = *x;
    let mut result = 0.0f64;
    for i in (0..4).rev() {
        result = result * 18_446_744_073_709_551_616.0_f64 + words[i] as f64;
    }
    result
}

fn f64_to_u256(mut v: f64) -> U256 {
    if v <= 0.0 {
        return U256::zero();
    }
    let mut words = [0u64; 4];
    for i in (0..4).rev() {
        let base = 18_446_744_073_709_551_616.0_f64.powi(i as i32);
        let w = (v / base).floor();
        words[i] = w as u64;
        v -= w * base;
    }
    U256(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_one_round_trips_through_compact() {
        let t = Target::from_compact_bits(DIFFICULTY_1_BITS);
        assert!((t.difficulty() - 1.0).abs() < 1e-9);
        assert_eq!(t.to_compact_bits(), DIFFICULTY_1_BITS);
    }

    #[test]
    fn higher_difficulty_means_smaller_target() {
        let low = Target::from_difficulty(1.0);
        let high = Target::from_difficulty(1000.0);
        assert!(high.0 < low.0);
    }

    #[test]
    fn from_difficulty_round_trips_within_tolerance() {
        for d in [0.001, 1.0, 42.5, 16384.0, 1_000_000_000.0] {
            let t = Target::from_difficulty(d);
            let back = t.difficulty();
            assert!(
                (back - d).abs() / d < 1e-6,
                "difficulty {d} round-tripped to {back}"
            );
        }
    }

    #[test]
    fn compact_round_trip_is_stable() {
        for bits in [0x1d00_ffffu32, 0x1b0404cb, 0x207fffff, 0x1710_9a7a] {
            let t = Target::from_compact_bits(bits);
            assert_eq!(Target::from_compact_bits(t.to_compact_bits()), t);
        }
    }
}

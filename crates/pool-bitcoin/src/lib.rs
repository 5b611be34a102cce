//! Target/difficulty conversions and merkle branch construction shared by
//! the RPC client, the job manager, and the share validator. Kept as its
//! own crate so none of those three needs to depend on the others just to
//! call `Target::from_difficulty`.

mod merkle;
mod target;

pub use merkle::{compute_merkle_branch, merkle_root_from_branch};
pub use target::Target;

/// Target that defines difficulty 1, i.e. the `bits` field `0x1d00ffff`.
/// Every difficulty value in the pool is expressed relative to this.
pub const DIFFICULTY_1_BITS: u32 = 0x1d00_ffff;

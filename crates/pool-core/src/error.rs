use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("coinbase scriptSig exceeds configured maximum")]
    CoinbaseTooLarge,

    #[error("invalid payout split: {0}")]
    InvalidPayoutSplit(&'static str),

    #[error("template is stale: {0}")]
    StaleTemplate(String),

    #[error("transaction txid mismatch for tx at index {index}")]
    TxidMismatch { index: usize },

    #[error("witness commitment is malformed")]
    BadWitnessCommitment,

    #[error("bits/target mismatch between template fields")]
    BitsTargetMismatch,
}

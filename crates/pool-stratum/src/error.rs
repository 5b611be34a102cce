use crate::message::ErrorObject;
use thiserror::Error;

/// The Stratum V1 error-code taxonomy a share/request response can carry.
/// Codes and wording are fixed by the protocol the miners speak — changing
/// them would break every existing mining client, so this is not an
/// internal style choice, it is the wire contract.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum StratumError {
    #[error("other/internal error")]
    Other,
    #[error("job not found")]
    JobNotFound,
    #[error("duplicate")]
    Duplicate,
    #[error("low difficulty")]
    LowDifficulty,
    #[error("unauthorized")]
    Unauthorized,
    #[error("not subscribed")]
    NotSubscribed,
    #[error("banned")]
    Banned,
}

impl StratumError {
    pub fn code(self) -> i32 {
        match self {
            StratumError::Other => 20,
            StratumError::JobNotFound => 21,
            StratumError::Duplicate => 22,
            StratumError::LowDifficulty => 23,
            StratumError::Unauthorized => 24,
            StratumError::NotSubscribed => 25,
            StratumError::Banned => 26,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            StratumError::Other => "other/internal error",
            StratumError::JobNotFound => "job not found",
            StratumError::Duplicate => "duplicate",
            StratumError::LowDifficulty => "low difficulty",
            StratumError::Unauthorized => "unauthorized",
            StratumError::NotSubscribed => "not subscribed",
            StratumError::Banned => "banned",
        }
    }

    pub fn to_error_object(self) -> ErrorObject {
        ErrorObject::new(self.code(), self.message())
    }

    /// Builds the banned error with the pool's actual ban reason instead of
    /// the generic message, e.g. "suggested difficulty outside pool limits".
    pub fn banned_with_reason(reason: impl Into<String>) -> ErrorObject {
        ErrorObject::new(StratumError::Banned.code(), reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_fixed_wire_table() {
        assert_eq!(StratumError::Other.code(), 20);
        assert_eq!(StratumError::JobNotFound.code(), 21);
        assert_eq!(StratumError::Duplicate.code(), 22);
        assert_eq!(StratumError::LowDifficulty.code(), 23);
        assert_eq!(StratumError::Unauthorized.code(), 24);
        assert_eq!(StratumError::NotSubscribed.code(), 25);
        assert_eq!(StratumError::Banned.code(), 26);
    }
}

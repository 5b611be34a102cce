use crate::{Config, ConfigError};
use std::str::FromStr;

/// Cross-field validation run once, at startup, after CLI overrides have
/// been applied. A bad config here is a fatal error (exit code 2 per the
/// spec's CLI surface); it must never be discovered partway through serving
/// miners.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.payout.address.trim().is_empty() {
        return Err(ConfigError::Invalid("payout.address must not be empty".into()));
    }
    let network = cfg.network;
    bitcoin::Address::from_str(&cfg.payout.address)
        .map_err(|e| ConfigError::Invalid(format!("invalid payout address: {e}")))?
        .require_network(network)
        .map_err(|e| ConfigError::Invalid(format!("payout address wrong network: {e}")))?;

    if let Some(donation_addr) = &cfg.payout.operator_donation_address {
        bitcoin::Address::from_str(donation_addr)
            .map_err(|e| ConfigError::Invalid(format!("invalid donation address: {e}")))?
            .require_network(network)
            .map_err(|e| ConfigError::Invalid(format!("donation address wrong network: {e}")))?;
    }

    if !(0.0..100.0).contains(&cfg.payout.pool_fee_percent) {
        return Err(ConfigError::Invalid(
            "payout.pool_fee_percent must be in [0, 100)".into(),
        ));
    }
    if !(0.0..100.0).contains(&cfg.payout.operator_donation_percent) {
        return Err(ConfigError::Invalid(
            "payout.operator_donation_percent must be in [0, 100)".into(),
        ));
    }

    if cfg.min_difficulty <= 0.0 || cfg.max_difficulty < cfg.min_difficulty {
        return Err(ConfigError::Invalid(
            "min_difficulty must be positive and <= max_difficulty".into(),
        ));
    }
    if cfg.vardiff.min_diff <= 0.0 || cfg.vardiff.max_diff < cfg.vardiff.min_diff {
        return Err(ConfigError::Invalid(
            "vardiff.min_diff must be positive and <= vardiff.max_diff".into(),
        ));
    }
    if cfg.vardiff.target_shares_per_min <= 0.0 {
        return Err(ConfigError::Invalid(
            "vardiff.target_shares_per_min must be positive".into(),
        ));
    }

    if cfg.extranonce2_size == 0 || cfg.extranonce2_size > 16 {
        return Err(ConfigError::Invalid(
            "extranonce2_size must be in [1, 16]".into(),
        ));
    }
    if cfg.template_extranonce2_size < cfg.extranonce2_size {
        return Err(ConfigError::Invalid(
            "template_extranonce2_size must be >= extranonce2_size".into(),
        ));
    }

    if cfg.rpc.url.trim().is_empty() {
        return Err(ConfigError::Invalid("rpc.url must not be empty".into()));
    }
    if cfg.rpc.cookie_path.is_none() && (cfg.rpc.user.is_none() || cfg.rpc.password.is_none()) {
        return Err(ConfigError::Invalid(
            "either rpc.cookie_path or both rpc.user and rpc.password must be set".into(),
        ));
    }

    Ok(())
}

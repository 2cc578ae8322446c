// 7.0 config.rs: all settings in one place. limits, surveillance thresholds, persistence.
// 7.1 every value here has a default matching production behaviour; presets only tweak.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::margin::{default_limit_tiers, PositionLimitTier};
use crate::types::Usd;

// Account and order sizing limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitParams {
    // Position limit assigned to new users
    pub default_position_limit: Usd,
    // Ceiling for operator assigned limits
    pub max_position_limit: Usd,
    // Contracts per order
    pub max_order_quantity: u32,
    pub tiers: Vec<PositionLimitTier>,
}

impl Default for LimitParams {
    fn default() -> Self {
        Self {
            default_position_limit: Usd::new(dec!(25_000)),
            max_position_limit: Usd::new(dec!(250_000)),
            max_order_quantity: 1_000,
            tiers: default_limit_tiers(),
        }
    }
}

/** 7.2: surveillance thresholds. windows are in milliseconds */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveillanceParams {
    // Validation calls allowed per user per window
    pub rate_limit_per_user: usize,
    pub rate_limit_window_ms: i64,
    // Utilization above this ratio of the limit produces a warning
    pub limit_warning_ratio: Decimal,
    // Opposite side orders closer than this are a wash trade
    pub wash_trade_window_ms: i64,
    // Cancelled orders above this quantity count toward spoofing
    pub spoof_min_quantity: u32,
    // More than this many large cancels is spoofing
    pub spoof_cancel_threshold: usize,
    // More than this many distinct resting prices is layering
    pub layering_price_threshold: usize,
}

impl Default for SurveillanceParams {
    fn default() -> Self {
        Self {
            rate_limit_per_user: 60,
            rate_limit_window_ms: 60_000,
            limit_warning_ratio: dec!(0.8),
            wash_trade_window_ms: 60_000,
            spoof_min_quantity: 100,
            spoof_cancel_threshold: 3,
            layering_price_threshold: 5,
        }
    }
}

// Snapshot and audit log storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceParams {
    pub enabled: bool,
    pub data_dir: PathBuf,
    // Audit partitions older than this move to the archive (5 years)
    pub audit_retention_days: i64,
    // Timestamped snapshots kept besides latest.json
    pub snapshot_keep: usize,
}

impl Default for PersistenceParams {
    fn default() -> Self {
        Self {
            enabled: true,
            data_dir: PathBuf::from("./data"),
            audit_retention_days: 1_825,
            snapshot_keep: 30,
        }
    }
}

// The complete compliance core configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComplianceConfig {
    pub limits: LimitParams,
    pub surveillance: SurveillanceParams,
    pub persistence: PersistenceParams,
}

impl ComplianceConfig {
    // Local development: nothing written to disk, relaxed rate limit
    pub fn development() -> Self {
        let mut config = Self::default();
        config.persistence.enabled = false;
        config.surveillance.rate_limit_per_user = 600;
        config
    }

    pub fn staging() -> Self {
        let mut config = Self::default();
        config.persistence.data_dir = PathBuf::from("./data-staging");
        config.persistence.snapshot_keep = 7;
        config
    }

    // Production: tighter warnings, full retention
    pub fn production() -> Self {
        let mut config = Self::default();
        config.surveillance.limit_warning_ratio = dec!(0.75);
        config.persistence.data_dir = PathBuf::from("/var/lib/dcm");
        config
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        if !limits.default_position_limit.is_positive() {
            return Err(ConfigError::InvalidLimits {
                reason: "Default position limit must be positive".to_string(),
            });
        }
        if limits.default_position_limit > limits.max_position_limit {
            return Err(ConfigError::InvalidLimits {
                reason: "Default position limit exceeds the maximum".to_string(),
            });
        }
        if limits.max_order_quantity == 0 {
            return Err(ConfigError::InvalidLimits {
                reason: "Max order quantity must be at least 1".to_string(),
            });
        }

        let s = &self.surveillance;
        if s.rate_limit_per_user == 0 || s.rate_limit_window_ms <= 0 {
            return Err(ConfigError::InvalidSurveillance {
                reason: "Rate limit needs a positive count and window".to_string(),
            });
        }
        if s.limit_warning_ratio <= Decimal::ZERO || s.limit_warning_ratio >= Decimal::ONE {
            return Err(ConfigError::InvalidSurveillance {
                reason: "Warning ratio must be between 0 and 1".to_string(),
            });
        }
        if s.wash_trade_window_ms <= 0 {
            return Err(ConfigError::InvalidSurveillance {
                reason: "Wash trade window must be positive".to_string(),
            });
        }

        if self.persistence.enabled && self.persistence.audit_retention_days <= 0 {
            return Err(ConfigError::InvalidPersistence {
                reason: "Audit retention must be positive".to_string(),
            });
        }

        Ok(())
    }

    pub fn tier(&self, name: &str) -> Option<&PositionLimitTier> {
        crate::margin::find_tier(&self.limits.tiers, name)
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid limits: {reason}")]
    InvalidLimits { reason: String },
    #[error("Invalid surveillance settings: {reason}")]
    InvalidSurveillance { reason: String },
    #[error("Invalid persistence settings: {reason}")]
    InvalidPersistence { reason: String },
    #[error("Config parse error: {0}")]
    Parse(String),
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn config(&self) -> ComplianceConfig {
        match self {
            Environment::Development => ComplianceConfig::development(),
            Environment::Staging => ComplianceConfig::staging(),
            Environment::Production => ComplianceConfig::production(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = ComplianceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.limits.default_position_limit.value(), dec!(25000));
        assert_eq!(config.surveillance.rate_limit_per_user, 60);
        assert_eq!(config.persistence.audit_retention_days, 1825);
    }

    #[test]
    fn test_environment_presets() {
        assert!(Environment::Development.config().validate().is_ok());
        assert!(Environment::Staging.config().validate().is_ok());
        assert!(Environment::Production.config().validate().is_ok());
        assert!(!Environment::Development.config().persistence.enabled);
    }

    #[test]
    fn test_invalid_limits() {
        let mut config = ComplianceConfig::default();
        config.limits.default_position_limit = Usd::new(dec!(300_000));
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLimits { .. })));

        let mut config = ComplianceConfig::default();
        config.limits.max_order_quantity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLimits { .. })));
    }

    #[test]
    fn test_invalid_warning_ratio() {
        let mut config = ComplianceConfig::default();
        config.surveillance.limit_warning_ratio = dec!(1.2);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSurveillance { .. })));
    }

    #[test]
    fn test_from_json() {
        let json = serde_json::to_string(&ComplianceConfig::production()).unwrap();
        let back = ComplianceConfig::from_json(&json).unwrap();
        assert_eq!(back.surveillance.limit_warning_ratio, dec!(0.75));
        assert!(back.tier("professional").is_some());

        assert!(matches!(ComplianceConfig::from_json("{"), Err(ConfigError::Parse(_))));
    }
}

// 14.0: pre-trade check result. advisory only: every finding is collected, nothing
// is mutated, and the order gate re-checks everything on submission.

use crate::types::Usd;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreTradeError {
    #[error("Quantity must be between 1 and {max}, got {quantity}")]
    InvalidQuantity { quantity: u32, max: u32 },

    #[error("Price must be 1-99 cents, got {cents}")]
    InvalidPrice { cents: u32 },

    #[error("Rate limit exceeded: {count} requests in window, limit {limit}")]
    RateLimitExceeded { count: usize, limit: usize },

    #[error("Trading halted: {reason}")]
    TradingHalted { reason: String },

    #[error("Market is {status} at the venue")]
    MarketClosed { status: String },

    #[error("User not found")]
    UserNotFound,

    #[error("Wallet not found")]
    WalletNotFound,

    #[error("Account is {status}")]
    AccountSuspended { status: String },

    #[error("KYC verification required")]
    KycRequired,

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Usd, available: Usd },

    #[error("Position limit exceeded: exposure {exposure} + {requested} > limit {limit}")]
    PositionLimit { exposure: Usd, requested: Usd, limit: Usd },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreTradeWarning {
    /// Would-be exposure above the warning ratio of the limit.
    ApproachingLimit { utilization_pct: Decimal },
}

impl std::fmt::Display for PreTradeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreTradeWarning::ApproachingLimit { utilization_pct } => {
                write!(f, "Approaching position limit ({utilization_pct}% utilized)")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreTradeCheck {
    pub passed: bool,
    pub errors: Vec<PreTradeError>,
    pub warnings: Vec<PreTradeWarning>,
    pub required_margin: Usd,
    pub available_margin: Usd,
}

impl PreTradeCheck {
    pub(super) fn new() -> Self {
        Self {
            passed: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            required_margin: Usd::zero(),
            available_margin: Usd::zero(),
        }
    }

    pub(super) fn fail(&mut self, error: PreTradeError) {
        self.errors.push(error);
        self.passed = false;
    }

    pub(super) fn warn(&mut self, warning: PreTradeWarning) {
        self.warnings.push(warning);
    }

    pub fn has_error(&self, pred: impl Fn(&PreTradeError) -> bool) -> bool {
        self.errors.iter().any(pred)
    }
}

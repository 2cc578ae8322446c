//! Collateral calculation and position limit tiers.
//!
//! Binary contracts are 100% collateralized: the amount locked for an order is
//! its maximum possible loss. A yes contract bought at `p` cents loses `p`, a no
//! contract at the same quoted price loses `100 - p`. There is no leverage.
//!
//! Position limits are account-wide and compared against exposure, which is the
//! wallet's locked balance.

use crate::types::{PriceCents, Side, Usd};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

// 3.1: collateral in cents. yes = q * p, no = q * (100 - p)
pub fn collateral_cents(side: Side, quantity: u32, price: PriceCents) -> i64 {
    let per_contract = match side {
        Side::Yes => price.value(),
        Side::No => price.complement().value(),
    };
    quantity as i64 * per_contract as i64
}

pub fn required_collateral(side: Side, quantity: u32, price: PriceCents) -> Usd {
    Usd::from_cents(collateral_cents(side, quantity, price))
}

/// Outcome of comparing would-be exposure against a user's limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitCheck {
    Within,
    /// Above the warning ratio but not breached.
    Approaching { utilization: Decimal },
    Exceeded,
}

// 3.2: exposure + order against the limit. breach is strictly greater than the limit.
pub fn check_limit(exposure: Usd, additional: Usd, limit: Usd, warning_ratio: Decimal) -> LimitCheck {
    let new_exposure = exposure.add(additional);
    if new_exposure > limit {
        return LimitCheck::Exceeded;
    }
    let warning_level = limit.mul(warning_ratio);
    if new_exposure > warning_level {
        return LimitCheck::Approaching {
            utilization: utilization_pct(new_exposure, limit),
        };
    }
    LimitCheck::Within
}

pub fn utilization_pct(exposure: Usd, limit: Usd) -> Decimal {
    if limit.is_zero() {
        return Decimal::ZERO;
    }
    (exposure.value() / limit.value() * dec!(100)).round_dp(2)
}

/// Speculative limit tier a user can be assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionLimitTier {
    pub tier: String,
    pub max_position: Usd,
    pub max_order_size: u32,
    pub daily_volume: Usd,
}

pub fn default_limit_tiers() -> Vec<PositionLimitTier> {
    vec![
        PositionLimitTier {
            tier: "basic".to_string(),
            max_position: Usd::new(dec!(25_000)),
            max_order_size: 500,
            daily_volume: Usd::new(dec!(10_000)),
        },
        PositionLimitTier {
            tier: "standard".to_string(),
            max_position: Usd::new(dec!(100_000)),
            max_order_size: 2_000,
            daily_volume: Usd::new(dec!(50_000)),
        },
        PositionLimitTier {
            tier: "professional".to_string(),
            max_position: Usd::new(dec!(500_000)),
            max_order_size: 10_000,
            daily_volume: Usd::new(dec!(250_000)),
        },
    ]
}

pub fn find_tier<'a>(tiers: &'a [PositionLimitTier], name: &str) -> Option<&'a PositionLimitTier> {
    tiers.iter().find(|t| t.tier.eq_ignore_ascii_case(name))
}

//! Post-trade manipulation detectors.
//!
//! Each detector looks at the orders it is handed for one user and reports at
//! most one finding per run. Findings become alerts in the registry; none of them
//! stop trading on their own.

use crate::config::SurveillanceParams;
use crate::order::{Order, OrderStatus};
use crate::registry::{AlertSeverity, AlertType, NewAlert};
use crate::types::{MarketTicker, UserId};
use std::collections::BTreeSet;
use std::fmt;

pub trait PatternDetector: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// `orders` are the caller's view of the user's activity and may span
    /// markets. `market` labels the alert.
    fn detect(&self, user_id: UserId, market: &MarketTicker, orders: &[Order]) -> Option<NewAlert>;
}

fn finding(
    user_id: UserId,
    market: &MarketTicker,
    kind: AlertType,
    severity: AlertSeverity,
    description: String,
) -> NewAlert {
    NewAlert {
        user_id: Some(user_id),
        market: Some(market.clone()),
        kind,
        severity,
        description,
    }
}

/// Opposite sides of the same market entered close together.
#[derive(Debug, Clone)]
pub struct WashTradeDetector {
    pub window_ms: i64,
}

impl PatternDetector for WashTradeDetector {
    fn name(&self) -> &'static str {
        "wash_trade"
    }

    fn detect(&self, user_id: UserId, market: &MarketTicker, orders: &[Order]) -> Option<NewAlert> {
        for (i, a) in orders.iter().enumerate() {
            for b in &orders[i + 1..] {
                if a.market == b.market
                    && a.side != b.side
                    && a.created_at.abs_diff_millis(&b.created_at) < self.window_ms
                {
                    return Some(finding(
                        user_id,
                        market,
                        AlertType::WashTrade,
                        AlertSeverity::High,
                        format!(
                            "Potential wash trade in {}: orders {} ({}) and {} ({}) within {}s",
                            a.market,
                            a.id,
                            a.side,
                            b.id,
                            b.side,
                            self.window_ms / 1000
                        ),
                    ));
                }
            }
        }
        None
    }
}

/// Repeated cancellation of large orders.
#[derive(Debug, Clone)]
pub struct SpoofingDetector {
    pub min_quantity: u32,
    pub cancel_threshold: usize,
}

impl PatternDetector for SpoofingDetector {
    fn name(&self) -> &'static str {
        "spoofing"
    }

    fn detect(&self, user_id: UserId, market: &MarketTicker, orders: &[Order]) -> Option<NewAlert> {
        let large_cancels = orders
            .iter()
            .filter(|o| o.status == OrderStatus::Cancelled && o.quantity > self.min_quantity)
            .count();
        (large_cancels > self.cancel_threshold).then(|| {
            finding(
                user_id,
                market,
                AlertType::Spoofing,
                AlertSeverity::High,
                format!(
                    "Potential spoofing: {large_cancels} cancelled orders above {} contracts",
                    self.min_quantity
                ),
            )
        })
    }
}

/// Many resting orders stacked at different prices.
#[derive(Debug, Clone)]
pub struct LayeringDetector {
    pub price_threshold: usize,
}

impl PatternDetector for LayeringDetector {
    fn name(&self) -> &'static str {
        "layering"
    }

    fn detect(&self, user_id: UserId, market: &MarketTicker, orders: &[Order]) -> Option<NewAlert> {
        let levels: BTreeSet<u32> = orders
            .iter()
            .filter(|o| o.is_open())
            .map(|o| o.price.value())
            .collect();
        (levels.len() > self.price_threshold).then(|| {
            finding(
                user_id,
                market,
                AlertType::Layering,
                AlertSeverity::Medium,
                format!("Potential layering: open orders at {} price levels", levels.len()),
            )
        })
    }
}

pub fn default_detectors(params: &SurveillanceParams) -> Vec<Box<dyn PatternDetector>> {
    vec![
        Box::new(WashTradeDetector {
            window_ms: params.wash_trade_window_ms,
        }),
        Box::new(SpoofingDetector {
            min_quantity: params.spoof_min_quantity,
            cancel_threshold: params.spoof_cancel_threshold,
        }),
        Box::new(LayeringDetector {
            price_threshold: params.layering_price_threshold,
        }),
    ]
}

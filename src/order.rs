//! Order records and their lifecycle.
//!
//! Orders are not matched here. The venue executes them and reports back with a
//! [`FillConfirmation`]; this module only tracks the state machine
//! `pending -> filled | cancelled | rejected` and the collateral fixed at
//! creation.

use crate::types::{MarketTicker, OrderId, OrderType, PriceCents, Side, Timestamp, UserId, Usd};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An order accepted by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub market: MarketTicker,
    pub side: Side,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub quantity: u32,
    pub price: PriceCents,
    pub filled_quantity: u32,
    pub filled_price: Option<PriceCents>,
    /// Locked at creation. Exactly this amount is later unlocked or settled.
    pub collateral: Usd,
    pub status_reason: Option<String>,
    pub submit_ip: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub filled_at: Option<Timestamp>,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: OrderId,
        user_id: UserId,
        market: MarketTicker,
        side: Side,
        order_type: OrderType,
        quantity: u32,
        price: PriceCents,
        collateral: Usd,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id,
            user_id,
            market,
            side,
            order_type,
            status: OrderStatus::Pending,
            quantity,
            price,
            filled_quantity: 0,
            filled_price: None,
            collateral,
            status_reason: None,
            submit_ip: None,
            created_at: timestamp,
            updated_at: timestamp,
            filled_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Pending
    }

    fn transition(&mut self, to: OrderStatus, timestamp: Timestamp) -> Result<(), OrderError> {
        if self.status != OrderStatus::Pending {
            return Err(OrderError::InvalidTransition {
                order_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = timestamp;
        Ok(())
    }

    pub fn fill(&mut self, price: PriceCents, timestamp: Timestamp) -> Result<(), OrderError> {
        self.transition(OrderStatus::Filled, timestamp)?;
        self.filled_quantity = self.quantity;
        self.filled_price = Some(price);
        self.filled_at = Some(timestamp);
        Ok(())
    }

    pub fn cancel(&mut self, timestamp: Timestamp) -> Result<(), OrderError> {
        self.transition(OrderStatus::Cancelled, timestamp)
    }

    pub fn reject(&mut self, reason: impl Into<String>, timestamp: Timestamp) -> Result<(), OrderError> {
        self.transition(OrderStatus::Rejected, timestamp)?;
        self.status_reason = Some(reason.into());
        Ok(())
    }
}

/// Execution report from the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillConfirmation {
    pub order_id: OrderId,
    pub price_cents: PriceCents,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Invalid transition for {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },
}

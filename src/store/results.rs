// 8.0.2: request, result and error types for ledger operations.

use crate::audit::AuditEntry;
use crate::order::{Order, OrderError, OrderStatus};
use crate::position::Position;
use crate::registry::{RegistryError, RegistrySnapshot};
use crate::transaction::Transaction;
use crate::types::{AlertId, MarketTicker, OrderId, OrderType, PositionId, Side, Timestamp, UserId, Usd};
use crate::user::{User, UserStatus};
use crate::wallet::{Wallet, WalletError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order intent as submitted by a client. The price is raw cents and is
/// validated by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub user_id: UserId,
    pub market: MarketTicker,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: u32,
    pub price_cents: u32,
}

impl OrderRequest {
    pub fn limit(user_id: UserId, market: impl Into<MarketTicker>, side: Side, quantity: u32, price_cents: u32) -> Self {
        Self {
            user_id,
            market: market.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price_cents,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementResult {
    pub user_id: UserId,
    pub position_id: PositionId,
    pub payout: Usd,
    pub realized_pnl: Usd,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSettlement {
    pub market: Option<MarketTicker>,
    pub winning_side: Option<Side>,
    pub cancelled_orders: Vec<OrderId>,
    pub settlements: Vec<SettlementResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub user_id: UserId,
    pub available: Usd,
    pub locked: Usd,
    pub total: Usd,
    pub open_positions: usize,
    pub total_value: Usd,
    pub unrealized_pnl: Usd,
    pub position_limit: Usd,
    pub exposure: Usd,
    /// Exposure as a percentage of the limit.
    pub utilization_pct: Decimal,
}

/// Point in time copy of every ledger table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub taken_at: Option<Timestamp>,
    pub users: Vec<User>,
    pub wallets: Vec<Wallet>,
    pub transactions: Vec<Transaction>,
    pub orders: Vec<Order>,
    pub positions: Vec<Position>,
    pub registry: RegistrySnapshot,
    pub audit: Vec<AuditEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("User {0} not found")]
    UserNotFound(UserId),

    #[error("User with email {0} already exists")]
    UserExists(String),

    #[error("Wallet for {0} not found")]
    WalletNotFound(UserId),

    #[error("Order {0} not found")]
    OrderNotFound(OrderId),

    #[error("Alert {0} not found")]
    AlertNotFound(AlertId),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Usd, available: Usd },

    #[error("Insufficient locked funds: requested {requested}, locked {locked}")]
    InsufficientLocked { requested: Usd, locked: Usd },

    #[error("Position limit exceeded: exposure {exposure} + {requested} > limit {limit}")]
    PositionLimitExceeded { exposure: Usd, requested: Usd, limit: Usd },

    #[error("KYC verification required for {0}")]
    KycRequired(UserId),

    #[error("Account {user_id} is {status}")]
    UserSuspended { user_id: UserId, status: UserStatus },

    #[error("Trading halted for {market}: {reason}")]
    TradingHalted { market: MarketTicker, reason: String },

    #[error("Market {market} is {status} at the venue")]
    MarketClosed { market: MarketTicker, status: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Invalid transition for {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },
}

impl StoreError {
    /// Stable machine readable code for the API layer.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::UserNotFound(_) => "USER_NOT_FOUND",
            StoreError::UserExists(_) => "USER_EXISTS",
            StoreError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            StoreError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            StoreError::AlertNotFound(_) => "ALERT_NOT_FOUND",
            StoreError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            StoreError::InsufficientLocked { .. } => "INSUFFICIENT_LOCKED",
            StoreError::PositionLimitExceeded { .. } => "POSITION_LIMIT",
            StoreError::KycRequired(_) => "KYC_REQUIRED",
            StoreError::UserSuspended { .. } => "ACCOUNT_SUSPENDED",
            StoreError::TradingHalted { .. } => "TRADING_HALTED",
            StoreError::MarketClosed { .. } => "MARKET_CLOSED",
            StoreError::InvalidAmount(_) => "INVALID_AMOUNT",
            StoreError::InvalidOrder(_) => "INVALID_ORDER",
            StoreError::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }
}

impl From<WalletError> for StoreError {
    fn from(value: WalletError) -> Self {
        match value {
            WalletError::InsufficientFunds { requested, available } => {
                StoreError::InsufficientFunds { requested, available }
            }
            WalletError::InsufficientLocked { requested, locked } => {
                StoreError::InsufficientLocked { requested, locked }
            }
            WalletError::InvalidAmount(amount) => StoreError::InvalidAmount(amount.to_string()),
        }
    }
}

impl From<OrderError> for StoreError {
    fn from(value: OrderError) -> Self {
        match value {
            OrderError::InvalidTransition { order_id, from, to } => {
                StoreError::InvalidTransition { order_id, from, to }
            }
        }
    }
}

impl From<RegistryError> for StoreError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::AlertNotFound(id) => StoreError::AlertNotFound(id),
        }
    }
}

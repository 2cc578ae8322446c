//! Wallet balances and collateral locking.
//!
//! A wallet splits funds into `available` and `locked`. Locking moves money from
//! available to locked for an open order; unlocking reverses it; settlement
//! releases locked collateral and credits the payout. Every operation either
//! applies fully or leaves the wallet untouched.

use crate::types::{Timestamp, UserId, Usd};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    pub available: Usd,
    pub locked: Usd,
    pub total_deposited: Usd,
    pub total_withdrawn: Usd,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Wallet {
    pub fn new(user_id: UserId, timestamp: Timestamp) -> Self {
        Self {
            user_id,
            available: Usd::zero(),
            locked: Usd::zero(),
            total_deposited: Usd::zero(),
            total_withdrawn: Usd::zero(),
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    pub fn total(&self) -> Usd {
        self.available.add(self.locked)
    }

    pub fn deposit(&mut self, amount: Usd, timestamp: Timestamp) -> Result<(), WalletError> {
        if !amount.is_positive() {
            return Err(WalletError::InvalidAmount(amount));
        }
        self.available = self.available.add(amount);
        self.total_deposited = self.total_deposited.add(amount);
        self.updated_at = timestamp;
        Ok(())
    }

    pub fn lock(&mut self, amount: Usd, timestamp: Timestamp) -> Result<(), WalletError> {
        if amount.is_negative() {
            return Err(WalletError::InvalidAmount(amount));
        }
        if amount > self.available {
            return Err(WalletError::InsufficientFunds {
                requested: amount,
                available: self.available,
            });
        }
        self.available = self.available.sub(amount);
        self.locked = self.locked.add(amount);
        self.updated_at = timestamp;
        Ok(())
    }

    pub fn unlock(&mut self, amount: Usd, timestamp: Timestamp) -> Result<(), WalletError> {
        if amount.is_negative() {
            return Err(WalletError::InvalidAmount(amount));
        }
        if amount > self.locked {
            return Err(WalletError::InsufficientLocked {
                requested: amount,
                locked: self.locked,
            });
        }
        self.locked = self.locked.sub(amount);
        self.available = self.available.add(amount);
        self.updated_at = timestamp;
        Ok(())
    }

    /// Releases `locked_amount` and credits `settlement_amount`. Returns realized P&L.
    pub fn settle(
        &mut self,
        locked_amount: Usd,
        settlement_amount: Usd,
        timestamp: Timestamp,
    ) -> Result<Usd, WalletError> {
        if locked_amount.is_negative() {
            return Err(WalletError::InvalidAmount(locked_amount));
        }
        if settlement_amount.is_negative() {
            return Err(WalletError::InvalidAmount(settlement_amount));
        }
        if locked_amount > self.locked {
            return Err(WalletError::InsufficientLocked {
                requested: locked_amount,
                locked: self.locked,
            });
        }
        self.locked = self.locked.sub(locked_amount);
        self.available = self.available.add(settlement_amount);
        self.updated_at = timestamp;
        Ok(settlement_amount.sub(locked_amount))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Usd, available: Usd },

    #[error("Insufficient locked funds: requested {requested}, locked {locked}")]
    InsufficientLocked { requested: Usd, locked: Usd },

    #[error("Invalid amount: {0}")]
    InvalidAmount(Usd),
}

// 4.0: ledger transactions. append only, one per balance changing event
// (deposit, settlement, fee). locks and unlocks don't produce one.

use crate::types::{Timestamp, TransactionId, UserId, Usd};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Settlement,
    Fee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub kind: TransactionType,
    pub status: TransactionStatus,
    pub amount: Usd,
    pub balance_before: Usd,
    pub balance_after: Usd,
    pub reference: Option<String>,
    pub description: String,
    pub created_at: Timestamp,
}

impl Transaction {
    pub fn deposit(
        id: TransactionId,
        user_id: UserId,
        amount: Usd,
        balance_before: Usd,
        reference: Option<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id,
            user_id,
            kind: TransactionType::Deposit,
            status: TransactionStatus::Completed,
            amount,
            balance_before,
            balance_after: balance_before.add(amount),
            reference,
            description: format!("ACH Deposit: {amount}"),
            created_at: timestamp,
        }
    }

    // amount is the P&L, balances are available before/after the credit
    pub fn settlement(
        id: TransactionId,
        user_id: UserId,
        pnl: Usd,
        balance_before: Usd,
        balance_after: Usd,
        reference: Option<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id,
            user_id,
            kind: TransactionType::Settlement,
            status: TransactionStatus::Completed,
            amount: pnl,
            balance_before,
            balance_after,
            reference,
            description: format!("Settlement: P&L {pnl}"),
            created_at: timestamp,
        }
    }
}

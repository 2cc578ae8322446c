//! Wallet operations: deposits, collateral locks and settlement.
//!
//! Each wallet has its own mutex. Balance checks and the mutation they guard
//! always happen under the same guard, so two requests against one wallet are
//! serialized while requests against different wallets run in parallel.

use super::core::LedgerStore;
use super::results::StoreError;
use crate::audit::{AuditAction, AuditEvent};
use crate::transaction::Transaction;
use crate::types::{RequestContext, Timestamp, UserId, Usd};
use crate::wallet::Wallet;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

impl LedgerStore {
    /// Idempotent. Returns the existing wallet when there is one; only a new
    /// wallet is audited.
    pub fn create_wallet(&self, user_id: UserId, ctx: &RequestContext) -> Wallet {
        let (wallet, created) = self.open_wallet(user_id);
        if created {
            self.record(
                ctx,
                AuditEvent::new(AuditAction::Create, "wallet", user_id).after(&wallet),
            );
        }
        wallet
    }

    // insert-if-absent without an audit entry. the bool is true when the wallet is new
    pub(super) fn open_wallet(&self, user_id: UserId) -> (Wallet, bool) {
        let mut wallets = self.wallets.write();
        if let Some(existing) = wallets.get(&user_id) {
            return (existing.lock().clone(), false);
        }
        let wallet = Wallet::new(user_id, self.clock.now());
        wallets.insert(user_id, Arc::new(Mutex::new(wallet.clone())));
        drop(wallets);

        debug!(user_id = %user_id, "wallet created");
        (wallet, true)
    }

    pub fn get_wallet(&self, user_id: UserId) -> Result<Wallet, StoreError> {
        let handle = self.wallet_handle(user_id)?;
        let wallet = handle.lock().clone();
        Ok(wallet)
    }

    /// Exposure is the locked balance: collateral held for open orders and positions.
    pub fn get_user_exposure(&self, user_id: UserId) -> Result<Usd, StoreError> {
        let handle = self.wallet_handle(user_id)?;
        let locked = handle.lock().locked;
        Ok(locked)
    }

    pub fn deposit(
        &self,
        user_id: UserId,
        amount: Usd,
        reference: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<Transaction, StoreError> {
        let handle = self.wallet_handle(user_id)?;
        let now = self.clock.now();
        let (tx, before, after) = {
            let mut wallet = handle.lock();
            let before = wallet.clone();
            wallet.deposit(amount, now)?;
            let tx = Transaction::deposit(
                self.next_transaction_id(),
                user_id,
                amount,
                before.available,
                reference.map(str::to_string),
                now,
            );
            self.transactions.write().push(tx.clone());
            (tx, before, wallet.clone())
        };

        info!(user_id = %user_id, amount = %amount, "deposit credited");
        self.record(
            ctx,
            AuditEvent::new(AuditAction::Deposit, "wallet", user_id)
                .before(&before)
                .after(&after)
                .description(tx.description.clone()),
        );
        Ok(tx)
    }

    pub fn lock_funds(&self, user_id: UserId, amount: Usd, ctx: &RequestContext) -> Result<Wallet, StoreError> {
        let handle = self.wallet_handle(user_id)?;
        let now = self.clock.now();
        let (before, after) = {
            let mut wallet = handle.lock();
            let before = wallet.clone();
            wallet.lock(amount, now)?;
            (before, wallet.clone())
        };

        debug!(user_id = %user_id, amount = %amount, "funds locked");
        self.record(
            ctx,
            AuditEvent::new(AuditAction::Lock, "wallet", user_id)
                .before(&before)
                .after(&after)
                .description(format!("Locked {amount}")),
        );
        Ok(after)
    }

    pub fn unlock_funds(&self, user_id: UserId, amount: Usd, ctx: &RequestContext) -> Result<Wallet, StoreError> {
        let handle = self.wallet_handle(user_id)?;
        let now = self.clock.now();
        let (before, after) = {
            let mut wallet = handle.lock();
            let before = wallet.clone();
            wallet.unlock(amount, now)?;
            (before, wallet.clone())
        };

        debug!(user_id = %user_id, amount = %amount, "funds unlocked");
        self.record(
            ctx,
            AuditEvent::new(AuditAction::Unlock, "wallet", user_id)
                .before(&before)
                .after(&after)
                .description(format!("Unlocked {amount}")),
        );
        Ok(after)
    }

    /// Release `locked_amount` of collateral and credit `settlement_amount`.
    /// The transaction records the resulting P&L.
    pub fn settle_funds(
        &self,
        user_id: UserId,
        locked_amount: Usd,
        settlement_amount: Usd,
        ctx: &RequestContext,
    ) -> Result<Transaction, StoreError> {
        let handle = self.wallet_handle(user_id)?;
        let now = self.clock.now();
        let (tx, before, after) = {
            let mut wallet = handle.lock();
            let before = wallet.clone();
            let tx = self.settle_in_wallet(&mut wallet, locked_amount, settlement_amount, None, now)?;
            (tx, before, wallet.clone())
        };

        info!(user_id = %user_id, pnl = %tx.amount, "funds settled");
        self.record(
            ctx,
            AuditEvent::new(AuditAction::Settlement, "wallet", user_id)
                .before(&before)
                .after(&after)
                .description(tx.description.clone()),
        );
        Ok(tx)
    }

    // caller holds the wallet guard. pushes the settlement transaction only on success
    pub(super) fn settle_in_wallet(
        &self,
        wallet: &mut Wallet,
        locked_amount: Usd,
        settlement_amount: Usd,
        reference: Option<String>,
        now: Timestamp,
    ) -> Result<Transaction, StoreError> {
        let balance_before = wallet.available;
        let pnl = wallet.settle(locked_amount, settlement_amount, now)?;
        let tx = Transaction::settlement(
            self.next_transaction_id(),
            wallet.user_id,
            pnl,
            balance_before,
            wallet.available,
            reference,
            now,
        );
        self.transactions.write().push(tx.clone());
        Ok(tx)
    }

    /// Most recent first.
    pub fn get_transactions(&self, user_id: UserId, limit: usize) -> Vec<Transaction> {
        self.transactions
            .read()
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .take(limit)
            .cloned()
            .collect()
    }
}

// 8.0 store/core.rs: the ledger. holds users, wallets, transactions, orders, positions.
// every table has its own lock. when more than one is needed they are always taken in
// the order: orders -> positions -> wallet -> transactions. users and the wallet map are
// only held long enough to read or insert, never across another acquisition.

use super::results::{LedgerSnapshot, StoreError};
use crate::audit::{AuditEvent, AuditTrail};
use crate::config::ComplianceConfig;
use crate::market_data::MarketDataSource;
use crate::order::Order;
use crate::position::Position;
use crate::registry::ComplianceRegistry;
use crate::transaction::Transaction;
use crate::types::{Clock, MarketTicker, OrderId, PositionId, RequestContext, Side, Timestamp, TransactionId, UserId};
use crate::user::User;
use crate::wallet::Wallet;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

pub(super) type WalletHandle = Arc<Mutex<Wallet>>;

#[derive(Debug, Default)]
pub(super) struct UserTable {
    pub(super) by_id: HashMap<UserId, User>,
    pub(super) by_email: HashMap<String, UserId>,
}

#[derive(Debug, Default)]
pub(super) struct PositionTable {
    pub(super) by_id: BTreeMap<PositionId, Position>,
    pub(super) open: HashMap<(UserId, MarketTicker, Side), PositionId>,
}

/** 8.1: main store struct. all ledger state lives here */
#[derive(Debug)]
pub struct LedgerStore {
    pub(super) config: ComplianceConfig,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) users: RwLock<UserTable>,
    pub(super) wallets: RwLock<HashMap<UserId, WalletHandle>>,
    pub(super) transactions: RwLock<Vec<Transaction>>,
    pub(super) orders: RwLock<BTreeMap<OrderId, Order>>,
    pub(super) positions: RwLock<PositionTable>,
    pub(super) audit: Arc<AuditTrail>,
    pub(super) registry: Arc<ComplianceRegistry>,
    pub(super) market_data: Option<Arc<dyn MarketDataSource>>,
    next_user_id: AtomicU64,
    next_order_id: AtomicU64,
    next_position_id: AtomicU64,
    next_transaction_id: AtomicU64,
}

impl LedgerStore {
    pub fn new(config: ComplianceConfig, clock: Arc<dyn Clock>) -> Self {
        let audit = Arc::new(AuditTrail::new(clock.clone()));
        let registry = Arc::new(ComplianceRegistry::new(audit.clone(), clock.clone()));
        Self {
            config,
            clock,
            users: RwLock::new(UserTable::default()),
            wallets: RwLock::new(HashMap::new()),
            transactions: RwLock::new(Vec::new()),
            orders: RwLock::new(BTreeMap::new()),
            positions: RwLock::new(PositionTable::default()),
            audit,
            registry,
            market_data: None,
            next_user_id: AtomicU64::new(1),
            next_order_id: AtomicU64::new(1),
            next_position_id: AtomicU64::new(1),
            next_transaction_id: AtomicU64::new(1),
        }
    }

    /// Venue status becomes an order gate once a source is attached.
    pub fn with_market_data(mut self, source: Arc<dyn MarketDataSource>) -> Self {
        self.market_data = Some(source);
        self
    }

    pub fn config(&self) -> &ComplianceConfig {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub fn registry(&self) -> &Arc<ComplianceRegistry> {
        &self.registry
    }

    pub fn market_data(&self) -> Option<&Arc<dyn MarketDataSource>> {
        self.market_data.as_ref()
    }

    pub(super) fn next_user_id(&self) -> UserId {
        UserId(self.next_user_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(super) fn next_order_id(&self) -> OrderId {
        OrderId(self.next_order_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(super) fn next_position_id(&self) -> PositionId {
        PositionId(self.next_position_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(super) fn next_transaction_id(&self) -> TransactionId {
        TransactionId(self.next_transaction_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(super) fn wallet_handle(&self, user_id: UserId) -> Result<WalletHandle, StoreError> {
        self.wallets
            .read()
            .get(&user_id)
            .cloned()
            .ok_or(StoreError::WalletNotFound(user_id))
    }

    pub(super) fn record(&self, ctx: &RequestContext, event: AuditEvent) {
        self.audit.append(ctx, event);
    }

    pub fn user_count(&self) -> usize {
        self.users.read().by_id.len()
    }

    pub fn order_count(&self) -> usize {
        self.orders.read().len()
    }

    // 8.2: point in time copy. takes the table locks in the documented order so no
    // order, position or wallet can move while the copy is made
    pub fn snapshot(&self) -> LedgerSnapshot {
        let orders = self.orders.read();
        let positions = self.positions.read();
        // wallet guards are always taken in user id order
        let mut handles: Vec<(UserId, WalletHandle)> = self
            .wallets
            .read()
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();
        handles.sort_by_key(|(id, _)| *id);
        let guards: Vec<_> = handles.iter().map(|(_, h)| h.lock()).collect();
        let transactions = self.transactions.read();

        let wallets: Vec<Wallet> = guards.iter().map(|g| (**g).clone()).collect();
        let mut users: Vec<User> = self.users.read().by_id.values().cloned().collect();
        users.sort_by_key(|u| u.id);

        LedgerSnapshot {
            taken_at: Some(self.clock.now()),
            users,
            wallets,
            transactions: transactions.clone(),
            orders: orders.values().cloned().collect(),
            positions: positions.by_id.values().cloned().collect(),
            registry: self.registry.snapshot(),
            audit: self.audit.entries(),
        }
    }

    pub fn restore(&self, snapshot: LedgerSnapshot) {
        let mut orders = self.orders.write();
        let mut positions = self.positions.write();
        let mut wallets = self.wallets.write();
        let mut transactions = self.transactions.write();
        let mut users = self.users.write();

        self.next_user_id
            .store(snapshot.users.iter().map(|u| u.id.0).max().unwrap_or(0) + 1, Ordering::SeqCst);
        self.next_order_id
            .store(snapshot.orders.iter().map(|o| o.id.0).max().unwrap_or(0) + 1, Ordering::SeqCst);
        self.next_position_id
            .store(snapshot.positions.iter().map(|p| p.id.0).max().unwrap_or(0) + 1, Ordering::SeqCst);
        self.next_transaction_id.store(
            snapshot.transactions.iter().map(|t| t.id.0).max().unwrap_or(0) + 1,
            Ordering::SeqCst,
        );

        users.by_email = snapshot.users.iter().map(|u| (u.email.clone(), u.id)).collect();
        users.by_id = snapshot.users.into_iter().map(|u| (u.id, u)).collect();
        *wallets = snapshot
            .wallets
            .into_iter()
            .map(|w| (w.user_id, Arc::new(Mutex::new(w))))
            .collect();
        *transactions = snapshot.transactions;
        *orders = snapshot.orders.into_iter().map(|o| (o.id, o)).collect();
        positions.open = snapshot
            .positions
            .iter()
            .filter(|p| p.is_open)
            .map(|p| ((p.user_id, p.market.clone(), p.side), p.id))
            .collect();
        positions.by_id = snapshot.positions.into_iter().map(|p| (p.id, p)).collect();

        self.registry.restore(snapshot.registry);
        self.audit.restore(snapshot.audit);

        info!(
            users = users.by_id.len(),
            orders = orders.len(),
            positions = positions.by_id.len(),
            "ledger restored from snapshot"
        );
    }
}

//! Order admission and lifecycle.

use super::core::LedgerStore;
use super::results::{OrderRequest, StoreError};
use crate::audit::{AuditAction, AuditEvent};
use crate::margin::required_collateral;
use crate::order::{FillConfirmation, Order, OrderStatus};
use crate::position::Position;
use crate::registry::{AlertSeverity, AlertType, NewAlert};
use crate::types::{MarketTicker, OrderId, PriceCents, RequestContext, UserId};
use tracing::{info, warn};

impl LedgerStore {
    // 9.0: the gate. each check short circuits, and nothing is mutated until the lock
    // succeeds. the limit check and the lock share one wallet guard so two concurrent
    // orders can't both squeeze under the limit
    pub fn create_order(&self, request: &OrderRequest, ctx: &RequestContext) -> Result<Order, StoreError> {
        let max_quantity = self.config.limits.max_order_quantity;
        if request.quantity == 0 || request.quantity > max_quantity {
            return Err(StoreError::InvalidOrder(format!(
                "quantity must be between 1 and {max_quantity}, got {}",
                request.quantity
            )));
        }
        if request.market.is_empty() {
            return Err(StoreError::InvalidOrder("market ticker is required".to_string()));
        }
        let price = PriceCents::new(request.price_cents).ok_or_else(|| {
            StoreError::InvalidOrder(format!("price must be 1-99 cents, got {}", request.price_cents))
        })?;

        // 9.1: halts. global first, then the market
        if let Some(halt) = self.registry.active_halt_for(&request.market) {
            warn!(user_id = %request.user_id, market = %request.market, "order rejected: trading halted");
            return Err(StoreError::TradingHalted {
                market: request.market.clone(),
                reason: halt.reason,
            });
        }

        if let Some(source) = &self.market_data {
            let status = source.status(&request.market);
            if !status.accepts_orders() {
                return Err(StoreError::MarketClosed {
                    market: request.market.clone(),
                    status: status.to_string(),
                });
            }
        }

        // 9.2: account eligibility
        let user = self.get_user(request.user_id)?;
        if user.status.is_blocked() {
            return Err(StoreError::UserSuspended {
                user_id: user.id,
                status: user.status,
            });
        }
        if !user.can_trade() {
            return Err(StoreError::KycRequired(user.id));
        }

        // 9.3: collateral, limit and lock under one guard
        let collateral = required_collateral(request.side, request.quantity, price);
        let handle = self.wallet_handle(request.user_id)?;
        let now = self.clock.now();
        {
            let mut wallet = handle.lock();
            let exposure = wallet.locked;
            if exposure.add(collateral) > user.position_limit {
                drop(wallet);
                warn!(
                    user_id = %user.id,
                    exposure = %exposure,
                    requested = %collateral,
                    limit = %user.position_limit,
                    "order rejected: position limit"
                );
                self.registry.raise_alert(NewAlert {
                    user_id: Some(user.id),
                    market: Some(request.market.clone()),
                    kind: AlertType::PositionLimit,
                    severity: AlertSeverity::High,
                    description: format!(
                        "Order would exceed position limit: exposure {exposure} + {collateral} > {}",
                        user.position_limit
                    ),
                });
                return Err(StoreError::PositionLimitExceeded {
                    exposure,
                    requested: collateral,
                    limit: user.position_limit,
                });
            }
            wallet.lock(collateral, now)?;
        }

        let mut order = Order::new(
            self.next_order_id(),
            request.user_id,
            request.market.clone(),
            request.side,
            request.order_type,
            request.quantity,
            price,
            collateral,
            now,
        );
        order.submit_ip = ctx.ip.clone();
        self.orders.write().insert(order.id, order.clone());

        info!(
            order_id = %order.id,
            user_id = %order.user_id,
            market = %order.market,
            side = %order.side,
            quantity = order.quantity,
            price = %order.price,
            collateral = %order.collateral,
            "order accepted"
        );
        self.record(
            ctx,
            AuditEvent::new(AuditAction::Trade, "order", order.id)
                .after(&order)
                .description(format!(
                    "Order: {} {} {} @ {}",
                    order.quantity, order.side, order.market, order.price
                )),
        );
        Ok(order)
    }

    /// Venue execution. The order becomes `filled` and folds into the user's
    /// open position for that market and side.
    pub fn fill_order(
        &self,
        order_id: OrderId,
        fill_price: PriceCents,
        ctx: &RequestContext,
    ) -> Result<(Order, Position), StoreError> {
        let now = self.clock.now();
        let (before, order, position) = {
            let mut orders = self.orders.write();
            let order = orders.get_mut(&order_id).ok_or(StoreError::OrderNotFound(order_id))?;
            let before = order.clone();
            order.fill(fill_price, now)?;
            let filled = order.clone();

            let mut positions = self.positions.write();
            let position = self.merge_fill(&mut positions, &filled, fill_price, now);
            (before, filled, position)
        };

        info!(
            order_id = %order.id,
            position_id = %position.id,
            fill_price = %fill_price,
            "order filled"
        );
        self.record(
            ctx,
            AuditEvent::new(AuditAction::Fill, "order", order.id)
                .before(&before)
                .after(&order)
                .description(format!("Filled {} @ {}", order.quantity, fill_price)),
        );
        Ok((order, position))
    }

    /// Fill reported by the venue. Only whole fills are supported.
    pub fn apply_fill(
        &self,
        confirmation: &FillConfirmation,
        ctx: &RequestContext,
    ) -> Result<(Order, Position), StoreError> {
        let order = self.get_order(confirmation.order_id)?;
        if confirmation.quantity != order.quantity {
            return Err(StoreError::InvalidOrder(format!(
                "partial fill of {} for order {} of {}",
                confirmation.quantity, order.id, order.quantity
            )));
        }
        self.fill_order(confirmation.order_id, confirmation.price_cents, ctx)
    }

    pub fn cancel_order(&self, order_id: OrderId, ctx: &RequestContext) -> Result<Order, StoreError> {
        self.close_pending(order_id, None, ctx)
    }

    /// Venue rejection. Collateral goes back to the user.
    pub fn reject_order(&self, order_id: OrderId, reason: &str, ctx: &RequestContext) -> Result<Order, StoreError> {
        self.close_pending(order_id, Some(reason), ctx)
    }

    // 9.4: cancel and reject both end a pending order and unlock exactly its collateral.
    // the unlock runs first so a failure leaves the order pending
    fn close_pending(
        &self,
        order_id: OrderId,
        reject_reason: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<Order, StoreError> {
        let now = self.clock.now();
        let (before, after) = {
            let mut orders = self.orders.write();
            let order = orders.get_mut(&order_id).ok_or(StoreError::OrderNotFound(order_id))?;
            if order.status != OrderStatus::Pending {
                let to = if reject_reason.is_some() {
                    OrderStatus::Rejected
                } else {
                    OrderStatus::Cancelled
                };
                return Err(StoreError::InvalidTransition {
                    order_id,
                    from: order.status,
                    to,
                });
            }

            let handle = self.wallet_handle(order.user_id)?;
            handle.lock().unlock(order.collateral, now)?;

            let before = order.clone();
            match reject_reason {
                Some(reason) => order.reject(reason, now)?,
                None => order.cancel(now)?,
            }
            (before, order.clone())
        };

        let (action, verb) = match reject_reason {
            Some(_) => (AuditAction::Reject, "rejected"),
            None => (AuditAction::Cancel, "cancelled"),
        };
        info!(order_id = %order_id, released = %after.collateral, "order {verb}");
        self.record(
            ctx,
            AuditEvent::new(action, "order", order_id)
                .before(&before)
                .after(&after)
                .description(match reject_reason {
                    Some(reason) => format!("Order rejected: {reason}"),
                    None => format!("Order cancelled, released {}", after.collateral),
                }),
        );
        Ok(after)
    }

    pub fn get_order(&self, order_id: OrderId) -> Result<Order, StoreError> {
        self.orders
            .read()
            .get(&order_id)
            .cloned()
            .ok_or(StoreError::OrderNotFound(order_id))
    }

    /// Most recent first, optionally filtered by status.
    pub fn get_orders(&self, user_id: UserId, status: Option<OrderStatus>, limit: usize) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .rev()
            .filter(|o| o.user_id == user_id)
            .filter(|o| status.map_or(true, |s| o.status == s))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Every order a user has sent to one market, oldest first.
    pub fn orders_in_market(&self, user_id: UserId, market: &MarketTicker) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .filter(|o| o.user_id == user_id && &o.market == market)
            .cloned()
            .collect()
    }

    pub fn all_orders(&self) -> Vec<Order> {
        self.orders.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ComplianceConfig;
    use crate::market_data::{StaticMarketData, VenueStatus};
    use crate::order::OrderStatus;
    use crate::registry::{AlertFilter, AlertType, HaltKey};
    use crate::store::{LedgerStore, OrderRequest, StoreError};
    use crate::types::{ManualClock, MarketTicker, PriceCents, RequestContext, Side, Timestamp, UserId, Usd};
    use crate::user::UserStatus;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    const MARKET: &str = "FED-RATE-MAR";

    fn store() -> LedgerStore {
        LedgerStore::new(
            ComplianceConfig::default(),
            Arc::new(ManualClock::new(Timestamp::from_millis(0))),
        )
    }

    fn verified_user(store: &LedgerStore, funds: Usd) -> UserId {
        let ctx = RequestContext::system();
        let user = store.create_user(&format!("u{}@x.com", store.user_count()), &ctx).unwrap();
        store.apply_kyc_decision(user.id, true, "ok", &ctx).unwrap();
        if funds.is_positive() {
            store.deposit(user.id, funds, None, &ctx).unwrap();
        }
        user.id
    }

    #[test]
    fn accepted_order_locks_collateral() {
        let store = store();
        let user = verified_user(&store, Usd::new(dec!(1000)));
        let order = store
            .create_order(&OrderRequest::limit(user, MARKET, Side::Yes, 50, 60), &RequestContext::new("u"))
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.collateral.value(), dec!(30));
        let wallet = store.get_wallet(user).unwrap();
        assert_eq!(wallet.available.value(), dec!(970));
        assert_eq!(wallet.locked.value(), dec!(30));
    }

    #[test]
    fn order_writes_exactly_one_trade_entry() {
        let store = store();
        let user = verified_user(&store, Usd::new(dec!(1000)));
        let before = store.audit().len();
        store
            .create_order(&OrderRequest::limit(user, MARKET, Side::No, 10, 30), &RequestContext::new("u"))
            .unwrap();
        let entries = store.audit().entries_after(before as u64);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action.as_str(), "trade");
    }

    #[test]
    fn shape_checks() {
        let store = store();
        let user = verified_user(&store, Usd::new(dec!(1000)));
        let ctx = RequestContext::system();
        for (qty, price) in [(0, 50), (1_001, 50), (10, 0), (10, 100)] {
            let err = store
                .create_order(&OrderRequest::limit(user, MARKET, Side::Yes, qty, price), &ctx)
                .unwrap_err();
            assert_eq!(err.code(), "INVALID_ORDER");
        }
    }

    #[test]
    fn halt_wins_over_other_failures() {
        let store = store();
        // unverified and unfunded, but the halt is reported first
        let user = store.create_user("a@b.com", &RequestContext::system()).unwrap();
        store
            .registry()
            .halt(HaltKey::Global, "drill", &RequestContext::new("ops"));
        let err = store
            .create_order(&OrderRequest::limit(user.id, MARKET, Side::Yes, 10, 50), &RequestContext::system())
            .unwrap_err();
        assert_eq!(err.code(), "TRADING_HALTED");
    }

    #[test]
    fn eligibility_order() {
        let store = store();
        let ctx = RequestContext::system();
        let user = store.create_user("a@b.com", &ctx).unwrap();
        let req = OrderRequest::limit(user.id, MARKET, Side::Yes, 10, 50);

        assert_eq!(store.create_order(&req, &ctx).unwrap_err(), StoreError::KycRequired(user.id));

        store.update_user_status(user.id, UserStatus::Suspended, &ctx).unwrap();
        assert_eq!(store.create_order(&req, &ctx).unwrap_err().code(), "ACCOUNT_SUSPENDED");
    }

    #[test]
    fn limit_breach_raises_alert_and_keeps_wallet() {
        let store = store();
        let user = verified_user(&store, Usd::new(dec!(50_000)));
        let ctx = RequestContext::system();
        store.set_position_limit(user, Usd::new(dec!(100)), &ctx).unwrap();

        // 200 @ 60c = $120 > $100
        let err = store
            .create_order(&OrderRequest::limit(user, MARKET, Side::Yes, 200, 60), &ctx)
            .unwrap_err();
        assert_eq!(err.code(), "POSITION_LIMIT");
        assert!(store.get_wallet(user).unwrap().locked.is_zero());

        let alerts = store.registry().alerts(&AlertFilter::default());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertType::PositionLimit);
        assert_eq!(store.order_count(), 0);
    }

    #[test]
    fn insufficient_funds() {
        let store = store();
        let user = verified_user(&store, Usd::new(dec!(10)));
        let err = store
            .create_order(&OrderRequest::limit(user, MARKET, Side::Yes, 50, 60), &RequestContext::system())
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(store.get_wallet(user).unwrap().available.value(), dec!(10));
    }

    #[test]
    fn venue_status_gate() {
        let venue = Arc::new(StaticMarketData::new());
        let store = store().with_market_data(venue.clone());
        let user = verified_user(&store, Usd::new(dec!(1000)));
        let req = OrderRequest::limit(user, MARKET, Side::Yes, 10, 50);

        assert_eq!(store.create_order(&req, &RequestContext::system()).unwrap_err().code(), "MARKET_CLOSED");
        venue.set_status(&MarketTicker::from(MARKET), VenueStatus::Open);
        assert!(store.create_order(&req, &RequestContext::system()).is_ok());
    }

    #[test]
    fn cancel_unlocks_exact_collateral() {
        let store = store();
        let user = verified_user(&store, Usd::new(dec!(100)));
        let ctx = RequestContext::system();
        let order = store
            .create_order(&OrderRequest::limit(user, MARKET, Side::No, 30, 65), &ctx)
            .unwrap();
        assert_eq!(order.collateral.value(), dec!(10.50));

        let cancelled = store.cancel_order(order.id, &ctx).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        let wallet = store.get_wallet(user).unwrap();
        assert_eq!(wallet.available.value(), dec!(100));
        assert!(wallet.locked.is_zero());

        let err = store.cancel_order(order.id, &ctx).unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
        assert!(store.get_wallet(user).unwrap().locked.is_zero());
    }

    #[test]
    fn reject_records_reason() {
        let store = store();
        let user = verified_user(&store, Usd::new(dec!(100)));
        let ctx = RequestContext::system();
        let order = store
            .create_order(&OrderRequest::limit(user, MARKET, Side::Yes, 10, 50), &ctx)
            .unwrap();
        let rejected = store.reject_order(order.id, "venue rejected", &ctx).unwrap();
        assert_eq!(rejected.status_reason.as_deref(), Some("venue rejected"));
        assert!(store.fill_order(order.id, PriceCents::new(50).unwrap(), &ctx).is_err());
    }

    #[test]
    fn get_orders_filters_and_limits() {
        let store = store();
        let user = verified_user(&store, Usd::new(dec!(1000)));
        let ctx = RequestContext::system();
        let first = store
            .create_order(&OrderRequest::limit(user, MARKET, Side::Yes, 10, 50), &ctx)
            .unwrap();
        store
            .create_order(&OrderRequest::limit(user, MARKET, Side::Yes, 10, 51), &ctx)
            .unwrap();
        store.cancel_order(first.id, &ctx).unwrap();

        let all = store.get_orders(user, None, 10);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].price.value(), 51);

        let pending = store.get_orders(user, Some(OrderStatus::Pending), 10);
        assert_eq!(pending.len(), 1);
        assert_eq!(store.get_orders(user, None, 1).len(), 1);
    }
}

//! Position tracking, valuation and market settlement.

use super::core::{LedgerStore, PositionTable};
use super::results::{MarketSettlement, PortfolioSummary, SettlementResult, StoreError};
use crate::audit::{AuditAction, AuditEvent};
use crate::margin::utilization_pct;
use crate::market_data::MarketQuote;
use crate::order::{Order, OrderStatus};
use crate::position::Position;
use crate::types::{MarketTicker, PriceCents, RequestContext, Side, Timestamp, UserId, Usd};
use tracing::{debug, info, warn};

impl LedgerStore {
    // 10.0: create or average. caller holds the orders lock, so fills against the same
    // position are serialized
    pub(super) fn merge_fill(
        &self,
        positions: &mut PositionTable,
        order: &Order,
        fill_price: PriceCents,
        now: Timestamp,
    ) -> Position {
        let key = (order.user_id, order.market.clone(), order.side);
        if let Some(id) = positions.open.get(&key).copied() {
            if let Some(position) = positions.by_id.get_mut(&id) {
                position.add_fill(order.quantity, fill_price, order.collateral, now);
                return position.clone();
            }
        }

        let position = Position::open(
            self.next_position_id(),
            order.user_id,
            order.market.clone(),
            order.side,
            order.quantity,
            fill_price,
            order.collateral,
            now,
        );
        positions.open.insert(key, position.id);
        positions.by_id.insert(position.id, position.clone());
        debug!(position_id = %position.id, user_id = %position.user_id, "position opened");
        position
    }

    /// Open and closed positions, most recent first.
    pub fn get_positions(&self, user_id: UserId) -> Vec<Position> {
        self.positions
            .read()
            .by_id
            .values()
            .rev()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn open_positions(&self, user_id: UserId) -> Vec<Position> {
        self.get_positions(user_id).into_iter().filter(|p| p.is_open).collect()
    }

    /// Revalue open positions in `market` from a venue quote. Returns how many
    /// positions were updated. Collateral and balances are not touched.
    pub fn mark_to_market(&self, market: &MarketTicker, quote: &MarketQuote) -> usize {
        let now = self.clock.now();
        let mut positions = self.positions.write();
        let mut updated = 0;
        for position in positions.by_id.values_mut().filter(|p| p.is_open && &p.market == market) {
            position.mark(quote.bid_for(position.side), now);
            updated += 1;
        }
        debug!(market = %market, updated, "positions marked");
        updated
    }

    /// Mark every open position using the attached market data source.
    pub fn refresh_marks(&self) -> usize {
        let Some(source) = &self.market_data else {
            return 0;
        };
        let mut markets: Vec<MarketTicker> = self
            .positions
            .read()
            .by_id
            .values()
            .filter(|p| p.is_open)
            .map(|p| p.market.clone())
            .collect();
        markets.sort();
        markets.dedup();

        markets
            .iter()
            .filter_map(|m| source.quote(m).map(|q| self.mark_to_market(m, &q)))
            .sum()
    }

    // 10.1: resolution. pending orders in the market are cancelled and unlocked, then
    // every open position settles: $1 per contract to the winning side, nothing to the
    // other. a wallet that fails to settle is logged and left open for manual handling
    pub fn settle_market(
        &self,
        market: &MarketTicker,
        winning_side: Side,
        ctx: &RequestContext,
    ) -> Result<MarketSettlement, StoreError> {
        if market.is_empty() {
            return Err(StoreError::InvalidOrder("market ticker is required".to_string()));
        }
        let now = self.clock.now();
        let mut result = MarketSettlement {
            market: Some(market.clone()),
            winning_side: Some(winning_side),
            ..Default::default()
        };
        let mut cancelled = Vec::new();
        let mut settled = Vec::new();

        {
            let mut orders = self.orders.write();
            for order in orders
                .values_mut()
                .filter(|o| o.status == OrderStatus::Pending && &o.market == market)
            {
                let handle = match self.wallet_handle(order.user_id) {
                    Ok(handle) => handle,
                    Err(e) => {
                        warn!(order_id = %order.id, error = %e, "cannot release order at settlement");
                        continue;
                    }
                };
                if let Err(e) = handle.lock().unlock(order.collateral, now) {
                    warn!(order_id = %order.id, error = %e, "cannot release order at settlement");
                    continue;
                }
                let before = order.clone();
                if order.cancel(now).is_ok() {
                    order.status_reason = Some("market settled".to_string());
                    cancelled.push((before, order.clone()));
                }
            }

            let mut positions = self.positions.write();
            let PositionTable { by_id, open } = &mut *positions;
            for position in by_id.values_mut().filter(|p| p.is_open && &p.market == market) {
                let payout = position.settlement_payout(winning_side);
                let handle = match self.wallet_handle(position.user_id) {
                    Ok(handle) => handle,
                    Err(e) => {
                        warn!(position_id = %position.id, error = %e, "settlement skipped");
                        continue;
                    }
                };
                let mut wallet = handle.lock();
                let reference = Some(position.id.to_string());
                match self.settle_in_wallet(&mut wallet, position.cost_basis, payout, reference, now) {
                    Ok(tx) => {
                        drop(wallet);
                        let before = position.clone();
                        let pnl = position.close(payout, now);
                        open.remove(&(position.user_id, position.market.clone(), position.side));
                        settled.push((before, position.clone(), tx.description));
                        result.settlements.push(SettlementResult {
                            user_id: position.user_id,
                            position_id: position.id,
                            payout,
                            realized_pnl: pnl,
                        });
                    }
                    Err(e) => {
                        warn!(position_id = %position.id, error = %e, "settlement skipped");
                    }
                }
            }
        }

        for (before, after) in cancelled {
            result.cancelled_orders.push(after.id);
            self.record(
                ctx,
                AuditEvent::new(AuditAction::Cancel, "order", after.id)
                    .before(&before)
                    .after(&after)
                    .description(format!("Order cancelled at settlement of {market}")),
            );
        }
        for (before, after, description) in settled {
            self.record(
                ctx,
                AuditEvent::new(AuditAction::Settlement, "position", after.id)
                    .before(&before)
                    .after(&after)
                    .description(description),
            );
        }

        info!(
            market = %market,
            winning_side = %winning_side,
            positions = result.settlements.len(),
            cancelled = result.cancelled_orders.len(),
            "market settled"
        );
        Ok(result)
    }

    pub fn portfolio_summary(&self, user_id: UserId) -> Result<PortfolioSummary, StoreError> {
        let user = self.get_user(user_id)?;
        let wallet = self.get_wallet(user_id)?;
        let open = self.open_positions(user_id);

        let total_value: Usd = open.iter().map(|p| p.current_value).sum();
        let unrealized_pnl: Usd = open.iter().map(|p| p.unrealized_pnl).sum();

        Ok(PortfolioSummary {
            user_id,
            available: wallet.available,
            locked: wallet.locked,
            total: wallet.total(),
            open_positions: open.len(),
            total_value,
            unrealized_pnl,
            position_limit: user.position_limit,
            exposure: wallet.locked,
            utilization_pct: utilization_pct(wallet.locked, user.position_limit),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ComplianceConfig;
    use crate::market_data::MarketQuote;
    use crate::order::OrderStatus;
    use crate::store::{LedgerStore, OrderRequest};
    use crate::transaction::TransactionType;
    use crate::types::{ManualClock, MarketTicker, PriceCents, RequestContext, Side, Timestamp, UserId, Usd};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    const MARKET: &str = "ELECTION-2024";

    fn cents(c: u32) -> PriceCents {
        PriceCents::new(c).unwrap()
    }

    fn setup() -> (LedgerStore, UserId) {
        let store = LedgerStore::new(
            ComplianceConfig::default(),
            Arc::new(ManualClock::new(Timestamp::from_millis(0))),
        );
        let ctx = RequestContext::system();
        let user = store.create_user("p@x.com", &ctx).unwrap();
        store.apply_kyc_decision(user.id, true, "ok", &ctx).unwrap();
        store.deposit(user.id, Usd::new(dec!(1000)), None, &ctx).unwrap();
        (store, user.id)
    }

    fn buy(store: &LedgerStore, user: UserId, side: Side, qty: u32, price: u32) -> crate::order::Order {
        store
            .create_order(&OrderRequest::limit(user, MARKET, side, qty, price), &RequestContext::system())
            .unwrap()
    }

    #[test]
    fn fills_merge_into_one_position() {
        let (store, user) = setup();
        let ctx = RequestContext::system();
        let a = buy(&store, user, Side::Yes, 50, 60);
        let b = buy(&store, user, Side::Yes, 150, 40);
        store.fill_order(a.id, cents(60), &ctx).unwrap();
        let (_, position) = store.fill_order(b.id, cents(40), &ctx).unwrap();

        assert_eq!(position.quantity, 200);
        assert_eq!(position.avg_price, dec!(45));
        assert_eq!(position.cost_basis.value(), dec!(90));
        assert_eq!(store.open_positions(user).len(), 1);
    }

    #[test]
    fn opposite_sides_are_separate_positions() {
        let (store, user) = setup();
        let ctx = RequestContext::system();
        let yes = buy(&store, user, Side::Yes, 10, 60);
        let no = buy(&store, user, Side::No, 10, 60);
        store.fill_order(yes.id, cents(60), &ctx).unwrap();
        store.fill_order(no.id, cents(60), &ctx).unwrap();
        assert_eq!(store.open_positions(user).len(), 2);
    }

    #[test]
    fn settlement_pays_winners_and_releases_collateral() {
        let (store, user) = setup();
        let ctx = RequestContext::system();
        let yes = buy(&store, user, Side::Yes, 50, 60); // $30
        let no = buy(&store, user, Side::No, 20, 60); // $8
        let resting = buy(&store, user, Side::Yes, 10, 10); // $1
        store.fill_order(yes.id, cents(60), &ctx).unwrap();
        store.fill_order(no.id, cents(60), &ctx).unwrap();

        let result = store
            .settle_market(&MarketTicker::from(MARKET), Side::Yes, &ctx)
            .unwrap();
        assert_eq!(result.settlements.len(), 2);
        assert_eq!(result.cancelled_orders, vec![resting.id]);

        let wallet = store.get_wallet(user).unwrap();
        assert!(wallet.locked.is_zero());
        // 1000 - 30 - 8 + 50
        assert_eq!(wallet.available.value(), dec!(1012));

        assert_eq!(store.get_order(resting.id).unwrap().status, OrderStatus::Cancelled);
        assert!(store.open_positions(user).is_empty());
        let closed = store.get_positions(user);
        assert!(closed.iter().all(|p| !p.is_open));
        let realized: Vec<_> = closed.iter().map(|p| p.realized_pnl.value()).collect();
        assert!(realized.contains(&dec!(20)));
        assert!(realized.contains(&dec!(-8)));

        let settlements = store
            .get_transactions(user, 10)
            .into_iter()
            .filter(|t| t.kind == TransactionType::Settlement)
            .count();
        assert_eq!(settlements, 2);
    }

    #[test]
    fn new_fill_after_settlement_opens_fresh_position() {
        let (store, user) = setup();
        let ctx = RequestContext::system();
        let first = buy(&store, user, Side::Yes, 10, 50);
        store.fill_order(first.id, cents(50), &ctx).unwrap();
        store.settle_market(&MarketTicker::from(MARKET), Side::No, &ctx).unwrap();

        let second = buy(&store, user, Side::Yes, 10, 50);
        let (_, position) = store.fill_order(second.id, cents(50), &ctx).unwrap();
        assert_eq!(position.quantity, 10);
        assert_eq!(store.get_positions(user).len(), 2);
    }

    #[test]
    fn mark_to_market_and_portfolio() {
        let (store, user) = setup();
        let ctx = RequestContext::system();
        let order = buy(&store, user, Side::Yes, 100, 40); // $40
        store.fill_order(order.id, cents(40), &ctx).unwrap();

        let quote = MarketQuote {
            yes_bid: cents(55),
            yes_ask: cents(57),
            last_price: cents(56),
        };
        assert_eq!(store.mark_to_market(&MarketTicker::from(MARKET), &quote), 1);

        let summary = store.portfolio_summary(user).unwrap();
        assert_eq!(summary.open_positions, 1);
        assert_eq!(summary.total_value.value(), dec!(55));
        assert_eq!(summary.unrealized_pnl.value(), dec!(15));
        assert_eq!(summary.locked.value(), dec!(40));
        assert_eq!(summary.total.value(), dec!(1000));
        assert_eq!(summary.utilization_pct, dec!(0.16));
    }
}

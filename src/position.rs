// 5.0: realized contract holdings. one open position per (user, market, side).
// fills fold in with a quantity weighted average price, cost basis is the sum of
// the merged orders' collateral.

use crate::types::{MarketTicker, PositionId, PriceCents, Side, Timestamp, UserId, Usd};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub user_id: UserId,
    pub market: MarketTicker,
    pub side: Side,
    pub quantity: u64,
    /// Average fill price in cents.
    pub avg_price: Decimal,
    pub cost_basis: Usd,
    pub current_value: Usd,
    pub realized_pnl: Usd,
    pub unrealized_pnl: Usd,
    pub is_open: bool,
    pub opened_at: Timestamp,
    pub updated_at: Timestamp,
    pub closed_at: Option<Timestamp>,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        id: PositionId,
        user_id: UserId,
        market: MarketTicker,
        side: Side,
        quantity: u32,
        fill_price: PriceCents,
        collateral: Usd,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id,
            user_id,
            market,
            side,
            quantity: quantity as u64,
            avg_price: Decimal::from(fill_price.value()),
            cost_basis: collateral,
            current_value: collateral,
            realized_pnl: Usd::zero(),
            unrealized_pnl: Usd::zero(),
            is_open: true,
            opened_at: timestamp,
            updated_at: timestamp,
            closed_at: None,
        }
    }

    pub fn matches(&self, user_id: UserId, market: &MarketTicker, side: Side) -> bool {
        self.is_open && self.user_id == user_id && &self.market == market && self.side == side
    }

    // 5.1: weighted average. (q0 * p0 + q1 * p1) / (q0 + q1)
    pub fn add_fill(&mut self, quantity: u32, fill_price: PriceCents, collateral: Usd, timestamp: Timestamp) {
        let old_qty = Decimal::from(self.quantity);
        let add_qty = Decimal::from(quantity);
        let new_qty = old_qty + add_qty;

        if !new_qty.is_zero() {
            let weighted = old_qty * self.avg_price + add_qty * Decimal::from(fill_price.value());
            self.avg_price = (weighted / new_qty).round_dp(4);
        }

        self.quantity += quantity as u64;
        self.cost_basis = self.cost_basis.add(collateral);
        self.current_value = self.current_value.add(collateral);
        self.unrealized_pnl = self.current_value.sub(self.cost_basis);
        self.updated_at = timestamp;
    }

    // 5.2: valuation only. collateral and locked funds are untouched
    pub fn mark(&mut self, side_price: PriceCents, timestamp: Timestamp) {
        let value = Decimal::from(self.quantity) * Decimal::from(side_price.value()) / Decimal::ONE_HUNDRED;
        self.current_value = Usd::new(value);
        self.unrealized_pnl = self.current_value.sub(self.cost_basis);
        self.updated_at = timestamp;
    }

    /// Payout at resolution: $1 per contract on the winning side, nothing otherwise.
    pub fn settlement_payout(&self, winning_side: Side) -> Usd {
        if self.side == winning_side {
            Usd::new(Decimal::from(self.quantity))
        } else {
            Usd::zero()
        }
    }

    pub fn close(&mut self, payout: Usd, timestamp: Timestamp) -> Usd {
        let pnl = payout.sub(self.cost_basis);
        self.realized_pnl = self.realized_pnl.add(pnl);
        self.current_value = payout;
        self.unrealized_pnl = Usd::zero();
        self.is_open = false;
        self.closed_at = Some(timestamp);
        self.updated_at = timestamp;
        pnl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn price(c: u32) -> PriceCents {
        PriceCents::new(c).unwrap()
    }

    fn open_yes() -> Position {
        Position::open(
            PositionId(1),
            UserId(1),
            MarketTicker::from("FED-RATE-MAR"),
            Side::Yes,
            50,
            price(60),
            Usd::new(dec!(30)),
            Timestamp::from_millis(0),
        )
    }

    #[test]
    fn merge_averages_price_by_quantity() {
        let mut pos = open_yes();
        // 50 @ 60 then 150 @ 40 => (3000 + 6000) / 200 = 45
        pos.add_fill(150, price(40), Usd::new(dec!(60)), Timestamp::from_millis(1));
        assert_eq!(pos.quantity, 200);
        assert_eq!(pos.avg_price, dec!(45));
        assert_eq!(pos.cost_basis.value(), dec!(90));
    }

    #[test]
    fn mark_updates_unrealized_only() {
        let mut pos = open_yes();
        pos.mark(price(70), Timestamp::from_millis(1));
        assert_eq!(pos.current_value.value(), dec!(35));
        assert_eq!(pos.unrealized_pnl.value(), dec!(5));
        assert_eq!(pos.cost_basis.value(), dec!(30));
        assert!(pos.is_open);
    }

    #[test]
    fn settle_winner_and_loser() {
        let mut winner = open_yes();
        let payout = winner.settlement_payout(Side::Yes);
        assert_eq!(payout.value(), dec!(50));
        let pnl = winner.close(payout, Timestamp::from_millis(5));
        assert_eq!(pnl.value(), dec!(20));
        assert!(!winner.is_open);
        assert_eq!(winner.closed_at, Some(Timestamp::from_millis(5)));

        let mut loser = open_yes();
        let payout = loser.settlement_payout(Side::No);
        assert!(payout.is_zero());
        assert_eq!(loser.close(payout, Timestamp::from_millis(5)).value(), dec!(-30));
    }

    #[test]
    fn closed_position_does_not_match() {
        let mut pos = open_yes();
        let market = MarketTicker::from("FED-RATE-MAR");
        assert!(pos.matches(UserId(1), &market, Side::Yes));
        assert!(!pos.matches(UserId(1), &market, Side::No));
        pos.close(Usd::zero(), Timestamp::from_millis(1));
        assert!(!pos.matches(UserId(1), &market, Side::Yes));
    }
}

// Market data integration
//
// The core never talks to the exchange itself. Quotes and venue status come in
// through the MarketDataSource trait so the HTTP client, a replay feed, or the
// in-memory StaticMarketData below can all sit behind the ledger.

use crate::types::{MarketTicker, PriceCents, Side};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Top of book for the yes side of a binary market, in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub yes_bid: PriceCents,
    pub yes_ask: PriceCents,
    pub last_price: PriceCents,
}

impl MarketQuote {
    pub fn from_cents(yes_bid: u32, yes_ask: u32, last_price: u32) -> Result<Self, String> {
        Ok(Self {
            yes_bid: PriceCents::try_from(yes_bid)?,
            yes_ask: PriceCents::try_from(yes_ask)?,
            last_price: PriceCents::try_from(last_price)?,
        })
    }

    /// Price a holder of `side` could sell at right now. A no bid is the
    /// complement of the yes ask.
    pub fn bid_for(&self, side: Side) -> PriceCents {
        match side {
            Side::Yes => self.yes_bid,
            Side::No => self.yes_ask.complement(),
        }
    }

    pub fn spread(&self) -> i64 {
        self.yes_ask.value() as i64 - self.yes_bid.value() as i64
    }
}

/// Venue side lifecycle of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueStatus {
    Open,
    Closed,
    Halted,
    Settled,
}

impl VenueStatus {
    pub fn accepts_orders(&self) -> bool {
        matches!(self, VenueStatus::Open)
    }
}

impl fmt::Display for VenueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VenueStatus::Open => "open",
            VenueStatus::Closed => "closed",
            VenueStatus::Halted => "halted",
            VenueStatus::Settled => "settled",
        };
        f.write_str(s)
    }
}

pub trait MarketDataSource: Send + Sync + fmt::Debug {
    fn quote(&self, ticker: &MarketTicker) -> Option<MarketQuote>;
    fn status(&self, ticker: &MarketTicker) -> VenueStatus;
}

#[derive(Debug, Clone)]
struct MarketEntry {
    status: VenueStatus,
    quote: Option<MarketQuote>,
}

/// In-memory market data for simulation and tests. Unknown tickers report `Closed`.
#[derive(Debug, Default)]
pub struct StaticMarketData {
    markets: RwLock<HashMap<MarketTicker, MarketEntry>>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, ticker: &MarketTicker, status: VenueStatus) {
        let mut markets = self.markets.write();
        markets
            .entry(ticker.clone())
            .and_modify(|m| m.status = status)
            .or_insert(MarketEntry { status, quote: None });
    }

    pub fn set_quote(&self, ticker: &MarketTicker, quote: MarketQuote) {
        let mut markets = self.markets.write();
        markets
            .entry(ticker.clone())
            .and_modify(|m| m.quote = Some(quote))
            .or_insert(MarketEntry {
                status: VenueStatus::Open,
                quote: Some(quote),
            });
    }
}

impl MarketDataSource for StaticMarketData {
    fn quote(&self, ticker: &MarketTicker) -> Option<MarketQuote> {
        self.markets.read().get(ticker).and_then(|m| m.quote)
    }

    fn status(&self, ticker: &MarketTicker) -> VenueStatus {
        self.markets
            .read()
            .get(ticker)
            .map(|m| m.status)
            .unwrap_or(VenueStatus::Closed)
    }
}

// dcm-core: compliance core for a binary event-contract exchange.
// compliance-first architecture: every order passes halt, eligibility, limit and
// collateral checks before any money moves, and every mutation lands in the audit trail.
// all computation is in memory; disk access lives only in persistence.rs.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: ids, MarketTicker, Side, PriceCents, Usd, Timestamp, Clock
//   2.x  order.rs: order lifecycle: pending -> filled | cancelled | rejected
//   3.x  margin.rs: full collateral, position limit checks, limit tiers
//   4.x  transaction.rs: wallet transaction records
//        user.rs, wallet.rs: users, KYC status, available/locked balances
//   5.x  position.rs: one open position per user/market/side, P&L
//   7.x  config.rs: limits, surveillance thresholds, persistence, env presets
//   8.x  store/: ledger store: users, wallets, orders, positions
//   9.x  store/orders.rs: the order gate
//   10.x store/positions.rs: fills, marks and market settlement
//   10.x market_data.rs: venue quotes and market status
//   11.x audit.rs: append only audit trail
//   12.x registry.rs: compliance alerts and emergency halts
//   13.x surveillance/: pre-trade checks, rate limits, pattern detectors
//   14.x surveillance/pretrade.rs: pre-trade check result
//   15.x surveillance/report.rs: compliance report
//   16.x persistence.rs: snapshots and monthly audit partitions on disk

// ledger modules
pub mod margin;
pub mod order;
pub mod position;
pub mod store;
pub mod transaction;
pub mod types;
pub mod user;
pub mod wallet;

// compliance modules
pub mod audit;
pub mod registry;
pub mod surveillance;

// integration modules
pub mod config;
pub mod market_data;
pub mod persistence;

// re exports for convenience
pub use audit::*;
pub use margin::*;
pub use order::*;
pub use position::*;
pub use registry::*;
pub use store::*;
pub use surveillance::*;
pub use transaction::*;
pub use types::*;
pub use user::*;
pub use wallet::*;
pub use config::{ComplianceConfig, ConfigError, Environment, LimitParams, PersistenceParams, SurveillanceParams};
pub use market_data::{MarketDataSource, MarketQuote, StaticMarketData, VenueStatus};
pub use persistence::{PersistenceError, PersistenceManager, PersistenceStats};

// 8.0: the ledger store. users, wallets, transactions, orders and positions, plus the
// order gate that ties them to the compliance registry.
// in-memory and thread safe; persistence works from snapshots taken outside the locks.

mod core;
mod orders;
mod positions;
mod results;
mod users;
mod wallets;

pub use core::LedgerStore;
pub use results::{
    LedgerSnapshot, MarketSettlement, OrderRequest, PortfolioSummary, SettlementResult, StoreError,
};

//! Compliance core simulation.
//!
//! Walks the ledger, the order gate, surveillance and halts through the
//! end-to-end scenarios of a binary event-contract venue.

use dcm_core::*;
use rust_decimal_macros::dec;
use std::error::Error;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

type SimResult = Result<(), Box<dyn Error>>;

fn main() -> SimResult {
    init_logging();

    println!("Binary Event Contract Compliance Core Simulation");
    println!("Full Collateral, Account-Wide Limits, Audited\n");

    scenario_1_deposit()?;
    scenario_2_collateral_lock()?;
    scenario_3_insufficient_funds()?;
    scenario_4_position_limit()?;
    scenario_5_wash_trade()?;
    scenario_6_market_halt()?;
    scenario_7_settlement()?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,dcm_core=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn new_store() -> (Arc<ManualClock>, Arc<LedgerStore>) {
    let clock = Arc::new(ManualClock::new(Timestamp::now()));
    let store = Arc::new(LedgerStore::new(ComplianceConfig::development(), clock.clone()));
    (clock, store)
}

fn verified_user(store: &LedgerStore, email: &str, funds: Usd) -> Result<UserId, StoreError> {
    let ctx = RequestContext::new("onboarding").with_ip("10.0.0.1");
    let user = store.create_user(email, &ctx)?;
    store.apply_kyc_decision(user.id, true, "identity verified", &ctx)?;
    if funds.is_positive() {
        store.deposit(user.id, funds, Some("ach-sim"), &ctx)?;
    }
    Ok(user.id)
}

fn print_wallet(store: &LedgerStore, user: UserId) -> SimResult {
    let wallet = store.get_wallet(user)?;
    println!("  Wallet: available {}, locked {}", wallet.available, wallet.locked);
    Ok(())
}

/// Deposit into an empty wallet.
fn scenario_1_deposit() -> SimResult {
    println!("Scenario 1: Deposit\n");

    let (_, store) = new_store();
    let alice = verified_user(&store, "alice@example.com", Usd::zero())?;
    print_wallet(&store, alice)?;

    let ctx = RequestContext::new("funding");
    let tx = store.deposit(alice, Usd::new(dec!(100)), Some("ach-0001"), &ctx)?;
    println!("  {}", tx.description);
    print_wallet(&store, alice)?;
    println!("  Transactions on record: {}\n", store.get_transactions(alice, 10).len());
    Ok(())
}

/// A yes order locks exactly q * p cents.
fn scenario_2_collateral_lock() -> SimResult {
    println!("Scenario 2: Collateral Lock\n");

    let (_, store) = new_store();
    let alice = verified_user(&store, "alice@example.com", Usd::new(dec!(100)))?;

    let ctx = RequestContext::new("alice").with_ip("203.0.113.7");
    let order = store.create_order(&OrderRequest::limit(alice, "FED-RATE-MAR", Side::Yes, 50, 60), &ctx)?;
    println!(
        "  Alice buys {} {} @ {}: status {}, collateral {}",
        order.quantity,
        order.side,
        order.price,
        order.status.as_str(),
        order.collateral
    );
    print_wallet(&store, alice)?;
    println!();
    Ok(())
}

/// A second order larger than what's left available.
fn scenario_3_insufficient_funds() -> SimResult {
    println!("Scenario 3: Insufficient Funds\n");

    let (_, store) = new_store();
    let alice = verified_user(&store, "alice@example.com", Usd::new(dec!(100)))?;
    let ctx = RequestContext::new("alice");
    store.create_order(&OrderRequest::limit(alice, "FED-RATE-MAR", Side::Yes, 50, 60), &ctx)?;
    print_wallet(&store, alice)?;

    // 100 contracts of no @ 20 needs 100 * 80 cents
    match store.create_order(&OrderRequest::limit(alice, "FED-RATE-MAR", Side::No, 100, 20), &ctx) {
        Ok(order) => println!("  Unexpectedly accepted order {}", order.id),
        Err(e) => println!("  Second order rejected [{}]: {}", e.code(), e),
    }
    print_wallet(&store, alice)?;
    println!();
    Ok(())
}

/// Exceeding a small position limit raises an alert.
fn scenario_4_position_limit() -> SimResult {
    println!("Scenario 4: Position Limit\n");

    let (_, store) = new_store();
    let bob = verified_user(&store, "bob@example.com", Usd::new(dec!(500)))?;
    let ops = RequestContext::new("risk-desk");
    store.set_position_limit(bob, Usd::new(dec!(100)), &ops)?;
    println!("  Bob's limit set to $100");

    let ctx = RequestContext::new("bob");
    match store.create_order(&OrderRequest::limit(bob, "CPI-ABOVE-3", Side::Yes, 300, 50), &ctx) {
        Ok(order) => println!("  Unexpectedly accepted order {}", order.id),
        Err(e) => println!("  Order rejected [{}]: {}", e.code(), e),
    }
    print_wallet(&store, bob)?;

    for alert in store.registry().alerts(&AlertFilter::default()) {
        println!("  Alert {} ({:?}, {:?}): {}", alert.id, alert.kind, alert.severity, alert.description);
    }
    println!();
    Ok(())
}

/// Opposite sides ten seconds apart.
fn scenario_5_wash_trade() -> SimResult {
    println!("Scenario 5: Wash Trade Detection\n");

    let (clock, store) = new_store();
    let engine = SurveillanceEngine::new(store.clone());
    let carol = verified_user(&store, "carol@example.com", Usd::new(dec!(1000)))?;
    let market = MarketTicker::from("GDP-Q3");

    let ctx = RequestContext::new("carol");
    let check = engine.validate_order(carol, &market, Side::Yes, 20, 45);
    println!("  Pre-trade check passed: {}, margin {}", check.passed, check.required_margin);

    store.create_order(&OrderRequest::limit(carol, "GDP-Q3", Side::Yes, 20, 45), &ctx)?;
    clock.advance(10_000);
    store.create_order(&OrderRequest::limit(carol, "GDP-Q3", Side::No, 20, 55), &ctx)?;

    let alerts = engine.analyze_user_market(carol, &market);
    println!("  Detectors: {}", engine.detector_names().join(", "));
    for alert in &alerts {
        println!("  {:?} / {:?}: {}", alert.kind, alert.severity, alert.description);
    }
    println!("  Market halted by alert: {}\n", engine.is_halted(&market));
    Ok(())
}

/// A market halt blocks only that market.
fn scenario_6_market_halt() -> SimResult {
    println!("Scenario 6: Market Halt\n");

    let (_, store) = new_store();
    let engine = SurveillanceEngine::new(store.clone());
    let dave = verified_user(&store, "dave@example.com", Usd::new(dec!(1000)))?;

    let ops = RequestContext::new("ops");
    let halt = engine.halt("FED-RATE-MAR", "volatility", &ops);
    println!("  Halt {} on {}: {}", halt.id, halt.key, halt.reason);

    let ctx = RequestContext::new("dave");
    match store.create_order(&OrderRequest::limit(dave, "FED-RATE-MAR", Side::Yes, 10, 50), &ctx) {
        Ok(order) => println!("  Unexpectedly accepted order {}", order.id),
        Err(e) => println!("  Halted market [{}]: {}", e.code(), e),
    }
    let order = store.create_order(&OrderRequest::limit(dave, "CPI-ABOVE-3", Side::Yes, 10, 50), &ctx)?;
    println!("  Other market accepted order {} on {}", order.id, order.market);

    engine.resume("FED-RATE-MAR", &ops);
    let order = store.create_order(&OrderRequest::limit(dave, "FED-RATE-MAR", Side::Yes, 10, 50), &ctx)?;
    println!("  After resume, accepted order {}\n", order.id);
    Ok(())
}

/// Fills, marks and settlement at expiry.
fn scenario_7_settlement() -> SimResult {
    println!("Scenario 7: Fill, Mark and Settle\n");

    let clock = Arc::new(ManualClock::new(Timestamp::now()));
    let venue = Arc::new(StaticMarketData::new());
    let store = Arc::new(
        LedgerStore::new(ComplianceConfig::development(), clock.clone()).with_market_data(venue.clone()),
    );
    let market = MarketTicker::from("ELECTION-2028");
    venue.set_quote(&market, MarketQuote::from_cents(40, 42, 41)?);

    let erin = verified_user(&store, "erin@example.com", Usd::new(dec!(500)))?;
    let frank = verified_user(&store, "frank@example.com", Usd::new(dec!(500)))?;
    let ctx = RequestContext::new("venue");

    let yes = store.create_order(&OrderRequest::limit(erin, market.as_str(), Side::Yes, 100, 42), &ctx)?;
    let no = store.create_order(&OrderRequest::limit(frank, market.as_str(), Side::No, 100, 42), &ctx)?;
    for order in [&yes, &no] {
        let fill = FillConfirmation {
            order_id: order.id,
            price_cents: order.price,
            quantity: order.quantity,
        };
        store.apply_fill(&fill, &ctx)?;
    }

    clock.advance(3_600_000);
    venue.set_quote(&market, MarketQuote::from_cents(70, 72, 71)?);
    store.refresh_marks();
    for user in [erin, frank] {
        let summary = store.portfolio_summary(user)?;
        println!(
            "  User {}: value {}, unrealized {}, utilization {}%",
            user, summary.total_value, summary.unrealized_pnl, summary.utilization_pct
        );
    }

    let settlement = store.settle_market(&market, Side::Yes, &RequestContext::new("settlement"))?;
    for result in &settlement.settlements {
        println!(
            "  Settled user {}: payout {}, realized {}",
            result.user_id, result.payout, result.realized_pnl
        );
    }
    print_wallet(&store, erin)?;
    print_wallet(&store, frank)?;

    let report = SurveillanceEngine::new(store.clone()).compliance_report(Timestamp::from_millis(0), clock.now());
    println!(
        "  Report: {} orders, {} fills, volume {}, {} audit entries",
        report.total_orders, report.fills_in_period, report.filled_volume, report.audit_entries_in_period
    );
    Ok(())
}

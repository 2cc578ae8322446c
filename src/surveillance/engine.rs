// 13.0 surveillance/engine.rs: pre-trade checks, pattern analysis and halt control.
// owns no ledger data. everything here reads the store or writes to the registry.

use super::detectors::{default_detectors, PatternDetector};
use super::pretrade::{PreTradeCheck, PreTradeError, PreTradeWarning};
use super::rate_limit::RateLimiter;
use super::report::{self, ComplianceReport};
use crate::margin::{check_limit, required_collateral, utilization_pct, LimitCheck};
use crate::order::Order;
use crate::registry::{ComplianceAlert, ComplianceRegistry, EmergencyHalt, HaltKey};
use crate::store::{LedgerStore, StoreError};
use crate::types::{MarketTicker, PriceCents, RequestContext, Side, Timestamp, UserId, Usd};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a standalone limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionLimitStatus {
    pub allowed: bool,
    pub warning: bool,
    pub exposure: Usd,
    pub new_exposure: Usd,
    pub limit: Usd,
    pub utilization_pct: Decimal,
}

#[derive(Debug)]
pub struct SurveillanceEngine {
    store: Arc<LedgerStore>,
    registry: Arc<ComplianceRegistry>,
    rate_limiter: RateLimiter,
    detectors: Vec<Box<dyn PatternDetector>>,
}

impl SurveillanceEngine {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        let params = &store.config().surveillance;
        let rate_limiter = RateLimiter::new(params.rate_limit_per_user, params.rate_limit_window_ms);
        let detectors = default_detectors(params);
        let registry = store.registry().clone();
        Self {
            store,
            registry,
            rate_limiter,
            detectors,
        }
    }

    pub fn with_detector(mut self, detector: Box<dyn PatternDetector>) -> Self {
        self.detectors.push(detector);
        self
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    // 13.1: advisory pre-trade check. every finding is collected, nothing short
    // circuits and nothing in the ledger changes. the call itself counts toward
    // the user's rate limit
    pub fn validate_order(
        &self,
        user_id: UserId,
        market: &MarketTicker,
        side: Side,
        quantity: u32,
        price_cents: u32,
    ) -> PreTradeCheck {
        let mut check = PreTradeCheck::new();
        let params = &self.store.config().surveillance;

        let rate = self.rate_limiter.check(user_id, self.store.now());
        if !rate.allowed {
            check.fail(PreTradeError::RateLimitExceeded {
                count: rate.count,
                limit: rate.limit,
            });
        }

        let max_quantity = self.store.config().limits.max_order_quantity;
        if quantity == 0 || quantity > max_quantity {
            check.fail(PreTradeError::InvalidQuantity {
                quantity,
                max: max_quantity,
            });
        }
        let price = PriceCents::new(price_cents);
        if price.is_none() {
            check.fail(PreTradeError::InvalidPrice { cents: price_cents });
        }

        if let Some(halt) = self.registry.active_halt_for(market) {
            check.fail(PreTradeError::TradingHalted { reason: halt.reason });
        }
        if let Some(source) = self.store.market_data() {
            let status = source.status(market);
            if !status.accepts_orders() {
                check.fail(PreTradeError::MarketClosed {
                    status: status.to_string(),
                });
            }
        }

        let user = match self.store.get_user(user_id) {
            Ok(user) => Some(user),
            Err(_) => {
                check.fail(PreTradeError::UserNotFound);
                None
            }
        };
        if let Some(user) = &user {
            if user.status.is_blocked() {
                check.fail(PreTradeError::AccountSuspended {
                    status: user.status.to_string(),
                });
            } else if !user.can_trade() {
                check.fail(PreTradeError::KycRequired);
            }
        }

        if let Some(price) = price {
            check.required_margin = required_collateral(side, quantity, price);
        }

        let wallet = match self.store.get_wallet(user_id) {
            Ok(wallet) => Some(wallet),
            Err(_) => {
                if user.is_some() {
                    check.fail(PreTradeError::WalletNotFound);
                }
                None
            }
        };
        if let Some(wallet) = &wallet {
            check.available_margin = wallet.available;
            if check.required_margin > wallet.available {
                check.fail(PreTradeError::InsufficientFunds {
                    required: check.required_margin,
                    available: wallet.available,
                });
            }
        }

        if let (Some(user), Some(wallet)) = (&user, &wallet) {
            match check_limit(
                wallet.locked,
                check.required_margin,
                user.position_limit,
                params.limit_warning_ratio,
            ) {
                LimitCheck::Exceeded => check.fail(PreTradeError::PositionLimit {
                    exposure: wallet.locked,
                    requested: check.required_margin,
                    limit: user.position_limit,
                }),
                LimitCheck::Approaching { utilization } => check.warn(PreTradeWarning::ApproachingLimit {
                    utilization_pct: utilization,
                }),
                LimitCheck::Within => {}
            }
        }

        debug!(
            user_id = %user_id,
            market = %market,
            passed = check.passed,
            errors = check.errors.len(),
            warnings = check.warnings.len(),
            "pre-trade check"
        );
        check
    }

    // 13.2: run every detector over the user's orders. each detector that fires
    // raises exactly one alert
    pub fn analyze_trade_pattern(
        &self,
        user_id: UserId,
        market: &MarketTicker,
        orders: &[Order],
    ) -> Vec<ComplianceAlert> {
        let alerts: Vec<ComplianceAlert> = self
            .detectors
            .iter()
            .filter_map(|detector| {
                let finding = detector.detect(user_id, market, orders)?;
                debug!(detector = detector.name(), user_id = %user_id, market = %market, "pattern detected");
                Some(self.registry.raise_alert(finding))
            })
            .collect();
        if !alerts.is_empty() {
            info!(user_id = %user_id, market = %market, alerts = alerts.len(), "trade pattern analysis raised alerts");
        }
        alerts
    }

    /// Analyze everything the ledger holds for the user in this market.
    pub fn analyze_user_market(&self, user_id: UserId, market: &MarketTicker) -> Vec<ComplianceAlert> {
        let orders = self.store.orders_in_market(user_id, market);
        self.analyze_trade_pattern(user_id, market, &orders)
    }

    /// An empty ticker halts the whole venue.
    pub fn halt(&self, ticker: &str, reason: &str, ctx: &RequestContext) -> EmergencyHalt {
        self.registry.halt(HaltKey::from_ticker(ticker), reason, ctx)
    }

    pub fn resume(&self, ticker: &str, ctx: &RequestContext) -> bool {
        self.registry.resume(HaltKey::from_ticker(ticker), ctx)
    }

    pub fn is_halted(&self, ticker: &MarketTicker) -> bool {
        self.registry.is_halted(ticker)
    }

    pub fn check_position_limit(&self, user_id: UserId, additional: Usd) -> Result<PositionLimitStatus, StoreError> {
        let user = self.store.get_user(user_id)?;
        let exposure = self.store.get_user_exposure(user_id)?;
        let ratio = self.store.config().surveillance.limit_warning_ratio;
        let new_exposure = exposure.add(additional);
        let outcome = check_limit(exposure, additional, user.position_limit, ratio);
        Ok(PositionLimitStatus {
            allowed: outcome != LimitCheck::Exceeded,
            warning: matches!(outcome, LimitCheck::Approaching { .. }),
            exposure,
            new_exposure,
            limit: user.position_limit,
            utilization_pct: utilization_pct(new_exposure, user.position_limit),
        })
    }

    pub fn compliance_report(&self, since: Timestamp, until: Timestamp) -> ComplianceReport {
        let report = report::build(&self.store, since, until);
        info!(
            since = %since,
            until = %until,
            orders = report.orders_in_period,
            alerts = report.alerts_in_period,
            "compliance report generated"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComplianceConfig;
    use crate::registry::{AlertFilter, AlertType};
    use crate::store::OrderRequest;
    use crate::types::ManualClock;
    use rust_decimal_macros::dec;

    const MARKET: &str = "CPI-ABOVE-3";

    fn setup() -> (Arc<ManualClock>, Arc<LedgerStore>, SurveillanceEngine) {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_700_000_000_000)));
        let store = Arc::new(LedgerStore::new(ComplianceConfig::default(), clock.clone()));
        let engine = SurveillanceEngine::new(store.clone());
        (clock, store, engine)
    }

    fn trader(store: &LedgerStore, email: &str, funds: Usd) -> UserId {
        let ctx = RequestContext::new("test");
        let user = store.create_user(email, &ctx).unwrap();
        store.apply_kyc_decision(user.id, true, "documents ok", &ctx).unwrap();
        store.deposit(user.id, funds, Some("ach-1"), &ctx).unwrap();
        user.id
    }

    fn market() -> MarketTicker {
        MarketTicker::from(MARKET)
    }

    #[test]
    fn clean_order_passes() {
        let (_, store, engine) = setup();
        let user = trader(&store, "a@example.com", Usd::new(dec!(1000)));

        let check = engine.validate_order(user, &market(), Side::Yes, 100, 30);
        assert!(check.passed, "{:?}", check.errors);
        assert_eq!(check.required_margin, Usd::new(dec!(30)));
        assert_eq!(check.available_margin, Usd::new(dec!(1000)));
        assert!(check.warnings.is_empty());
    }

    #[test]
    fn findings_accumulate() {
        let (_, store, engine) = setup();
        let ctx = RequestContext::new("test");
        let user = store.create_user("pending@example.com", &ctx).unwrap();
        engine.halt(MARKET, "data error", &ctx);

        let check = engine.validate_order(user.id, &market(), Side::No, 100, 40);
        assert!(!check.passed);
        assert!(check.has_error(|e| matches!(e, PreTradeError::TradingHalted { .. })));
        assert!(check.has_error(|e| matches!(e, PreTradeError::KycRequired)));
        assert!(check.has_error(|e| matches!(e, PreTradeError::InsufficientFunds { .. })));
        assert_eq!(check.required_margin, Usd::new(dec!(60)));
    }

    #[test]
    fn unknown_user_and_bad_shape_are_reported() {
        let (_, _, engine) = setup();
        let check = engine.validate_order(UserId(42), &market(), Side::Yes, 0, 100);
        assert!(check.has_error(|e| matches!(e, PreTradeError::UserNotFound)));
        assert!(check.has_error(|e| matches!(e, PreTradeError::InvalidQuantity { .. })));
        assert!(check.has_error(|e| matches!(e, PreTradeError::InvalidPrice { cents: 100 })));
        assert!(!check.has_error(|e| matches!(e, PreTradeError::WalletNotFound)));
    }

    #[test]
    fn limit_warning_above_ratio_and_error_when_breached() {
        let (_, store, engine) = setup();
        let user = trader(&store, "big@example.com", Usd::new(dec!(50000)));

        // 21 000 of 25 000 is 84%
        let check = engine.validate_order(user, &market(), Side::Yes, 1000, 21);
        assert!(check.passed, "{:?}", check.errors);
        assert_eq!(check.required_margin, Usd::new(dec!(210)));
        assert!(check.warnings.is_empty());

        store
            .lock_funds(user, Usd::new(dec!(20800)), &RequestContext::new("test"))
            .unwrap();
        let check = engine.validate_order(user, &market(), Side::Yes, 1000, 21);
        assert!(check.passed);
        assert_eq!(
            check.warnings,
            vec![PreTradeWarning::ApproachingLimit {
                utilization_pct: dec!(84.04)
            }]
        );

        store
            .lock_funds(user, Usd::new(dec!(4000)), &RequestContext::new("test"))
            .unwrap();
        let check = engine.validate_order(user, &market(), Side::Yes, 1000, 21);
        assert!(check.has_error(|e| matches!(e, PreTradeError::PositionLimit { .. })));
    }

    #[test]
    fn validation_never_mutates() {
        let (_, store, engine) = setup();
        let user = trader(&store, "a@example.com", Usd::new(dec!(100)));
        let audit_len = store.audit().len();

        engine.validate_order(user, &market(), Side::Yes, 1000, 99);
        let wallet = store.get_wallet(user).unwrap();
        assert_eq!(wallet.locked, Usd::zero());
        assert_eq!(store.audit().len(), audit_len);
        assert!(store.registry().alerts(&AlertFilter::default()).is_empty());
    }

    #[test]
    fn rate_limit_applies_to_validation_calls() {
        let (clock, store, engine) = setup();
        let user = trader(&store, "fast@example.com", Usd::new(dec!(1000)));

        for _ in 0..60 {
            assert!(engine.validate_order(user, &market(), Side::Yes, 1, 50).passed);
        }
        let check = engine.validate_order(user, &market(), Side::Yes, 1, 50);
        assert!(check.has_error(|e| matches!(e, PreTradeError::RateLimitExceeded { .. })));

        clock.advance(61_000);
        assert!(engine.validate_order(user, &market(), Side::Yes, 1, 50).passed);
    }

    #[test]
    fn wash_trade_raises_one_alert() {
        let (clock, store, engine) = setup();
        let user = trader(&store, "wash@example.com", Usd::new(dec!(1000)));
        let ctx = RequestContext::new("test");

        store
            .create_order(&OrderRequest::limit(user, MARKET, Side::Yes, 10, 50), &ctx)
            .unwrap();
        clock.advance(30_000);
        store
            .create_order(&OrderRequest::limit(user, MARKET, Side::No, 10, 50), &ctx)
            .unwrap();

        let alerts = engine.analyze_user_market(user, &market());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertType::WashTrade);
        assert_eq!(alerts[0].user_id, Some(user));
        assert_eq!(store.registry().stats().open_alerts, 1);

        // alerts never halt
        assert!(!engine.is_halted(&market()));
    }

    #[test]
    fn pattern_analysis_reads_the_whole_history() {
        let (_, store, engine) = setup();
        let user = trader(&store, "spoof@example.com", Usd::new(dec!(1000)));
        let ctx = RequestContext::new("test");

        for _ in 0..4 {
            let order = store
                .create_order(&OrderRequest::limit(user, "OTHER", Side::Yes, 150, 40), &ctx)
                .unwrap();
            store.cancel_order(order.id, &ctx).unwrap();
        }

        let history = store.all_orders();
        let alerts = engine.analyze_trade_pattern(user, &market(), &history);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertType::Spoofing);
        assert_eq!(alerts[0].market, Some(market()));
    }

    #[test]
    fn halt_and_resume_delegate_to_registry() {
        let (_, _, engine) = setup();
        let ctx = RequestContext::new("ops");
        let halt = engine.halt("", "venue outage", &ctx);
        assert!(halt.key.is_global());
        assert!(engine.is_halted(&market()));
        assert!(!engine.resume(MARKET, &ctx));
        assert!(engine.resume("", &ctx));
        assert!(!engine.is_halted(&market()));
    }

    #[test]
    fn standalone_limit_check() {
        let (_, store, engine) = setup();
        let user = trader(&store, "a@example.com", Usd::new(dec!(30000)));
        store
            .lock_funds(user, Usd::new(dec!(20000)), &RequestContext::new("test"))
            .unwrap();

        let status = engine.check_position_limit(user, Usd::new(dec!(1000))).unwrap();
        assert!(status.allowed);
        assert!(status.warning);
        assert_eq!(status.utilization_pct, dec!(84));

        let status = engine.check_position_limit(user, Usd::new(dec!(5000))).unwrap();
        assert!(status.allowed);

        let status = engine.check_position_limit(user, Usd::new(dec!(5000.01))).unwrap();
        assert!(!status.allowed);

        assert!(matches!(
            engine.check_position_limit(UserId(99), Usd::zero()),
            Err(StoreError::UserNotFound(_))
        ));
    }

    #[test]
    fn report_counts_period_activity() {
        let (clock, store, engine) = setup();
        let start = store.now();
        let user = trader(&store, "r@example.com", Usd::new(dec!(1000)));
        let ctx = RequestContext::new("test");

        let order = store
            .create_order(&OrderRequest::limit(user, MARKET, Side::Yes, 10, 40), &ctx)
            .unwrap();
        clock.advance(1_000);
        store.fill_order(order.id, PriceCents::new(40).unwrap(), &ctx).unwrap();
        engine.halt(MARKET, "review", &ctx);

        let report = engine.compliance_report(start, store.now());
        assert_eq!(report.total_users, 1);
        assert_eq!(report.verified_users, 1);
        assert_eq!(report.orders_in_period, 1);
        assert_eq!(report.fills_in_period, 1);
        assert_eq!(report.filled_volume, Usd::new(dec!(4)));
        assert_eq!(report.halts_in_period, 1);
        assert!(report.audit_entries_in_period >= 5);
        assert_eq!(report.current.halted_markets, 1);

        let later = engine.compliance_report(store.now().plus_millis(1), store.now().plus_millis(10));
        assert_eq!(later.orders_in_period, 0);
        assert_eq!(later.audit_entries_in_period, 0);
    }
}

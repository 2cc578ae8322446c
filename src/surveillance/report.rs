// 15.0: periodic compliance report. a read-only roll up of ledger, registry and
// audit activity inside [since, until].

use crate::audit::AuditQuery;
use crate::order::OrderStatus;
use crate::registry::{AlertFilter, ComplianceStats};
use crate::store::LedgerStore;
use crate::types::{Timestamp, Usd};
use crate::user::UserStatus;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub generated_at: Timestamp,
    pub period_start: Timestamp,
    pub period_end: Timestamp,
    pub total_users: usize,
    pub verified_users: usize,
    pub total_orders: usize,
    pub orders_in_period: usize,
    pub fills_in_period: usize,
    /// Contracts times fill price for orders filled in the period.
    pub filled_volume: Usd,
    pub alerts_in_period: usize,
    pub alerts_by_type: BTreeMap<String, usize>,
    pub halts_in_period: usize,
    pub audit_entries_in_period: usize,
    pub current: ComplianceStats,
}

fn in_period(ts: Timestamp, since: Timestamp, until: Timestamp) -> bool {
    ts >= since && ts <= until
}

pub(super) fn build(store: &LedgerStore, since: Timestamp, until: Timestamp) -> ComplianceReport {
    let users = store.users();
    let verified_users = users.iter().filter(|u| u.status == UserStatus::Verified).count();

    let orders = store.all_orders();
    let orders_in_period = orders.iter().filter(|o| in_period(o.created_at, since, until)).count();
    let fills: Vec<_> = orders
        .iter()
        .filter(|o| o.status == OrderStatus::Filled)
        .filter(|o| o.filled_at.is_some_and(|t| in_period(t, since, until)))
        .collect();
    let filled_volume = fills
        .iter()
        .filter_map(|o| {
            o.filled_price
                .map(|p| p.to_usd().mul(Decimal::from(o.filled_quantity)))
        })
        .sum();

    let registry = store.registry();
    let alerts: Vec<_> = registry
        .alerts(&AlertFilter::default())
        .into_iter()
        .filter(|a| in_period(a.created_at, since, until))
        .collect();
    let mut alerts_by_type = BTreeMap::new();
    for alert in &alerts {
        let key = serde_json::to_value(alert.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        *alerts_by_type.entry(key).or_insert(0) += 1;
    }
    let halts_in_period = registry
        .halt_history()
        .iter()
        .filter(|h| in_period(h.started_at, since, until))
        .count();

    let audit_entries_in_period = store
        .audit()
        .query(&AuditQuery {
            since: Some(since),
            until: Some(until),
            ..AuditQuery::default()
        })
        .len();

    ComplianceReport {
        generated_at: store.now(),
        period_start: since,
        period_end: until,
        total_users: users.len(),
        verified_users,
        total_orders: orders.len(),
        orders_in_period,
        fills_in_period: fills.len(),
        filled_volume,
        alerts_in_period: alerts.len(),
        alerts_by_type,
        halts_in_period,
        audit_entries_in_period,
        current: registry.stats(),
    }
}

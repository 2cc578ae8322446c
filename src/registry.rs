//! Compliance alerts and emergency trading halts.
//!
//! The registry is the single authority on whether trading is allowed. A halt
//! is keyed either by market ticker or by the reserved global key; the two are
//! independent records, so lifting a market halt never lifts a global one and
//! vice versa. Alerts are informational: raising one never halts anything.

use crate::audit::{AuditAction, AuditEvent, AuditTrail};
use crate::types::{AlertId, Clock, HaltId, MarketTicker, RequestContext, Timestamp, UserId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub const GLOBAL_HALT_KEY: &str = "GLOBAL";

/// Scope of an emergency halt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HaltKey {
    Global,
    Market(MarketTicker),
}

impl HaltKey {
    /// An empty ticker means the whole venue.
    pub fn from_ticker(ticker: &str) -> Self {
        if ticker.is_empty() || ticker == GLOBAL_HALT_KEY {
            HaltKey::Global
        } else {
            HaltKey::Market(MarketTicker::new(ticker))
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, HaltKey::Global)
    }
}

impl From<String> for HaltKey {
    fn from(value: String) -> Self {
        HaltKey::from_ticker(&value)
    }
}

impl From<HaltKey> for String {
    fn from(value: HaltKey) -> Self {
        value.to_string()
    }
}

impl From<&MarketTicker> for HaltKey {
    fn from(value: &MarketTicker) -> Self {
        HaltKey::from_ticker(value.as_str())
    }
}

impl fmt::Display for HaltKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltKey::Global => f.write_str(GLOBAL_HALT_KEY),
            HaltKey::Market(ticker) => write!(f, "{ticker}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    PositionLimit,
    WashTrade,
    Spoofing,
    Layering,
    UnusualActivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceAlert {
    pub id: AlertId,
    pub kind: AlertType,
    pub severity: AlertSeverity,
    pub user_id: Option<UserId>,
    pub market: Option<MarketTicker>,
    pub description: String,
    pub status: AlertStatus,
    pub created_at: Timestamp,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
    pub resolved_at: Option<Timestamp>,
}

/// Input for [`ComplianceRegistry::raise_alert`].
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub user_id: Option<UserId>,
    pub market: Option<MarketTicker>,
    pub kind: AlertType,
    pub severity: AlertSeverity,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyHalt {
    pub id: HaltId,
    pub key: HaltKey,
    pub reason: String,
    pub initiated_by: String,
    pub started_at: Timestamp,
    pub ended_at: Option<Timestamp>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub severity: Option<AlertSeverity>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceStats {
    pub open_alerts: usize,
    pub critical_alerts: usize,
    pub halted_markets: usize,
    pub global_halt: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub alerts: Vec<ComplianceAlert>,
    pub halts: Vec<EmergencyHalt>,
}

#[derive(Debug, Default)]
struct HaltBook {
    records: BTreeMap<HaltId, EmergencyHalt>,
    active: HashMap<HaltKey, HaltId>,
}

impl HaltBook {
    fn active_for(&self, key: &HaltKey) -> Option<&EmergencyHalt> {
        self.active.get(key).and_then(|id| self.records.get(id))
    }
}

#[derive(Debug)]
pub struct ComplianceRegistry {
    alerts: RwLock<BTreeMap<AlertId, ComplianceAlert>>,
    halts: RwLock<HaltBook>,
    audit: Arc<AuditTrail>,
    clock: Arc<dyn Clock>,
    next_alert_id: AtomicU64,
    next_halt_id: AtomicU64,
}

impl ComplianceRegistry {
    pub fn new(audit: Arc<AuditTrail>, clock: Arc<dyn Clock>) -> Self {
        Self {
            alerts: RwLock::new(BTreeMap::new()),
            halts: RwLock::new(HaltBook::default()),
            audit,
            clock,
            next_alert_id: AtomicU64::new(1),
            next_halt_id: AtomicU64::new(1),
        }
    }

    // 12.0: upsert. an already active key keeps its id and start time, only reason
    // and initiator change
    pub fn halt(&self, key: HaltKey, reason: &str, ctx: &RequestContext) -> EmergencyHalt {
        let now = self.clock.now();
        let (before, halt) = {
            let mut book = self.halts.write();
            let active_id = book.active.get(&key).copied();
            if let Some(record) = active_id.and_then(|id| book.records.get_mut(&id)) {
                let before = record.clone();
                record.reason = reason.to_string();
                record.initiated_by = ctx.actor.clone();
                (Some(before), record.clone())
            } else {
                let halt = self.new_halt(key.clone(), reason, ctx, now);
                book.active.insert(key.clone(), halt.id);
                book.records.insert(halt.id, halt.clone());
                (None, halt)
            }
        };

        warn!(key = %halt.key, reason, initiated_by = %ctx.actor, "trading halted");

        let mut event = AuditEvent::new(AuditAction::Halt, "emergency_halt", &halt.key)
            .after(&halt)
            .description(format!("Trading halted for {}: {}", halt.key, reason));
        if let Some(before) = &before {
            event = event.before(before);
        }
        self.audit.append(ctx, event);
        halt
    }

    fn new_halt(&self, key: HaltKey, reason: &str, ctx: &RequestContext, now: Timestamp) -> EmergencyHalt {
        EmergencyHalt {
            id: HaltId(self.next_halt_id.fetch_add(1, Ordering::SeqCst)),
            key,
            reason: reason.to_string(),
            initiated_by: ctx.actor.clone(),
            started_at: now,
            ended_at: None,
            is_active: true,
        }
    }

    /// Global halt first, then the market's own record.
    pub fn active_halt_for(&self, ticker: &MarketTicker) -> Option<EmergencyHalt> {
        let book = self.halts.read();
        book.active_for(&HaltKey::Global)
            .or_else(|| book.active_for(&HaltKey::from(ticker)))
            .cloned()
    }

    pub fn is_halted(&self, ticker: &MarketTicker) -> bool {
        self.active_halt_for(ticker).is_some()
    }

    pub fn is_globally_halted(&self) -> bool {
        self.halts.read().active.contains_key(&HaltKey::Global)
    }

    /// Returns false when nothing was active under `key`.
    pub fn resume(&self, key: HaltKey, ctx: &RequestContext) -> bool {
        let now = self.clock.now();
        let lifted = {
            let mut book = self.halts.write();
            match book.active.remove(&key) {
                Some(id) => book.records.get_mut(&id).map(|record| {
                    let before = record.clone();
                    record.is_active = false;
                    record.ended_at = Some(now);
                    (before, record.clone())
                }),
                None => None,
            }
        };

        let Some((before, after)) = lifted else {
            return false;
        };

        info!(key = %key, resumed_by = %ctx.actor, "trading resumed");
        self.audit.append(
            ctx,
            AuditEvent::new(AuditAction::Resume, "emergency_halt", &key)
                .before(&before)
                .after(&after)
                .description(format!("Trading resumed for {key}")),
        );
        true
    }

    pub fn active_halts(&self) -> Vec<EmergencyHalt> {
        let book = self.halts.read();
        book.records.values().filter(|h| h.is_active).cloned().collect()
    }

    pub fn halt_history(&self) -> Vec<EmergencyHalt> {
        self.halts.read().records.values().rev().cloned().collect()
    }

    // 12.1: always succeeds. severity is informational, nothing here halts trading
    pub fn raise_alert(&self, alert: NewAlert) -> ComplianceAlert {
        let record = ComplianceAlert {
            id: AlertId(self.next_alert_id.fetch_add(1, Ordering::SeqCst)),
            kind: alert.kind,
            severity: alert.severity,
            user_id: alert.user_id,
            market: alert.market,
            description: alert.description,
            status: AlertStatus::Open,
            created_at: self.clock.now(),
            resolved_by: None,
            resolution_notes: None,
            resolved_at: None,
        };
        self.alerts.write().insert(record.id, record.clone());

        warn!(
            alert_id = %record.id,
            kind = ?record.kind,
            severity = ?record.severity,
            user_id = ?record.user_id,
            "compliance alert raised"
        );
        self.audit.append(
            &RequestContext::system(),
            AuditEvent::new(AuditAction::Alert, "compliance_alert", record.id)
                .after(&record)
                .description(record.description.clone()),
        );
        record
    }

    /// Resolving an already resolved alert overwrites resolver, notes and time.
    pub fn resolve_alert(
        &self,
        id: AlertId,
        resolved_by: &str,
        notes: &str,
    ) -> Result<ComplianceAlert, RegistryError> {
        let now = self.clock.now();
        let (before, after) = {
            let mut alerts = self.alerts.write();
            let alert = alerts.get_mut(&id).ok_or(RegistryError::AlertNotFound(id))?;
            let before = alert.clone();
            alert.status = AlertStatus::Resolved;
            alert.resolved_by = Some(resolved_by.to_string());
            alert.resolution_notes = Some(notes.to_string());
            alert.resolved_at = Some(now);
            (before, alert.clone())
        };

        info!(alert_id = %id, resolved_by, "compliance alert resolved");
        self.audit.append(
            &RequestContext::new(resolved_by),
            AuditEvent::new(AuditAction::ResolveAlert, "compliance_alert", id)
                .before(&before)
                .after(&after)
                .description(notes.to_string()),
        );
        Ok(after)
    }

    pub fn alert(&self, id: AlertId) -> Option<ComplianceAlert> {
        self.alerts.read().get(&id).cloned()
    }

    pub fn alerts(&self, filter: &AlertFilter) -> Vec<ComplianceAlert> {
        let alerts = self.alerts.read();
        let matching = alerts
            .values()
            .rev()
            .filter(|a| filter.status.map_or(true, |s| a.status == s))
            .filter(|a| filter.severity.map_or(true, |s| a.severity == s))
            .cloned();
        match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    pub fn stats(&self) -> ComplianceStats {
        let (open_alerts, critical_alerts) = {
            let alerts = self.alerts.read();
            let open = alerts.values().filter(|a| a.status == AlertStatus::Open);
            let critical = open.clone().filter(|a| a.severity == AlertSeverity::Critical).count();
            (open.count(), critical)
        };
        let book = self.halts.read();
        ComplianceStats {
            open_alerts,
            critical_alerts,
            halted_markets: book.active.keys().filter(|k| !k.is_global()).count(),
            global_halt: book.active.contains_key(&HaltKey::Global),
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            alerts: self.alerts.read().values().cloned().collect(),
            halts: self.halts.read().records.values().cloned().collect(),
        }
    }

    pub fn restore(&self, snapshot: RegistrySnapshot) {
        let next_alert = snapshot.alerts.iter().map(|a| a.id.0).max().unwrap_or(0) + 1;
        let next_halt = snapshot.halts.iter().map(|h| h.id.0).max().unwrap_or(0) + 1;

        {
            let mut alerts = self.alerts.write();
            *alerts = snapshot.alerts.into_iter().map(|a| (a.id, a)).collect();
        }
        {
            let mut book = self.halts.write();
            book.active = snapshot
                .halts
                .iter()
                .filter(|h| h.is_active)
                .map(|h| (h.key.clone(), h.id))
                .collect();
            book.records = snapshot.halts.into_iter().map(|h| (h.id, h)).collect();
        }
        self.next_alert_id.store(next_alert, Ordering::SeqCst);
        self.next_halt_id.store(next_halt, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Alert not found: {0}")]
    AlertNotFound(AlertId),
}

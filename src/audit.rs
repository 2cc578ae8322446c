// 11.0: every mutating operation produces an audit entry. the trail is append only,
// totally ordered by a sequence id handed out under the append lock, and queryable
// by actor and time window. before/after snapshots are opaque json strings.

use crate::types::{Clock, RequestContext, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    KycDecision,
    Deposit,
    Lock,
    Unlock,
    Trade,
    Fill,
    Cancel,
    Reject,
    Settlement,
    Halt,
    Resume,
    Alert,
    ResolveAlert,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::KycDecision => "kyc_decision",
            AuditAction::Deposit => "deposit",
            AuditAction::Lock => "lock",
            AuditAction::Unlock => "unlock",
            AuditAction::Trade => "trade",
            AuditAction::Fill => "fill",
            AuditAction::Cancel => "cancel",
            AuditAction::Reject => "reject",
            AuditAction::Settlement => "settlement",
            AuditAction::Halt => "halt",
            AuditAction::Resume => "resume",
            AuditAction::Alert => "alert",
            AuditAction::ResolveAlert => "resolve_alert",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub timestamp: Timestamp,
    pub actor: String,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub before: Option<String>,
    pub after: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub description: String,
}

/// What happened, without the who and when. The trail fills those in on append.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    action: AuditAction,
    entity_type: &'static str,
    entity_id: String,
    before: Option<String>,
    after: Option<String>,
    description: String,
}

impl AuditEvent {
    pub fn new(action: AuditAction, entity_type: &'static str, entity_id: impl fmt::Display) -> Self {
        Self {
            action,
            entity_type,
            entity_id: entity_id.to_string(),
            before: None,
            after: None,
            description: String::new(),
        }
    }

    pub fn before<T: Serialize>(mut self, value: &T) -> Self {
        self.before = snapshot(value);
        self
    }

    pub fn after<T: Serialize>(mut self, value: &T) -> Self {
        self.after = snapshot(value);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

fn snapshot<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_string(value).ok()
}

/// Filter for [`AuditTrail::query`]. Results come back most recent first.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub actor: Option<String>,
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(actor) = &self.actor {
            if &entry.actor != actor {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp > until {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Default)]
struct TrailInner {
    entries: Vec<AuditEntry>,
    next_sequence: u64,
}

#[derive(Debug)]
pub struct AuditTrail {
    inner: Mutex<TrailInner>,
    clock: Arc<dyn Clock>,
}

impl AuditTrail {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(TrailInner {
                entries: Vec::new(),
                next_sequence: 1,
            }),
            clock,
        }
    }

    // 11.1: sequence and timestamp are both taken under the lock so insertion order
    // and sequence order always agree
    pub fn append(&self, ctx: &RequestContext, event: AuditEvent) -> u64 {
        let mut inner = self.inner.lock();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.entries.push(AuditEntry {
            sequence,
            timestamp: self.clock.now(),
            actor: ctx.actor.clone(),
            action: event.action,
            entity_type: event.entity_type.to_string(),
            entity_id: event.entity_id,
            before: event.before,
            after: event.after,
            ip: ctx.ip.clone(),
            user_agent: ctx.user_agent.clone(),
            description: event.description,
        });
        sequence
    }

    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEntry> {
        let inner = self.inner.lock();
        let matching = inner.entries.iter().rev().filter(|e| query.matches(e)).cloned();
        match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Entries with a sequence greater than `sequence`, oldest first.
    pub fn entries_after(&self, sequence: u64) -> Vec<AuditEntry> {
        let inner = self.inner.lock();
        let start = inner.entries.partition_point(|e| e.sequence <= sequence);
        inner.entries[start..].to_vec()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_sequence(&self) -> u64 {
        self.inner.lock().next_sequence - 1
    }

    pub fn restore(&self, entries: Vec<AuditEntry>) {
        let mut inner = self.inner.lock();
        inner.next_sequence = entries.iter().map(|e| e.sequence).max().unwrap_or(0) + 1;
        inner.entries = entries;
    }
}

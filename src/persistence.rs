// 16.0 persistence.rs: snapshots and the audit log on local disk.
//
// layout under the data dir:
//   snapshots/snapshot_YYYYMMDD_HHMMSS.json + latest.json
//   audit/audit_YYYY-MM.jsonl     one partition per calendar month, append only
//   archive/                      partitions past retention
//
// every method works from data already copied out of the ledger, so no ledger lock is
// ever held across file I/O. a disabled manager accepts every call and writes nothing.

use crate::audit::{AuditEntry, AuditTrail};
use crate::config::PersistenceParams;
use crate::store::LedgerSnapshot;
use crate::types::Timestamp;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const SNAPSHOT_VERSION: &str = "1";

const SNAPSHOTS: &str = "snapshots";
const AUDIT: &str = "audit";
const ARCHIVE: &str = "archive";
const LATEST: &str = "latest.json";

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(String),
}

/// On-disk snapshot envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub version: String,
    pub saved_at: Timestamp,
    pub ledger: LedgerSnapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceStats {
    pub snapshot_count: usize,
    pub audit_file_count: usize,
    pub archive_count: usize,
    pub total_size_bytes: u64,
    /// Month key of the oldest live audit partition.
    pub oldest_audit: Option<String>,
    pub latest_snapshot: Option<Timestamp>,
}

#[derive(Debug)]
pub struct PersistenceManager {
    root: PathBuf,
    enabled: bool,
    // highest audit sequence already written to disk
    flushed_through: Mutex<u64>,
}

impl PersistenceManager {
    pub fn new(params: &PersistenceParams) -> Result<Self, PersistenceError> {
        if !params.enabled {
            return Ok(Self::disabled());
        }
        Self::open(&params.data_dir)
    }

    pub fn open(root: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let root = root.as_ref().to_path_buf();
        for dir in [SNAPSHOTS, AUDIT, ARCHIVE] {
            fs::create_dir_all(root.join(dir))?;
        }
        info!(data_dir = %root.display(), "persistence enabled");
        Ok(Self {
            root,
            enabled: true,
            flushed_through: Mutex::new(0),
        })
    }

    pub fn disabled() -> Self {
        Self {
            root: PathBuf::new(),
            enabled: false,
            flushed_through: Mutex::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn data_dir(&self) -> &Path {
        &self.root
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    // ===== snapshots =====

    /// Returns the timestamped file written, or `None` when disabled.
    pub fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<Option<PathBuf>, PersistenceError> {
        if !self.enabled {
            return Ok(None);
        }
        let saved_at = snapshot.taken_at.unwrap_or_else(Timestamp::now);
        let envelope = SnapshotFile {
            version: SNAPSHOT_VERSION.to_string(),
            saved_at,
            ledger: snapshot.clone(),
        };
        let json = serde_json::to_vec_pretty(&envelope)?;

        let dir = self.dir(SNAPSHOTS);
        let name = format!("snapshot_{}.json", saved_at.to_datetime().format("%Y%m%d_%H%M%S"));
        let path = dir.join(&name);
        write_atomic(&path, &json)?;
        write_atomic(&dir.join(LATEST), &json)?;

        info!(
            file = %name,
            bytes = json.len(),
            users = snapshot.users.len(),
            orders = snapshot.orders.len(),
            "snapshot saved"
        );
        Ok(Some(path))
    }

    pub fn load_latest_snapshot(&self) -> Result<Option<LedgerSnapshot>, PersistenceError> {
        if !self.enabled {
            return Ok(None);
        }
        let path = self.dir(SNAPSHOTS).join(LATEST);
        if !path.exists() {
            return Ok(None);
        }
        let envelope: SnapshotFile = serde_json::from_slice(&fs::read(&path)?)?;
        if envelope.version != SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedVersion(envelope.version));
        }
        info!(saved_at = %envelope.saved_at, "snapshot loaded");
        Ok(Some(envelope.ledger))
    }

    /// Keep the newest `keep` timestamped snapshots. `latest.json` is never removed.
    pub fn clean_old_snapshots(&self, keep: usize) -> Result<usize, PersistenceError> {
        if !self.enabled {
            return Ok(0);
        }
        let snapshots = list_files(&self.dir(SNAPSHOTS), |name| {
            name.starts_with("snapshot_") && name.ends_with(".json")
        })?;
        // names embed the timestamp, so name order is age order
        let excess = snapshots.len().saturating_sub(keep);
        for path in &snapshots[..excess] {
            fs::remove_file(path)?;
        }
        if excess > 0 {
            info!(removed = excess, kept = keep, "old snapshots removed");
        }
        Ok(excess)
    }

    // ===== audit log =====

    /// Append entries to their monthly partitions. Returns the number written.
    pub fn append_audit(&self, entries: &[AuditEntry]) -> Result<usize, PersistenceError> {
        if !self.enabled || entries.is_empty() {
            return Ok(0);
        }
        let mut by_month: BTreeMap<String, Vec<&AuditEntry>> = BTreeMap::new();
        for entry in entries {
            by_month.entry(entry.timestamp.month_key()).or_default().push(entry);
        }

        for (month, batch) in &by_month {
            let path = self.dir(AUDIT).join(audit_file_name(month));
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            let mut buf = Vec::new();
            for entry in batch {
                serde_json::to_writer(&mut buf, entry)?;
                buf.push(b'\n');
            }
            file.write_all(&buf)?;
            file.flush()?;
            debug!(partition = %month, entries = batch.len(), "audit entries appended");
        }
        Ok(entries.len())
    }

    /// Write every trail entry newer than the last flush.
    pub fn flush_audit(&self, trail: &AuditTrail) -> Result<usize, PersistenceError> {
        if !self.enabled {
            return Ok(0);
        }
        let mut flushed_through = self.flushed_through.lock();
        let pending = trail.entries_after(*flushed_through);
        let Some(last) = pending.last().map(|e| e.sequence) else {
            return Ok(0);
        };
        let written = self.append_audit(&pending)?;
        *flushed_through = last;
        Ok(written)
    }

    /// Treat everything up to `sequence` as already on disk, e.g. after a restore.
    pub fn mark_flushed(&self, sequence: u64) {
        *self.flushed_through.lock() = sequence;
    }

    pub fn flushed_through(&self) -> u64 {
        *self.flushed_through.lock()
    }

    /// Entries in `[since, until]`, oldest first. Only partitions overlapping the
    /// range are read.
    pub fn load_audit_entries(&self, since: Timestamp, until: Timestamp) -> Result<Vec<AuditEntry>, PersistenceError> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        let (first, last) = (since.month_key(), until.month_key());
        let mut entries = Vec::new();
        for path in list_files(&self.dir(AUDIT), is_audit_file)? {
            let Some(month) = partition_month(&path) else {
                continue;
            };
            if month < first.as_str() || month > last.as_str() {
                continue;
            }
            for line in BufReader::new(File::open(&path)?).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let entry: AuditEntry = serde_json::from_str(&line)?;
                if entry.timestamp >= since && entry.timestamp <= until {
                    entries.push(entry);
                }
            }
        }
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    /// Move partitions whose whole month is older than the retention window into
    /// `archive/`. Archived files are kept, never deleted.
    pub fn archive_old_audit_logs(&self, retention_days: i64, now: Timestamp) -> Result<usize, PersistenceError> {
        if !self.enabled {
            return Ok(0);
        }
        let cutoff = now.minus_millis(retention_days * 86_400_000).month_key();
        let mut moved = 0;
        for path in list_files(&self.dir(AUDIT), is_audit_file)? {
            let Some(month) = partition_month(&path) else {
                continue;
            };
            if month >= cutoff.as_str() {
                continue;
            }
            if let Some(name) = path.file_name() {
                fs::rename(&path, self.dir(ARCHIVE).join(name))?;
                info!(partition = %month, "audit partition archived");
                moved += 1;
            }
        }
        Ok(moved)
    }

    pub fn stats(&self) -> Result<PersistenceStats, PersistenceError> {
        if !self.enabled {
            return Ok(PersistenceStats::default());
        }
        let snapshots = list_files(&self.dir(SNAPSHOTS), |name| name.ends_with(".json"))?;
        let audit = list_files(&self.dir(AUDIT), is_audit_file)?;
        let archive = list_files(&self.dir(ARCHIVE), |_| true)?;

        let mut total_size_bytes = 0;
        for path in snapshots.iter().chain(&audit).chain(&archive) {
            total_size_bytes += fs::metadata(path)?.len();
        }

        let timestamped: Vec<&PathBuf> = snapshots
            .iter()
            .filter(|p| p.file_name().is_some_and(|n| n != LATEST))
            .collect();
        let latest_snapshot = timestamped
            .last()
            .and_then(|p| p.file_stem())
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.strip_prefix("snapshot_"))
            .and_then(|stamp| chrono::NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S").ok())
            .map(|dt| Timestamp::from_datetime(dt.and_utc()));

        Ok(PersistenceStats {
            snapshot_count: timestamped.len(),
            audit_file_count: audit.len(),
            archive_count: archive.len(),
            total_size_bytes,
            oldest_audit: audit.first().and_then(|p| partition_month(p)).map(str::to_string),
            latest_snapshot,
        })
    }
}

fn audit_file_name(month: &str) -> String {
    format!("audit_{month}.jsonl")
}

fn is_audit_file(name: &str) -> bool {
    name.starts_with("audit_") && name.ends_with(".jsonl")
}

// "audit_2026-03.jsonl" -> "2026-03"
fn partition_month(path: &Path) -> Option<&str> {
    path.file_name()?
        .to_str()?
        .strip_prefix("audit_")?
        .strip_suffix(".jsonl")
}

/// Regular files in `dir` whose name passes `keep`, sorted by name.
fn list_files(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>, PersistenceError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if path.file_name().and_then(|n| n.to_str()).is_some_and(&keep) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

// write to a sibling temp file then rename over the target
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, AuditEvent};
    use crate::config::ComplianceConfig;
    use crate::store::LedgerStore;
    use crate::types::{Clock, ManualClock, RequestContext, Usd};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use tempfile::tempdir;

    // 2026-03-15T12:00:00Z
    const MARCH: i64 = 1_773_576_000_000;
    const DAY: i64 = 86_400_000;

    fn store_at(ms: i64) -> (Arc<ManualClock>, LedgerStore) {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(ms)));
        let store = LedgerStore::new(ComplianceConfig::default(), clock.clone());
        (clock, store)
    }

    #[test]
    fn disabled_manager_is_a_no_op() {
        let manager = PersistenceManager::disabled();
        let (_, store) = store_at(MARCH);
        assert_eq!(manager.save_snapshot(&store.snapshot()).unwrap(), None);
        assert!(manager.load_latest_snapshot().unwrap().is_none());
        assert_eq!(manager.flush_audit(store.audit()).unwrap(), 0);
        assert_eq!(manager.stats().unwrap(), PersistenceStats::default());

        let mut params = ComplianceConfig::default().persistence;
        params.enabled = false;
        assert!(!PersistenceManager::new(&params).unwrap().is_enabled());
    }

    #[test]
    fn snapshot_round_trip_restores_ledger() {
        let dir = tempdir().unwrap();
        let manager = PersistenceManager::open(dir.path()).unwrap();
        let (_, store) = store_at(MARCH);
        let ctx = RequestContext::new("ops");
        let user = store.create_user("saved@example.com", &ctx).unwrap();
        store.deposit(user.id, Usd::new(dec!(250)), Some("ach-9"), &ctx).unwrap();

        let path = manager.save_snapshot(&store.snapshot()).unwrap().unwrap();
        assert!(path.ends_with("snapshots/snapshot_20260315_120000.json"));
        assert!(dir.path().join("snapshots/latest.json").exists());

        let loaded = manager.load_latest_snapshot().unwrap().unwrap();
        let (_, fresh) = store_at(MARCH);
        fresh.restore(loaded);
        assert_eq!(fresh.get_wallet(user.id).unwrap().available, Usd::new(dec!(250)));
        assert_eq!(fresh.audit().len(), store.audit().len());

        // ids continue after the restored ones
        let next = fresh.create_user("next@example.com", &ctx).unwrap();
        assert!(next.id > user.id);
    }

    #[test]
    fn missing_snapshot_is_none() {
        let dir = tempdir().unwrap();
        let manager = PersistenceManager::open(dir.path()).unwrap();
        assert!(manager.load_latest_snapshot().unwrap().is_none());
    }

    #[test]
    fn audit_partitions_by_month_and_flushes_incrementally() {
        let dir = tempdir().unwrap();
        let manager = PersistenceManager::open(dir.path()).unwrap();
        let (clock, store) = store_at(MARCH);
        let ctx = RequestContext::new("ops");

        store.audit().append(&ctx, AuditEvent::new(AuditAction::Update, "config", 1));
        store.audit().append(&ctx, AuditEvent::new(AuditAction::Update, "config", 2));
        assert_eq!(manager.flush_audit(store.audit()).unwrap(), 2);
        assert_eq!(manager.flush_audit(store.audit()).unwrap(), 0);

        clock.advance(20 * DAY);
        store.audit().append(&ctx, AuditEvent::new(AuditAction::Update, "config", 3));
        assert_eq!(manager.flush_audit(store.audit()).unwrap(), 1);
        assert_eq!(manager.flushed_through(), 3);

        assert!(dir.path().join("audit/audit_2026-03.jsonl").exists());
        assert!(dir.path().join("audit/audit_2026-04.jsonl").exists());

        let all = manager
            .load_audit_entries(Timestamp::from_millis(MARCH - DAY), clock.now())
            .unwrap();
        let sequences: Vec<u64> = all.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, [1, 2, 3]);

        let april_only = manager
            .load_audit_entries(Timestamp::from_millis(MARCH + 10 * DAY), clock.now())
            .unwrap();
        assert_eq!(april_only.len(), 1);
        assert_eq!(april_only[0].entity_id, "3");
    }

    #[test]
    fn old_partitions_move_to_archive() {
        let dir = tempdir().unwrap();
        let manager = PersistenceManager::open(dir.path()).unwrap();
        let (clock, store) = store_at(MARCH);
        let ctx = RequestContext::new("ops");
        store.audit().append(&ctx, AuditEvent::new(AuditAction::Update, "config", 1));
        clock.advance(60 * DAY);
        store.audit().append(&ctx, AuditEvent::new(AuditAction::Update, "config", 2));
        manager.flush_audit(store.audit()).unwrap();

        // 30 days back from mid May is mid April: March goes, May stays
        let moved = manager.archive_old_audit_logs(30, clock.now()).unwrap();
        assert_eq!(moved, 1);
        assert!(dir.path().join("archive/audit_2026-03.jsonl").exists());
        assert!(!dir.path().join("audit/audit_2026-03.jsonl").exists());

        let stats = manager.stats().unwrap();
        assert_eq!(stats.audit_file_count, 1);
        assert_eq!(stats.archive_count, 1);
        assert_eq!(stats.oldest_audit.as_deref(), Some("2026-05"));
        assert!(stats.total_size_bytes > 0);
    }

    #[test]
    fn clean_keeps_newest_snapshots() {
        let dir = tempdir().unwrap();
        let manager = PersistenceManager::open(dir.path()).unwrap();
        let (clock, store) = store_at(MARCH);
        for _ in 0..4 {
            manager.save_snapshot(&store.snapshot()).unwrap();
            clock.advance(DAY);
        }
        assert_eq!(manager.stats().unwrap().snapshot_count, 4);

        assert_eq!(manager.clean_old_snapshots(2).unwrap(), 2);
        let stats = manager.stats().unwrap();
        assert_eq!(stats.snapshot_count, 2);
        assert_eq!(
            stats.latest_snapshot,
            Some(Timestamp::from_millis(MARCH + 3 * DAY))
        );
        assert!(manager.load_latest_snapshot().unwrap().is_some());
    }
}

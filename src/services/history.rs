//! Durable report history.
//!
//! Append-only JSON-lines file holding one record per report attempt. Read
//! in full at the start of each cycle to build the dedup/cooldown index;
//! rewritten in place only to flip the forwarded flag. When the file grows
//! past the configured byte threshold it is reset to empty; past history
//! is sacrificed for boundedness.

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{FirewallEvent, ReportRecord, ReportStatus};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to read history file: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to write history file: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to serialize history record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// JSON-lines backed report history store.
#[derive(Debug, Clone)]
pub struct ReportHistory {
    path: PathBuf,
    max_bytes: u64,
}

impl ReportHistory {
    pub fn new(path: PathBuf, max_bytes: u64) -> Self {
        Self { path, max_bytes }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, resetting the file first if it is oversized.
    pub fn append(&self, record: &ReportRecord) -> Result<(), HistoryError> {
        self.truncate_if_oversized()?;

        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(HistoryError::Write)?;
        file.write_all(line.as_bytes()).map_err(HistoryError::Write)
    }

    /// Read every record. Malformed lines are skipped with a warning so one
    /// bad write cannot poison dedup for the whole store.
    pub fn read_all(&self) -> Result<Vec<ReportRecord>, HistoryError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(HistoryError::Read)?;
        let mut records = Vec::new();
        let mut skipped = 0usize;
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ReportRecord>(line) {
                Ok(record) => records.push(record),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(
                "Skipped {} malformed line(s) in {}",
                skipped,
                self.path.display()
            );
        }
        Ok(records)
    }

    /// Reset the file to empty once it crosses the size threshold.
    pub fn truncate_if_oversized(&self) -> Result<(), HistoryError> {
        let size = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if size > self.max_bytes {
            std::fs::write(&self.path, b"").map_err(HistoryError::Write)?;
            info!(
                "History file exceeded {} bytes and was reset",
                self.max_bytes
            );
        }
        Ok(())
    }

    /// Flip the forwarded flag on every record whose ray id is in `ray_ids`.
    ///
    /// Rewrites the whole file atomically; unparseable lines are dropped in
    /// the process (same policy as `read_all`).
    pub fn mark_forwarded(&self, ray_ids: &HashSet<String>) -> Result<usize, HistoryError> {
        if ray_ids.is_empty() {
            return Ok(0);
        }
        let mut records = self.read_all()?;
        let mut updated = 0usize;
        for record in &mut records {
            if !record.forwarded && ray_ids.contains(&record.ray_id) {
                record.forwarded = true;
                updated += 1;
            }
        }
        if updated == 0 {
            return Ok(0);
        }

        let mut data = String::new();
        for record in &records {
            data.push_str(&serde_json::to_string(record)?);
            data.push('\n');
        }
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(HistoryError::Write)?;
        tmp.write_all(data.as_bytes()).map_err(HistoryError::Write)?;
        tmp.persist(&self.path)
            .map_err(|e| HistoryError::Write(e.error))?;
        Ok(updated)
    }
}

/// Most-recent record per IP and per ray id, for the cooldown gate.
///
/// Built once per cycle from the full history read; latest timestamp wins,
/// with later file position breaking ties.
#[derive(Debug, Default)]
pub struct HistoryIndex {
    by_ip: HashMap<String, (DateTime<Utc>, ReportStatus)>,
    by_ray: HashMap<String, (DateTime<Utc>, ReportStatus)>,
}

impl HistoryIndex {
    pub fn build(records: &[ReportRecord]) -> Self {
        let mut index = Self::default();
        for record in records {
            let slot = (record.timestamp, record.status);
            match index.by_ip.entry(record.ip.clone()) {
                std::collections::hash_map::Entry::Occupied(mut e) => {
                    if record.timestamp >= e.get().0 {
                        e.insert(slot);
                    }
                }
                std::collections::hash_map::Entry::Vacant(e) => {
                    e.insert(slot);
                }
            }
            match index.by_ray.entry(record.ray_id.clone()) {
                std::collections::hash_map::Entry::Occupied(mut e) => {
                    if record.timestamp >= e.get().0 {
                        e.insert(slot);
                    }
                }
                std::collections::hash_map::Entry::Vacant(e) => {
                    e.insert(slot);
                }
            }
        }
        index
    }

    /// Whether the event's IP or ray id was handled within the cooldown
    /// window ending at `now`.
    pub fn recently_handled(
        &self,
        event: &FirewallEvent,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> bool {
        let fresh = |entry: Option<&(DateTime<Utc>, ReportStatus)>| {
            entry.is_some_and(|(ts, status)| status.is_handled() && now - *ts < cooldown)
        };
        fresh(self.by_ip.get(&event.client_ip)) || fresh(self.by_ray.get(&event.ray_id))
    }

    /// IPs whose most recent record is a handled outcome within the window.
    /// Seeds the orchestrator's in-cycle dedup set.
    pub fn recently_handled_ips(&self, now: DateTime<Utc>, cooldown: Duration) -> HashSet<String> {
        self.by_ip
            .iter()
            .filter(|(_, (ts, status))| status.is_handled() && now - *ts < cooldown)
            .map(|(ip, _)| ip.clone())
            .collect()
    }
}

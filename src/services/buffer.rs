//! Bulk report buffer.
//!
//! Staging area for IPs that could not be reported live. Insertion order is
//! preserved so a flush submits oldest first. The buffer is rewritten to
//! disk after every mutation; a crash between an insertion and the next
//! flush therefore never silently drops a queued IP.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// One queued report waiting for a bulk flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedReport {
    pub ip: String,
    pub categories: String,
    pub timestamp: DateTime<Utc>,
    pub comment: String,
}

/// Outcome of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Inserted,
    Duplicate,
    Full,
}

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("failed to read buffer file: {0}")]
    Read(#[source] std::io::Error),
    #[error("buffer file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to write buffer file: {0}")]
    Write(#[source] std::io::Error),
}

/// Insertion-ordered, capacity-capped map from IP to pending report.
#[derive(Debug, Clone)]
pub struct BulkBuffer {
    capacity: usize,
    entries: Vec<BufferedReport>,
    index: HashSet<String>,
}

impl BulkBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::new(),
            index: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.index.contains(ip)
    }

    /// Queue an entry, rejecting duplicates and enforcing the capacity cap.
    pub fn enqueue(&mut self, entry: BufferedReport) -> EnqueueOutcome {
        if self.index.contains(&entry.ip) {
            return EnqueueOutcome::Duplicate;
        }
        if self.entries.len() >= self.capacity {
            return EnqueueOutcome::Full;
        }
        self.index.insert(entry.ip.clone());
        self.entries.push(entry);
        EnqueueOutcome::Inserted
    }

    /// Take every entry out, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<BufferedReport> {
        self.index.clear();
        std::mem::take(&mut self.entries)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferedReport> {
        self.entries.iter()
    }
}

/// Write the buffer to `path` atomically (temp file + rename).
pub fn save_buffer(buffer: &BulkBuffer, path: &Path) -> Result<(), BufferError> {
    let data = serde_json::to_vec_pretty(&buffer.entries)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(BufferError::Write)?;
    tmp.write_all(&data).map_err(BufferError::Write)?;
    tmp.persist(path)
        .map_err(|e| BufferError::Write(e.error))?;
    Ok(())
}

/// Load the buffer from `path`, repopulating the in-memory map.
///
/// A missing file yields an empty buffer. A corrupt file is preserved next
/// to the original (`.corrupt` suffix) and an empty buffer is returned, so
/// queued bytes are never destroyed silently.
pub fn load_buffer(path: &Path, capacity: usize) -> Result<BulkBuffer, BufferError> {
    let mut buffer = BulkBuffer::new(capacity);
    if !path.exists() {
        return Ok(buffer);
    }

    let data = std::fs::read(path).map_err(BufferError::Read)?;
    let entries: Vec<BufferedReport> = match serde_json::from_slice(&data) {
        Ok(entries) => entries,
        Err(err) => {
            let quarantine = path.with_extension("json.corrupt");
            warn!(
                "Buffer file {} is corrupt ({}); moving it to {}",
                path.display(),
                err,
                quarantine.display()
            );
            if let Err(e) = std::fs::rename(path, &quarantine) {
                warn!("Failed to quarantine corrupt buffer file: {}", e);
            }
            return Ok(buffer);
        }
    };

    for entry in entries {
        match buffer.enqueue(entry) {
            EnqueueOutcome::Inserted => {}
            EnqueueOutcome::Duplicate => {}
            EnqueueOutcome::Full => {
                warn!(
                    "Buffer file {} holds more than {} entries; excess dropped",
                    path.display(),
                    capacity
                );
                break;
            }
        }
    }
    if !buffer.is_empty() {
        info!("Loaded {} buffered IPs from {}", buffer.len(), path.display());
    }
    Ok(buffer)
}

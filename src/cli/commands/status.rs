//! Local state inspection. Needs no API keys and makes no requests.

use console::style;

use crate::config::Settings;
use crate::services::{load_buffer, ReportHistory};

pub fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let buffer = load_buffer(&settings.buffer_path(), settings.buffer.capacity)?;
    println!(
        "{} Bulk buffer: {} / {} entries ({})",
        style("•").cyan(),
        buffer.len(),
        buffer.capacity(),
        settings.buffer_path().display()
    );

    let history = ReportHistory::new(settings.history_path(), settings.history.max_bytes);
    let records = history.read_all()?;
    let reported = records
        .iter()
        .filter(|r| r.status == crate::models::ReportStatus::Reported)
        .count();
    let forwarded = records.iter().filter(|r| r.forwarded).count();
    let size = std::fs::metadata(settings.history_path())
        .map(|m| m.len())
        .unwrap_or(0);

    println!(
        "{} History: {} records ({} reported, {} forwarded), {} / {} bytes ({})",
        style("•").cyan(),
        records.len(),
        reported,
        forwarded,
        size,
        settings.history.max_bytes,
        settings.history_path().display()
    );

    if let Some(last) = records.last() {
        println!(
            "{} Last outcome: {} for {} at {}",
            style("•").cyan(),
            last.status,
            last.ip,
            last.timestamp.to_rfc3339()
        );
    }

    Ok(())
}

//! Manual bulk flush.

use console::style;

use super::helpers::build_app;
use crate::config::Settings;

pub async fn cmd_flush(settings: Settings) -> anyhow::Result<()> {
    let mut app = build_app(settings)?;

    let reporter = app.runner.reporter_mut();
    if reporter.buffer().is_empty() {
        println!("{} Bulk buffer is empty; nothing to flush", style("·").dim());
        return Ok(());
    }
    if reporter.state().is_limited() {
        println!(
            "{} Rate limit is active until {}; flushing anyway on request",
            style("!").yellow(),
            reporter.state().reset_at().to_rfc3339()
        );
    }

    let stats = reporter.flush_bulk().await;
    println!(
        "{} Flushed {} entries: {} sent, {} failed",
        style("✓").green(),
        stats.attempted,
        stats.reported,
        stats.failed
    );
    Ok(())
}

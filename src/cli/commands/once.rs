//! Single-cycle invocation.

use console::style;

use super::helpers::{build_app, flush_on_startup};
use crate::config::Settings;

pub async fn cmd_once(settings: Settings) -> anyhow::Result<()> {
    let mut app = build_app(settings)?;

    flush_on_startup(&mut app).await;
    let stats = app.runner.run_cycle().await;

    println!(
        "{} Cycle finished: {} processed, {} reported, {} skipped, {} errors",
        style("✓").green(),
        stats.processed,
        stats.reported,
        stats.skipped,
        stats.errored
    );
    Ok(())
}

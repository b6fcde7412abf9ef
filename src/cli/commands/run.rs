//! Scheduled daemon loop.

use std::time::{Duration, Instant};

use console::style;
use tracing::{info, warn};

use super::helpers::{build_app, flush_on_startup};
use crate::config::Settings;

pub async fn cmd_run(settings: Settings) -> anyhow::Result<()> {
    let mut app = build_app(settings)?;
    let interval = Duration::from_secs(app.settings.cycle.interval_secs);
    let forward_interval = Duration::from_secs(app.settings.forwarder.interval_secs);

    flush_on_startup(&mut app).await;

    println!(
        "{} Scheduler started (interval: {}s). {}",
        style("→").dim(),
        interval.as_secs(),
        if app.settings.cycle.run_on_start {
            "Starting first cycle shortly..."
        } else {
            "Waiting for the first scheduled cycle..."
        }
    );

    let mut last_forward = Instant::now();
    let mut skip_first = !app.settings.cycle.run_on_start;

    loop {
        if skip_first {
            skip_first = false;
        } else {
            // Cycles run to completion before the next sleep begins, so
            // they can never overlap.
            app.runner.run_cycle().await;

            if let Some(forwarder) = &app.forwarder {
                if last_forward.elapsed() >= forward_interval {
                    if let Err(err) = forwarder
                        .forward(app.runner.history(), app.runner.own_ips())
                        .await
                    {
                        warn!("Collector forwarding failed: {}", err);
                    }
                    last_forward = Instant::now();
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received; saving buffer state");
                app.runner.reporter().save_buffer();
                println!("{} Stopped.", style("✓").green());
                break;
            }
        }
    }

    Ok(())
}

//! Shared construction of the runtime context.

use std::time::Duration;

use anyhow::Context;
use chrono::Duration as ChronoDuration;

use crate::clients::{AbuseIpDbClient, CloudflareClient};
use crate::clock::SystemClock;
use crate::config::{Settings, ENV_COLLECTOR_KEY, ENV_SINK_KEY, ENV_SOURCE_KEY};
use crate::services::{
    load_buffer, CycleRunner, CycleSettings, FilterStore, Forwarder, OwnIps, Reporter,
    ReportHistory,
};

/// Everything a command needs to drive cycles.
pub struct App {
    pub settings: Settings,
    pub runner: CycleRunner<CloudflareClient, AbuseIpDbClient, SystemClock>,
    pub forwarder: Option<Forwarder>,
}

/// Build the full runtime context. The only fatal startup conditions live
/// here: an uncreatable data directory and missing secrets.
pub fn build_app(settings: Settings) -> anyhow::Result<App> {
    let data_dir = settings.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let source_key = Settings::env_key(ENV_SOURCE_KEY)?;
    let sink_key = Settings::env_key(ENV_SINK_KEY)?;

    let source_tag = if settings.source.source_tag.is_empty() {
        None
    } else {
        Some(settings.source.source_tag.clone())
    };
    let source = CloudflareClient::new(
        settings.source.api_url.clone(),
        source_key,
        settings.source.zone_id.clone(),
        settings.source.events_limit,
        source_tag,
        Duration::from_secs(settings.source.request_timeout_secs),
    );
    let sink = AbuseIpDbClient::new(
        settings.sink.api_url.clone(),
        sink_key,
        Duration::from_secs(settings.sink.request_timeout_secs),
    );

    let buffer = load_buffer(&settings.buffer_path(), settings.buffer.capacity)
        .context("failed to load bulk buffer")?;
    let mut reporter = Reporter::new(sink, SystemClock, buffer, settings.buffer_path());
    if settings.buffer.force_buffering {
        reporter.force_buffering();
    }

    let history = ReportHistory::new(settings.history_path(), settings.history.max_bytes);
    let filters = FilterStore::new(
        settings.whitelist.rules.clone(),
        settings.whitelist.rules_url.clone(),
    );
    let own_ips = OwnIps::new(
        settings.server.own_ips.clone(),
        settings.server.ip_echo_url.clone(),
    );

    let cycle_settings = CycleSettings {
        categories: settings.report.categories.clone(),
        cooldown: ChronoDuration::seconds(settings.report.cooldown_secs as i64),
        max_url_length: settings.report.max_url_length,
        success_cooldown: Duration::from_millis(settings.cycle.success_cooldown_ms),
    };

    let runner = CycleRunner::new(
        source,
        reporter,
        history,
        filters,
        own_ips,
        SystemClock,
        cycle_settings,
    );

    let forwarder = if settings.forwarder.enabled {
        let key = Settings::env_key(ENV_COLLECTOR_KEY)?;
        Some(Forwarder::new(settings.forwarder.api_url.clone(), key))
    } else {
        None
    };

    Ok(App {
        settings,
        runner,
        forwarder,
    })
}

/// Flush leftovers from a previous run, unless the limit is still active.
pub async fn flush_on_startup(app: &mut App) {
    let reporter = app.runner.reporter_mut();
    if !reporter.buffer().is_empty() && !reporter.state().is_limited() {
        tracing::info!(
            "Found {} IPs in buffer after restart. Sending bulk report...",
            reporter.buffer().len()
        );
        reporter.flush_bulk().await;
    }
}

//! Reporting cycle orchestration.
//!
//! One cycle: fetch events, gate each one (self-traffic, whitelist, path
//! cap, same-cycle dedup, cooldown), drive survivors through the report
//! gate, log every outcome to history, and emit a summary. Errors inside a
//! single event's handling never abort the cycle.

use std::collections::HashSet;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::{error, info, warn};

use crate::clients::{EventSource, ReportSink};
use crate::clock::Clock;
use crate::models::{FirewallEvent, ReportRecord, ReportStatus};
use crate::services::filters::FilterStore;
use crate::services::history::{HistoryIndex, ReportHistory};
use crate::services::reporter::Reporter;
use crate::services::server_ip::OwnIps;

/// Per-cycle tunables taken from the configuration.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    /// Abuse categories submitted with every report.
    pub categories: String,
    /// How long an IP stays ineligible after a handled outcome.
    pub cooldown: Duration,
    /// Paths longer than this are treated as garbage and skipped.
    pub max_url_length: usize,
    /// Pause after each successful live report.
    pub success_cooldown: StdDuration,
}

/// Counters accumulated over one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub processed: usize,
    pub reported: usize,
    pub skipped: usize,
    pub errored: usize,
}

/// Drives full reporting cycles. Owns every piece of mutable state the
/// cycle touches, so cycles are single-writer by construction.
pub struct CycleRunner<E, S, C> {
    source: E,
    reporter: Reporter<S, C>,
    history: ReportHistory,
    filters: FilterStore,
    own_ips: OwnIps,
    clock: C,
    settings: CycleSettings,
    cycle_id: u64,
}

impl<E, S, C> CycleRunner<E, S, C>
where
    E: EventSource,
    S: ReportSink,
    C: Clock + Clone,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: E,
        reporter: Reporter<S, C>,
        history: ReportHistory,
        filters: FilterStore,
        own_ips: OwnIps,
        clock: C,
        settings: CycleSettings,
    ) -> Self {
        Self {
            source,
            reporter,
            history,
            filters,
            own_ips,
            clock,
            settings,
            cycle_id: 0,
        }
    }

    pub fn reporter(&self) -> &Reporter<S, C> {
        &self.reporter
    }

    pub fn reporter_mut(&mut self) -> &mut Reporter<S, C> {
        &mut self.reporter
    }

    pub fn history(&self) -> &ReportHistory {
        &self.history
    }

    pub fn own_ips(&self) -> &OwnIps {
        &self.own_ips
    }

    /// Run one full fetch-filter-report-summarize pass.
    pub async fn run_cycle(&mut self) -> CycleStats {
        self.cycle_id += 1;
        info!(
            "====================== STARTING REPORTING CYCLE #{} ======================",
            self.cycle_id
        );

        self.own_ips.refresh().await;
        let rules = self.filters.current().await;

        let records = match self.history.read_all() {
            Ok(records) => records,
            Err(err) => {
                error!("Failed to read report history: {}", err);
                Vec::new()
            }
        };
        let index = HistoryIndex::build(&records);
        let now = self.clock.now();
        let mut handled: HashSet<String> =
            index.recently_handled_ips(now, self.settings.cooldown);

        let events = match self.source.fetch_events().await {
            Ok(events) => events,
            Err(err) => {
                warn!("Event fetch failed ({}); skipping this cycle", err);
                return CycleStats::default();
            }
        };
        if events.is_empty() {
            info!("No events fetched. Skipping this cycle.");
            return CycleStats::default();
        }

        let mut stats = CycleStats::default();
        for event in &events {
            stats.processed += 1;

            if self.should_skip(event, &rules, &handled, &index) {
                stats.skipped += 1;
                continue;
            }

            let comment = build_comment(event);
            let status = self
                .reporter
                .report(event, &self.settings.categories, &comment)
                .await;

            let record = ReportRecord::from_event(event, status, self.clock.now());
            if let Err(err) = self.history.append(&record) {
                error!("Failed to append report record: {}", err);
            }

            if status.is_handled() {
                handled.insert(event.client_ip.clone());
            }

            match status {
                ReportStatus::Reported => {
                    stats.reported += 1;
                    tokio::time::sleep(self.settings.success_cooldown).await;
                }
                ReportStatus::Failed => stats.errored += 1,
                _ => {}
            }
        }

        info!(
            "Summary » Processed: {}; Reported: {}; Skipped: {}; Errors: {}",
            stats.processed, stats.reported, stats.skipped, stats.errored
        );
        info!(
            "====================== REPORTING CYCLE #{} COMPLETED ======================",
            self.cycle_id
        );
        stats
    }

    fn should_skip(
        &self,
        event: &FirewallEvent,
        rules: &crate::services::filters::WhitelistRules,
        handled: &HashSet<String>,
        index: &HistoryIndex,
    ) -> bool {
        if self.own_ips.contains(&event.client_ip) {
            return true;
        }
        if rules.is_whitelisted(event) {
            return true;
        }
        if event.client_request_path.len() > self.settings.max_url_length {
            return true;
        }
        // Same-cycle duplicates are skipped silently; only the cycle's
        // skipped counter records them.
        if handled.contains(&event.client_ip) {
            return true;
        }
        index.recently_handled(event, self.clock.now(), self.settings.cooldown)
    }
}

/// Human-readable comment for one event, bounded to the report endpoint's
/// 1024-character limit.
pub fn build_comment(event: &FirewallEvent) -> String {
    let comment = format!(
        "L7 DDoS attack detected by WAF. Host: {}; Path: {}; Country: {}; Action: {}; Ray ID: {}",
        event.client_request_host,
        event.client_request_path,
        event.country,
        event.action,
        event.ray_id
    );
    truncate_chars(&comment, 1024)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    use crate::clients::{SourceError, SubmitError};
    use crate::clock::ManualClock;
    use crate::services::buffer::BulkBuffer;
    use crate::services::filters::WhitelistRules;

    struct StaticSource {
        events: Mutex<Vec<Vec<FirewallEvent>>>,
    }

    impl StaticSource {
        fn new(batches: Vec<Vec<FirewallEvent>>) -> Self {
            Self {
                events: Mutex::new(batches),
            }
        }
    }

    #[async_trait]
    impl EventSource for StaticSource {
        async fn fetch_events(&self) -> Result<Vec<FirewallEvent>, SourceError> {
            let mut batches = self.events.lock().unwrap();
            if batches.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(batches.remove(0))
            }
        }
    }

    struct FailingSource;

    #[async_trait]
    impl EventSource for FailingSource {
        async fn fetch_events(&self) -> Result<Vec<FirewallEvent>, SourceError> {
            Err(SourceError::Malformed("missing event list".to_string()))
        }
    }

    struct CountingSink {
        calls: AtomicUsize,
        fail_all: bool,
    }

    impl CountingSink {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_all: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_all: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReportSink for Arc<CountingSink> {
        async fn submit(
            &self,
            _ip: &str,
            _categories: &str,
            _comment: &str,
            _timestamp: DateTime<Utc>,
        ) -> Result<(), SubmitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_all {
                Err(SubmitError::Api {
                    status: 500,
                    message: "boom".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn event(ip: &str, ray: &str, path: &str) -> FirewallEvent {
        FirewallEvent {
            client_ip: ip.to_string(),
            client_request_path: path.to_string(),
            client_request_host: "www.example.com".to_string(),
            user_agent: "BadBot/1.0".to_string(),
            country: "DE".to_string(),
            ray_id: ray.to_string(),
            source: "l7ddos".to_string(),
            action: "block".to_string(),
            datetime: Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap(),
        }
    }

    fn settings() -> CycleSettings {
        CycleSettings {
            categories: "4".to_string(),
            cooldown: Duration::hours(6),
            max_url_length: 256,
            success_cooldown: StdDuration::from_millis(0),
        }
    }

    fn runner<E: EventSource>(
        source: E,
        sink: Arc<CountingSink>,
        dir: &tempfile::TempDir,
        own_ips: Vec<String>,
    ) -> CycleRunner<E, Arc<CountingSink>, ManualClock> {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap());
        let history = ReportHistory::new(dir.path().join("reported_ips.jsonl"), 1024 * 1024);
        let reporter = Reporter::new(
            sink,
            clock.clone(),
            BulkBuffer::new(100),
            dir.path().join("bulk_buffer.json"),
        );
        CycleRunner::new(
            source,
            reporter,
            history,
            FilterStore::new(WhitelistRules::default(), None),
            OwnIps::new(own_ips, None),
            clock,
            settings(),
        )
    }

    #[tokio::test]
    async fn test_reported_event_recorded_and_cooldown_skips_repeat() {
        // Scenario A: success, then the same IP within the cooldown window.
        let dir = tempfile::tempdir().unwrap();
        let sink = CountingSink::ok();
        let batches = vec![
            vec![event("1.2.3.4", "ray1", "/wp-login.php")],
            vec![event("1.2.3.4", "ray2", "/wp-login.php")],
        ];
        let mut runner = runner(StaticSource::new(batches), sink.clone(), &dir, Vec::new());

        let stats = runner.run_cycle().await;
        assert_eq!(stats.reported, 1);
        let records = runner.history().read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ReportStatus::Reported);

        let stats = runner.run_cycle().await;
        assert_eq!(stats.reported, 0);
        assert_eq!(stats.skipped, 1);
        assert_eq!(sink.calls(), 1);
    }

    #[tokio::test]
    async fn test_own_ip_rejected_without_network_call() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CountingSink::ok();
        let batches = vec![vec![event("198.51.100.4", "ray1", "/x")]];
        let mut runner = runner(
            StaticSource::new(batches),
            sink.clone(),
            &dir,
            vec!["198.51.100.4".to_string()],
        );

        let stats = runner.run_cycle().await;
        assert_eq!(stats.skipped, 1);
        assert_eq!(sink.calls(), 0);
        assert!(runner.history().read_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_cycle_duplicate_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CountingSink::ok();
        let batches = vec![vec![
            event("1.2.3.4", "ray1", "/a"),
            event("1.2.3.4", "ray2", "/b"),
        ]];
        let mut runner = runner(StaticSource::new(batches), sink.clone(), &dir, Vec::new());

        let stats = runner.run_cycle().await;
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.reported, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(sink.calls(), 1);
        // The duplicate is skipped silently: one history record only.
        assert_eq!(runner.history().read_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_whitelisted_and_long_paths_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CountingSink::ok();
        let long_path = format!("/{}", "a".repeat(300));
        let batches = vec![vec![
            event("1.1.1.1", "ray1", "/robots.txt"),
            event("2.2.2.2", "ray2", &long_path),
            event("3.3.3.3", "ray3", "/wp-login.php"),
        ]];
        let mut runner = runner(StaticSource::new(batches), sink.clone(), &dir, Vec::new());

        let stats = runner.run_cycle().await;
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.reported, 1);
        assert_eq!(sink.calls(), 1);
    }

    #[tokio::test]
    async fn test_source_failure_skips_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CountingSink::ok();
        let mut runner = runner(FailingSource, sink.clone(), &dir, Vec::new());

        let stats = runner.run_cycle().await;
        assert_eq!(stats, CycleStats::default());
        assert_eq!(sink.calls(), 0);
    }

    #[tokio::test]
    async fn test_event_failures_do_not_abort_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CountingSink::failing();
        let batches = vec![vec![
            event("1.1.1.1", "ray1", "/a"),
            event("2.2.2.2", "ray2", "/b"),
        ]];
        let mut runner = runner(StaticSource::new(batches), sink.clone(), &dir, Vec::new());

        let stats = runner.run_cycle().await;
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.errored, 2);
        assert_eq!(sink.calls(), 2);
        // Failed outcomes are recorded but do not dedup future cycles.
        let records = runner.history().read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status == ReportStatus::Failed));
    }

    #[test]
    fn test_build_comment_is_bounded() {
        let mut event = event("1.2.3.4", "ray1", "/x");
        event.client_request_host = "h".repeat(5000);
        let comment = build_comment(&event);
        assert!(comment.chars().count() <= 1024);
        assert!(comment.starts_with("L7 DDoS attack detected by WAF."));
    }
}

//! Report gate.
//!
//! Routes each IP either to a live submission or into the bulk buffer,
//! depending on the rate-limit state. Also owns the bulk flush: every
//! buffered entry is submitted individually, sequentially, and only after
//! all attempts are exhausted is the buffer cleared and the empty state
//! persisted.

use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::clients::{ReportSink, SubmitError};
use crate::clock::Clock;
use crate::models::{FirewallEvent, ReportStatus};
use crate::ratelimit::{RateLimitState, ResetCheck};
use crate::services::buffer::{save_buffer, BufferedReport, BulkBuffer, EnqueueOutcome};

/// Result of one bulk flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub attempted: usize,
    pub reported: usize,
    pub failed: usize,
}

/// Owns the rate-limit state machine and the bulk buffer.
pub struct Reporter<S, C> {
    sink: S,
    clock: C,
    state: RateLimitState,
    buffer: BulkBuffer,
    buffer_path: PathBuf,
}

impl<S: ReportSink, C: Clock> Reporter<S, C> {
    pub fn new(sink: S, clock: C, buffer: BulkBuffer, buffer_path: PathBuf) -> Self {
        let state = RateLimitState::new(clock.now());
        Self {
            sink,
            clock,
            state,
            buffer,
            buffer_path,
        }
    }

    pub fn state(&self) -> &RateLimitState {
        &self.state
    }

    pub fn buffer(&self) -> &BulkBuffer {
        &self.buffer
    }

    /// Keep buffering even while not rate limited.
    pub fn force_buffering(&mut self) {
        self.state.force_buffering();
    }

    /// Persist the buffer, logging instead of failing: the in-memory state
    /// stays authoritative until the next successful write.
    pub fn save_buffer(&self) {
        if let Err(err) = save_buffer(&self.buffer, &self.buffer_path) {
            error!("Failed to persist bulk buffer: {}", err);
        }
    }

    /// Periodic reset check; flushes the buffer as a side effect when the
    /// limited window just ended and no bulk flush happened inside it.
    pub async fn check_rate_limit(&mut self) {
        let now = self.clock.now();
        match self.state.check_reset(now) {
            ResetCheck::Inactive => {}
            ResetCheck::StillLimited {
                log_due,
                minutes_left,
            } => {
                if log_due {
                    info!(
                        "Rate limit still active. Collected {} IPs. Waiting for reset in {} minute(s) ({})",
                        self.buffer.len(),
                        minutes_left,
                        self.state.reset_at().to_rfc3339()
                    );
                }
            }
            ResetCheck::Cleared { flush_due } => {
                info!(
                    "Rate limit reset. Next reset scheduled at {}",
                    self.state.reset_at().to_rfc3339()
                );
                if flush_due && !self.buffer.is_empty() {
                    self.flush_bulk().await;
                }
            }
        }
    }

    /// Report one IP: reset check, then buffer or live submit.
    pub async fn report(
        &mut self,
        event: &FirewallEvent,
        categories: &str,
        comment: &str,
    ) -> ReportStatus {
        self.check_rate_limit().await;

        if self.state.is_buffering() {
            return self.enqueue(event, categories, comment, false);
        }

        match self
            .sink
            .submit(&event.client_ip, categories, comment, event.datetime)
            .await
        {
            Ok(()) => {
                info!(
                    "Reported {}; URI: {}",
                    event.client_ip, event.client_request_path
                );
                ReportStatus::Reported
            }
            Err(SubmitError::DailyLimit) => {
                if self.state.mark_limited(self.clock.now()) {
                    warn!(
                        "Daily report limit reached. Buffering reports until {}",
                        self.state.reset_at().to_rfc3339()
                    );
                }
                self.enqueue(event, categories, comment, true)
            }
            Err(err) => {
                warn!("Failed to report {}: {}", event.client_ip, err);
                ReportStatus::Failed
            }
        }
    }

    fn enqueue(
        &mut self,
        event: &FirewallEvent,
        categories: &str,
        comment: &str,
        due_to_limit: bool,
    ) -> ReportStatus {
        let entry = BufferedReport {
            ip: event.client_ip.clone(),
            categories: categories.to_string(),
            timestamp: event.datetime,
            comment: comment.to_string(),
        };
        match self.buffer.enqueue(entry) {
            EnqueueOutcome::Inserted => {
                self.save_buffer();
                info!(
                    "Queued {} for bulk report (collected {} IPs)",
                    event.client_ip,
                    self.buffer.len()
                );
                if due_to_limit {
                    ReportStatus::RlBulkReport
                } else {
                    ReportStatus::ReadyForBulkReport
                }
            }
            EnqueueOutcome::Duplicate => ReportStatus::AlreadyInBuffer,
            EnqueueOutcome::Full => {
                warn!(
                    "Bulk buffer is full ({} entries); dropping {}",
                    self.buffer.capacity(),
                    event.client_ip
                );
                ReportStatus::BufferIsFull
            }
        }
    }

    /// Submit every buffered entry sequentially, then clear the buffer and
    /// persist the empty state. A daily-limit error seen mid-flush re-arms
    /// the limited state with a fresh deadline; already-drained entries are
    /// not re-queued.
    pub async fn flush_bulk(&mut self) -> FlushStats {
        if self.buffer.is_empty() {
            return FlushStats::default();
        }

        let entries = self.buffer.drain();
        let mut stats = FlushStats {
            attempted: entries.len(),
            ..Default::default()
        };
        info!("Sending bulk report with {} IPs", stats.attempted);

        let mut relimited = false;
        for entry in &entries {
            match self
                .sink
                .submit(&entry.ip, &entry.categories, &entry.comment, entry.timestamp)
                .await
            {
                Ok(()) => stats.reported += 1,
                Err(SubmitError::DailyLimit) => {
                    stats.failed += 1;
                    relimited = true;
                }
                Err(err) => {
                    stats.failed += 1;
                    warn!("Bulk submit failed for {}: {}", entry.ip, err);
                }
            }
        }

        self.save_buffer();
        if relimited && self.state.mark_limited(self.clock.now()) {
            warn!(
                "Daily report limit hit during bulk flush. Buffering until {}",
                self.state.reset_at().to_rfc3339()
            );
        }
        self.state.mark_bulk_sent();

        info!(
            "Bulk report finished: {} sent, {} failed",
            stats.reported, stats.failed
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use crate::clock::ManualClock;

    /// Scripted sink: pops one planned response per call, then succeeds.
    struct ScriptedSink {
        plan: Mutex<Vec<Result<(), SubmitError>>>,
        calls: AtomicUsize,
        submitted: Mutex<Vec<String>>,
    }

    impl ScriptedSink {
        fn new(plan: Vec<Result<(), SubmitError>>) -> Arc<Self> {
            Arc::new(Self {
                plan: Mutex::new(plan),
                calls: AtomicUsize::new(0),
                submitted: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn submitted(&self) -> Vec<String> {
            self.submitted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReportSink for Arc<ScriptedSink> {
        async fn submit(
            &self,
            ip: &str,
            _categories: &str,
            _comment: &str,
            _timestamp: DateTime<Utc>,
        ) -> Result<(), SubmitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.submitted.lock().unwrap().push(ip.to_string());
            let mut plan = self.plan.lock().unwrap();
            if plan.is_empty() {
                Ok(())
            } else {
                plan.remove(0)
            }
        }
    }

    fn daily_limit() -> Result<(), SubmitError> {
        Err(SubmitError::DailyLimit)
    }

    fn api_error() -> Result<(), SubmitError> {
        Err(SubmitError::Api {
            status: 422,
            message: "invalid ip".to_string(),
        })
    }

    fn event(ip: &str) -> FirewallEvent {
        FirewallEvent {
            client_ip: ip.to_string(),
            client_request_path: "/wp-login.php".to_string(),
            client_request_host: "example.com".to_string(),
            user_agent: "curl".to_string(),
            country: "DE".to_string(),
            ray_id: format!("ray-{ip}"),
            source: "l7ddos".to_string(),
            action: "block".to_string(),
            datetime: Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap(),
        }
    }

    fn reporter_with(
        plan: Vec<Result<(), SubmitError>>,
        capacity: usize,
    ) -> (
        Reporter<Arc<ScriptedSink>, ManualClock>,
        Arc<ScriptedSink>,
        ManualClock,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap());
        let sink = ScriptedSink::new(plan);
        let reporter = Reporter::new(
            sink.clone(),
            clock.clone(),
            BulkBuffer::new(capacity),
            dir.path().join("bulk_buffer.json"),
        );
        (reporter, sink, clock, dir)
    }

    #[tokio::test]
    async fn test_live_success_is_reported() {
        let (mut reporter, sink, _clock, _dir) = reporter_with(vec![Ok(())], 10);
        let status = reporter.report(&event("1.2.3.4"), "4", "seen").await;
        assert_eq!(status, ReportStatus::Reported);
        assert_eq!(sink.calls(), 1);
        assert!(!reporter.state().is_limited());
    }

    #[tokio::test]
    async fn test_non_limit_failure_is_failed_and_not_buffered() {
        let (mut reporter, _sink, _clock, _dir) = reporter_with(vec![api_error()], 10);
        let status = reporter.report(&event("1.2.3.4"), "4", "seen").await;
        assert_eq!(status, ReportStatus::Failed);
        assert!(reporter.buffer().is_empty());
        assert!(!reporter.state().is_limited());
    }

    #[tokio::test]
    async fn test_daily_limit_transitions_and_queues() {
        // Scenario B: first submit hits the daily limit.
        let (mut reporter, sink, _clock, _dir) = reporter_with(vec![daily_limit()], 10);

        let status = reporter.report(&event("1.2.3.4"), "4", "seen").await;
        assert_eq!(status, ReportStatus::RlBulkReport);
        assert!(reporter.state().is_limited());
        assert!(reporter.state().is_buffering());
        assert_eq!(reporter.buffer().len(), 1);

        // Same IP again in the same cycle: already queued, no network call.
        let status = reporter.report(&event("1.2.3.4"), "4", "seen").await;
        assert_eq!(status, ReportStatus::AlreadyInBuffer);
        assert_eq!(sink.calls(), 1);

        // A different IP buffers without touching the sink.
        let status = reporter.report(&event("5.6.7.8"), "4", "seen").await;
        assert_eq!(status, ReportStatus::ReadyForBulkReport);
        assert_eq!(sink.calls(), 1);
        assert_eq!(reporter.buffer().len(), 2);
    }

    #[tokio::test]
    async fn test_limited_state_persists_until_reset() {
        let (mut reporter, _sink, clock, _dir) = reporter_with(vec![daily_limit()], 10);
        reporter.report(&event("1.2.3.4"), "4", "seen").await;
        assert!(reporter.state().is_limited());

        // Repeated checks before the deadline change nothing.
        for _ in 0..3 {
            clock.advance(Duration::minutes(30));
            reporter.check_rate_limit().await;
            assert!(reporter.state().is_limited());
            assert!(reporter.state().is_buffering());
        }
    }

    #[tokio::test]
    async fn test_buffer_full_drops_ip() {
        let (mut reporter, _sink, _clock, _dir) = reporter_with(vec![daily_limit()], 2);
        assert_eq!(
            reporter.report(&event("1.1.1.1"), "4", "c").await,
            ReportStatus::RlBulkReport
        );
        assert_eq!(
            reporter.report(&event("2.2.2.2"), "4", "c").await,
            ReportStatus::ReadyForBulkReport
        );
        assert_eq!(
            reporter.report(&event("3.3.3.3"), "4", "c").await,
            ReportStatus::BufferIsFull
        );
        assert_eq!(reporter.buffer().len(), 2);
    }

    #[tokio::test]
    async fn test_reset_triggers_single_flush() {
        // Scenario C: three buffered IPs, clock crosses the deadline.
        let (mut reporter, sink, clock, _dir) = reporter_with(vec![daily_limit()], 10);
        reporter.report(&event("1.1.1.1"), "4", "c").await;
        reporter.report(&event("2.2.2.2"), "4", "c").await;
        reporter.report(&event("3.3.3.3"), "4", "c").await;
        assert_eq!(reporter.buffer().len(), 3);
        assert_eq!(sink.calls(), 1);

        clock.set(reporter.state().reset_at() + Duration::seconds(1));
        reporter.check_rate_limit().await;

        // One flush: three submissions, buffer now empty, limit cleared.
        assert_eq!(sink.calls(), 4);
        assert!(reporter.buffer().is_empty());
        assert!(!reporter.state().is_limited());
        // The flush is on record until the next limit event.
        assert!(reporter.state().sent_bulk());
        assert_eq!(
            sink.submitted()[1..].to_vec(),
            vec!["1.1.1.1", "2.2.2.2", "3.3.3.3"]
        );

        // Further checks do not flush again.
        clock.advance(Duration::minutes(5));
        reporter.check_rate_limit().await;
        assert_eq!(sink.calls(), 4);
    }

    #[tokio::test]
    async fn test_flush_persists_empty_buffer() {
        let (mut reporter, _sink, clock, dir) = reporter_with(vec![daily_limit()], 10);
        reporter.report(&event("1.1.1.1"), "4", "c").await;

        clock.set(reporter.state().reset_at() + Duration::seconds(1));
        reporter.check_rate_limit().await;

        let loaded =
            crate::services::buffer::load_buffer(&dir.path().join("bulk_buffer.json"), 10).unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_daily_limit_during_flush_rearms_state() {
        let (mut reporter, sink, clock, _dir) = reporter_with(vec![daily_limit()], 10);
        reporter.report(&event("1.1.1.1"), "4", "c").await;
        reporter.report(&event("2.2.2.2"), "4", "c").await;

        // Second entry of the flush hits the limit again.
        {
            let mut plan = sink.plan.lock().unwrap();
            plan.push(Ok(()));
            plan.push(daily_limit());
        }
        clock.set(reporter.state().reset_at() + Duration::seconds(1));
        reporter.check_rate_limit().await;

        assert!(reporter.buffer().is_empty());
        assert!(reporter.state().is_limited());
        assert!(reporter.state().is_buffering());

        // New arrivals buffer again instead of submitting live.
        let status = reporter.report(&event("9.9.9.9"), "4", "c").await;
        assert_eq!(status, ReportStatus::ReadyForBulkReport);
    }

    #[tokio::test]
    async fn test_forced_buffering_queues_without_limit() {
        let (mut reporter, sink, _clock, _dir) = reporter_with(vec![], 10);
        reporter.force_buffering();

        let status = reporter.report(&event("1.2.3.4"), "4", "c").await;
        assert_eq!(status, ReportStatus::ReadyForBulkReport);
        assert_eq!(sink.calls(), 0);
        assert!(!reporter.state().is_limited());
    }
}

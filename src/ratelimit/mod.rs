//! Daily rate-limit state machine.
//!
//! The abuse-report API enforces a hard daily quota that resets at a fixed
//! UTC boundary, not a rolling window. Once a daily-limit response is seen,
//! live submission is gated off and reports are buffered until the next
//! UTC midnight (plus a one-minute safety margin). The deadline is always
//! recomputed fresh when a limit is detected, never extrapolated from the
//! previous one.

use chrono::{DateTime, Days, Duration, TimeZone, Utc};

/// Minimum spacing between "still limited" log lines, in seconds.
pub const RATE_LIMIT_LOG_SECS: i64 = 600;

/// Next UTC midnight + 1 minute after `now`.
pub fn next_utc_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .expect("date overflow");
    let naive = tomorrow.and_hms_opt(0, 1, 0).expect("valid wall time");
    Utc.from_utc_datetime(&naive)
}

/// Result of the periodic reset check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCheck {
    /// Not limited; nothing to do.
    Inactive,
    /// Still inside the limited window.
    StillLimited {
        /// Whether enough time has passed since the last "still waiting"
        /// log line that another one should be emitted.
        log_due: bool,
        minutes_left: i64,
    },
    /// The deadline was crossed; limited and buffering flags are cleared.
    Cleared {
        /// True when no bulk flush has happened this window, so the caller
        /// should flush a non-empty buffer now.
        flush_due: bool,
    },
}

/// Tracks whether the downstream reporting API is currently throttled.
///
/// Owned by the reporter context; mutated only through the methods below.
/// Invariant: `buffering` is true whenever `limited` is true.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    limited: bool,
    buffering: bool,
    sent_bulk: bool,
    reset_at: DateTime<Utc>,
    last_limit_log: Option<DateTime<Utc>>,
}

impl RateLimitState {
    /// Fresh state: not limited, with the next reset precomputed.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            limited: false,
            buffering: false,
            sent_bulk: false,
            reset_at: next_utc_reset(now),
            last_limit_log: None,
        }
    }

    pub fn is_limited(&self) -> bool {
        self.limited
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    pub fn sent_bulk(&self) -> bool {
        self.sent_bulk
    }

    pub fn reset_at(&self) -> DateTime<Utc> {
        self.reset_at
    }

    /// Force buffering without being rate limited. Buffered entries are
    /// flushed by the usual bulk paths.
    pub fn force_buffering(&mut self) {
        self.buffering = true;
    }

    /// Record a daily-limit detection at `now`.
    ///
    /// Idempotent: returns true only on the first detection of the current
    /// window, which is when the deadline is recomputed and the caller
    /// should log the transition.
    pub fn mark_limited(&mut self, now: DateTime<Utc>) -> bool {
        if self.limited {
            return false;
        }
        self.limited = true;
        self.buffering = true;
        self.sent_bulk = false;
        self.reset_at = next_utc_reset(now);
        self.last_limit_log = Some(now);
        true
    }

    /// Record that a bulk flush has been issued this window.
    pub fn mark_bulk_sent(&mut self) {
        self.sent_bulk = true;
    }

    /// Periodic check invoked before every report attempt.
    ///
    /// Crossing the deadline clears `limited` and `buffering`, reports
    /// whether a flush is still owed, recomputes the next deadline, and
    /// rearms `sent_bulk`. Calling again before the deadline has no effect
    /// beyond log pacing.
    pub fn check_reset(&mut self, now: DateTime<Utc>) -> ResetCheck {
        if !self.limited {
            return ResetCheck::Inactive;
        }

        if now >= self.reset_at {
            self.limited = false;
            self.buffering = false;
            let flush_due = !self.sent_bulk;
            self.reset_at = next_utc_reset(now);
            self.sent_bulk = false;
            self.last_limit_log = None;
            return ResetCheck::Cleared { flush_due };
        }

        let log_due = self
            .last_limit_log
            .map_or(true, |last| now - last >= Duration::seconds(RATE_LIMIT_LOG_SECS));
        if log_due {
            self.last_limit_log = Some(now);
        }
        let seconds_left = (self.reset_at - now).num_seconds().max(0);
        ResetCheck::StillLimited {
            log_due,
            minutes_left: (seconds_left + 59) / 60,
        }
    }
}

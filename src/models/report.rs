//! Report outcome models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FirewallEvent;

/// Outcome of handing one IP to the report gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    /// Submitted live and accepted.
    Reported,
    /// Queued into the bulk buffer while buffering was active.
    ReadyForBulkReport,
    /// Queued into the bulk buffer because this very submission hit the
    /// daily rate limit.
    RlBulkReport,
    /// The IP was already waiting in the bulk buffer.
    AlreadyInBuffer,
    /// The bulk buffer is at capacity; the IP was dropped.
    BufferIsFull,
    /// Live submission failed for a reason other than the daily limit.
    Failed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reported => "REPORTED",
            Self::ReadyForBulkReport => "READY_FOR_BULK_REPORT",
            Self::RlBulkReport => "RL_BULK_REPORT",
            Self::AlreadyInBuffer => "ALREADY_IN_BUFFER",
            Self::BufferIsFull => "BUFFER_IS_FULL",
            Self::Failed => "FAILED",
        }
    }

    /// Whether this outcome means the IP has been taken care of, for
    /// cooldown and same-cycle dedup purposes.
    pub fn is_handled(&self) -> bool {
        matches!(
            self,
            Self::Reported | Self::ReadyForBulkReport | Self::RlBulkReport
        )
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One durable entry per report attempt, stored in the history file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    pub timestamp: DateTime<Utc>,
    pub ray_id: String,
    pub ip: String,
    pub country: String,
    pub host: String,
    pub path: String,
    pub user_agent: String,
    pub action: String,
    pub status: ReportStatus,
    /// Whether this entry was forwarded to the secondary collector API.
    #[serde(default)]
    pub forwarded: bool,
}

impl ReportRecord {
    /// Build a record for an event's outcome at `now`.
    pub fn from_event(event: &FirewallEvent, status: ReportStatus, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            ray_id: event.ray_id.clone(),
            ip: event.client_ip.clone(),
            country: event.country.clone(),
            host: event.client_request_host.clone(),
            path: event.client_request_path.clone(),
            user_agent: event.user_agent.clone(),
            action: event.action.to_uppercase(),
            status,
            forwarded: false,
        }
    }
}

//! Firewall event model.
//!
//! Events arrive from the WAF API as loosely-typed JSON; `WireEvent` mirrors
//! that shape with optional fields, and `FirewallEvent` is the validated form
//! the rest of the pipeline works with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw event record as returned by the WAF events API.
///
/// Every field is optional; validation happens when converting to
/// [`FirewallEvent`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WireEvent {
    #[serde(rename = "clientIP")]
    pub client_ip: Option<String>,
    #[serde(rename = "clientRequestPath")]
    pub client_request_path: Option<String>,
    #[serde(rename = "clientRequestHTTPHost")]
    pub client_request_host: Option<String>,
    #[serde(rename = "userAgent")]
    pub user_agent: Option<String>,
    #[serde(rename = "clientCountryName")]
    pub country: Option<String>,
    #[serde(rename = "rayName")]
    pub ray_id: Option<String>,
    pub source: Option<String>,
    pub action: Option<String>,
    pub datetime: Option<DateTime<Utc>>,
}

/// Why a wire event failed validation.
#[derive(Debug, Error)]
pub enum EventValidationError {
    #[error("event is missing a client IP")]
    MissingClientIp,
    #[error("event {ip} is missing a ray id")]
    MissingRayId { ip: String },
}

/// One observed firewall-blocked request, validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallEvent {
    /// Client IP that triggered the rule. Required.
    pub client_ip: String,
    pub client_request_path: String,
    pub client_request_host: String,
    pub user_agent: String,
    pub country: String,
    /// Correlation identifier assigned by the WAF. Required.
    pub ray_id: String,
    /// Classification source tag, e.g. "l7ddos" or "securitylevel".
    pub source: String,
    /// Action the firewall took.
    pub action: String,
    /// When the request was observed.
    pub datetime: DateTime<Utc>,
}

impl TryFrom<WireEvent> for FirewallEvent {
    type Error = EventValidationError;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let client_ip = wire
            .client_ip
            .filter(|ip| !ip.is_empty())
            .ok_or(EventValidationError::MissingClientIp)?;
        let ray_id = wire
            .ray_id
            .filter(|r| !r.is_empty())
            .ok_or_else(|| EventValidationError::MissingRayId {
                ip: client_ip.clone(),
            })?;

        Ok(Self {
            client_ip,
            client_request_path: wire.client_request_path.unwrap_or_default(),
            client_request_host: wire.client_request_host.unwrap_or_default(),
            user_agent: wire.user_agent.unwrap_or_default(),
            country: wire.country.unwrap_or_else(|| "N/A".to_string()),
            ray_id,
            source: wire.source.unwrap_or_default(),
            action: wire.action.unwrap_or_else(|| "N/A".to_string()),
            datetime: wire.datetime.unwrap_or_else(Utc::now),
        })
    }
}

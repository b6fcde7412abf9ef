//! WAF event source adapter.
//!
//! Fetches a batch of recent firewall events from the Cloudflare GraphQL
//! API, validates each record, and optionally narrows the batch to one
//! classification source tag. Any failure is surfaced as a `SourceError`;
//! the orchestrator treats every variant as "no events this cycle".

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{FirewallEvent, WireEvent};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("event source returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("event source request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed event source response: {0}")]
    Malformed(String),
}

/// Event fetch seam; implemented by the real client and by test mocks.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_events(&self) -> Result<Vec<FirewallEvent>, SourceError>;
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<GraphQlData>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GraphQlData {
    viewer: Option<Viewer>,
}

#[derive(Debug, Deserialize)]
struct Viewer {
    #[serde(default)]
    zones: Vec<Zone>,
}

#[derive(Debug, Deserialize)]
struct Zone {
    #[serde(rename = "firewallEventsAdaptive", default)]
    events: Vec<WireEvent>,
}

/// Client for the WAF events GraphQL API.
pub struct CloudflareClient {
    client: reqwest::Client,
    api_url: String,
    api_token: String,
    zone_id: String,
    events_limit: u32,
    source_tag: Option<String>,
}

impl CloudflareClient {
    pub fn new(
        api_url: String,
        api_token: String,
        zone_id: String,
        events_limit: u32,
        source_tag: Option<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(super::USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .expect("failed to create HTTP client");
        Self {
            client,
            api_url,
            api_token,
            zone_id,
            events_limit,
            source_tag,
        }
    }

    fn query(&self) -> serde_json::Value {
        // Last hour of adaptive firewall events, newest first.
        let now = chrono::Utc::now();
        let since = now - chrono::Duration::hours(1);
        json!({
            "query": format!(
                "query {{ viewer {{ zones(filter: {{ zoneTag: \"{}\" }}) {{ \
                 firewallEventsAdaptive(filter: {{ datetime_gt: \"{}\", datetime_leq: \"{}\" }}, \
                 limit: {}, orderBy: [datetime_DESC]) {{ \
                 clientIP clientRequestPath clientRequestHTTPHost userAgent \
                 clientCountryName rayName source action datetime }} }} }} }}",
                self.zone_id,
                since.to_rfc3339(),
                now.to_rfc3339(),
                self.events_limit
            ),
        })
    }
}

#[async_trait]
impl EventSource for CloudflareClient {
    async fn fetch_events(&self) -> Result<Vec<FirewallEvent>, SourceError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_token)
            .json(&self.query())
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SourceError::Http {
                status,
                message: message.chars().take(200).collect(),
            });
        }

        let parsed: GraphQlResponse = response.json().await?;
        let zones = parsed
            .data
            .and_then(|d| d.viewer)
            .map(|v| v.zones)
            .ok_or_else(|| {
                SourceError::Malformed(format!(
                    "missing event list (errors: {})",
                    parsed
                        .errors
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "none".to_string())
                ))
            })?;

        let wire_events: Vec<WireEvent> = zones.into_iter().flat_map(|z| z.events).collect();
        let fetched = wire_events.len();

        let mut events = Vec::with_capacity(fetched);
        let mut invalid = 0usize;
        for wire in wire_events {
            match FirewallEvent::try_from(wire) {
                Ok(event) => {
                    let tag_matches = self
                        .source_tag
                        .as_deref()
                        .map_or(true, |tag| event.source == tag);
                    if tag_matches {
                        events.push(event);
                    }
                }
                Err(err) => {
                    warn!("Dropping invalid event: {}", err);
                    invalid += 1;
                }
            }
        }

        info!(
            "Fetched {} firewall events ({} matching, {} invalid)",
            fetched,
            events.len(),
            invalid
        );
        Ok(events)
    }
}

//! Abuse-report endpoint client.
//!
//! Submits one IP per request. The daily quota is a hard cap that the
//! remote signals with HTTP 429 plus a structured error body; only that
//! combination is treated as quota exhaustion. Short-window 429s and other
//! failures are ordinary errors.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure modes of a live submission.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The daily quota is exhausted; the caller should buffer.
    #[error("daily rate limit exhausted")]
    DailyLimit,
    /// The endpoint rejected the request for another reason.
    #[error("report endpoint returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    /// The request never completed.
    #[error("report request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Live submission seam; implemented by the real client and by test mocks.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn submit(
        &self,
        ip: &str,
        categories: &str,
        comment: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), SubmitError>;
}

#[derive(Serialize)]
struct ReportPayload<'a> {
    ip: &'a str,
    categories: &'a str,
    comment: &'a str,
    timestamp: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    detail: String,
}

/// Whether an error body signals the daily quota rather than a transient
/// limit. Parses the structured `errors[].detail` list instead of substring
/// matching the raw payload.
fn is_daily_limit(body: &str) -> bool {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|parsed| {
            parsed
                .errors
                .iter()
                .any(|e| e.detail.starts_with("Daily rate limit"))
        })
        .unwrap_or(false)
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed
            .errors
            .iter()
            .map(|e| e.detail.as_str())
            .collect::<Vec<_>>()
            .join("; "),
        _ => {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "no response body".to_string()
            } else {
                trimmed.chars().take(200).collect()
            }
        }
    }
}

/// Client for the abuse-report HTTP API.
pub struct AbuseIpDbClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl AbuseIpDbClient {
    pub fn new(api_url: String, api_key: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(super::USER_AGENT)
            .timeout(timeout)
            .build()
            .expect("failed to create HTTP client");
        Self {
            client,
            api_url,
            api_key,
        }
    }
}

#[async_trait]
impl ReportSink for AbuseIpDbClient {
    async fn submit(
        &self,
        ip: &str,
        categories: &str,
        comment: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), SubmitError> {
        let payload = ReportPayload {
            ip,
            categories,
            comment,
            timestamp: timestamp.to_rfc3339(),
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Key", &self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status == 429 && is_daily_limit(&body) {
            return Err(SubmitError::DailyLimit);
        }
        Err(SubmitError::Api {
            status,
            message: error_message(&body),
        })
    }
}

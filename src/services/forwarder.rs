//! Secondary collector forwarding.
//!
//! Periodically ships previously reported IPs to an operator-run collector
//! endpoint. Only `REPORTED` history entries that have not been forwarded
//! yet are eligible; own addresses and obvious crawler traffic are dropped,
//! and entries are deduplicated by IP before sending.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::services::history::ReportHistory;
use crate::services::server_ip::OwnIps;

#[derive(Debug, Serialize)]
struct ForwardedReport<'a> {
    ray_id: &'a str,
    ip: &'a str,
    endpoint: &'a str,
    user_agent: &'a str,
    action: &'a str,
    country: &'a str,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ForwardPayload<'a> {
    reports: Vec<ForwardedReport<'a>>,
}

/// Client for the collector endpoint.
pub struct Forwarder {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    bot_pattern: Regex,
}

impl Forwarder {
    pub fn new(api_url: String, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(crate::clients::USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to create HTTP client");
        let bot_pattern = Regex::new(r"(?i)crawler|spider|bot").expect("valid bot pattern");
        Self {
            client,
            api_url,
            api_key,
            bot_pattern,
        }
    }

    /// Forward eligible history entries. Returns how many were sent.
    pub async fn forward(
        &self,
        history: &ReportHistory,
        own_ips: &OwnIps,
    ) -> anyhow::Result<usize> {
        let records = history.read_all()?;

        let mut seen = HashSet::new();
        let eligible: Vec<_> = records
            .iter()
            .filter(|r| {
                r.status == crate::models::ReportStatus::Reported
                    && !r.forwarded
                    && !own_ips.contains(&r.ip)
                    && !self.bot_pattern.is_match(&r.user_agent)
            })
            .filter(|r| seen.insert(r.ip.clone()))
            .collect();

        if eligible.is_empty() {
            info!("Collector: no new reports to forward");
            return Ok(0);
        }

        let payload = ForwardPayload {
            reports: eligible
                .iter()
                .map(|r| ForwardedReport {
                    ray_id: &r.ray_id,
                    ip: &r.ip,
                    endpoint: &r.path,
                    user_agent: &r.user_agent,
                    action: &r.action,
                    country: &r.country,
                    timestamp: r.timestamp,
                })
                .collect(),
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", &self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Collector rejected forward (HTTP {}): {}",
                status,
                body.chars().take(200).collect::<String>()
            );
            anyhow::bail!("collector returned HTTP {}", status);
        }

        let ray_ids: HashSet<String> = eligible.iter().map(|r| r.ray_id.clone()).collect();
        let updated = history.mark_forwarded(&ray_ids)?;
        info!(
            "Collector: forwarded {} report(s), marked {} history entries",
            eligible.len(),
            updated
        );
        Ok(eligible.len())
    }
}

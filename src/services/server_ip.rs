//! Operator address tracking.
//!
//! The self-traffic guard needs to know the operator's own addresses so the
//! worker never reports itself. Addresses come from config, optionally
//! supplemented each cycle by a public-IP echo endpoint.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, warn};

/// Known addresses of the machine running this worker.
#[derive(Debug, Clone)]
pub struct OwnIps {
    static_ips: Vec<String>,
    echo_url: Option<String>,
    ips: HashSet<String>,
    client: reqwest::Client,
}

impl OwnIps {
    pub fn new(static_ips: Vec<String>, echo_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("failed to create HTTP client");
        let ips = static_ips.iter().cloned().collect();
        Self {
            static_ips,
            echo_url,
            ips,
            client,
        }
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.ips.contains(ip)
    }

    pub fn len(&self) -> usize {
        self.ips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }

    /// Rebuild the set from config plus the echo endpoint. Best-effort: a
    /// failed fetch keeps the previously known addresses.
    pub async fn refresh(&mut self) {
        let Some(url) = self.echo_url.clone() else {
            return;
        };

        match self.fetch_public_ip(&url).await {
            Ok(ip) => {
                let mut ips: HashSet<String> = self.static_ips.iter().cloned().collect();
                ips.insert(ip);
                self.ips = ips;
                debug!("Tracking {} own address(es)", self.ips.len());
            }
            Err(err) => {
                warn!("Failed to fetch public IP from {}: {}", url, err);
            }
        }
    }

    async fn fetch_public_ip(&self, url: &str) -> anyhow::Result<String> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let candidate = body.trim();
        let ip: std::net::IpAddr = candidate
            .parse()
            .map_err(|_| anyhow::anyhow!("echo endpoint returned a non-IP body"))?;
        Ok(ip.to_string())
    }
}

//! Whitelist rules.
//!
//! Decides whether an event is benign traffic that must never be reported.
//! Rules come from the config file (merged over built-in defaults) and can
//! optionally be replaced each cycle by a remote rule set; a failed remote
//! fetch falls back to the local rules.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::FirewallEvent;

/// Pass/reject rule set for fetched events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WhitelistRules {
    /// Host fragments that mark infrastructure traffic (CDN, API, assets).
    pub domains: Vec<String>,
    /// Path fragments of well-known endpoints crawlers hit constantly.
    pub endpoints: Vec<String>,
    /// Static asset extensions.
    pub img_extensions: Vec<String>,
    /// User-agent fragments of tolerated clients.
    pub user_agents: Vec<String>,
}

impl Default for WhitelistRules {
    fn default() -> Self {
        Self {
            domains: vec![
                "api.".into(),
                "cdn.".into(),
                "static.".into(),
                "assets.".into(),
                "media.".into(),
                "auth.".into(),
                "files.".into(),
            ],
            endpoints: vec![
                "favicon.ico".into(),
                "favicon.png".into(),
                "sitemap.xml".into(),
                "robots.txt".into(),
                "ads.txt".into(),
                "security.txt".into(),
                "humans.txt".into(),
                "manifest.json".into(),
                "apple-touch-icon.png".into(),
                "crossdomain.xml".into(),
            ],
            img_extensions: vec![
                ".png".into(),
                ".jpg".into(),
                ".jpeg".into(),
                ".gif".into(),
                ".bmp".into(),
                ".svg".into(),
                ".webp".into(),
            ],
            user_agents: Vec::new(),
        }
    }
}

impl WhitelistRules {
    /// Pure pass/reject decision for one event.
    pub fn is_whitelisted(&self, event: &FirewallEvent) -> bool {
        self.user_agents
            .iter()
            .any(|ua| event.user_agent.contains(ua))
            || self
                .img_extensions
                .iter()
                .any(|ext| event.client_request_path.ends_with(ext.as_str()))
            || self
                .domains
                .iter()
                .any(|domain| event.client_request_host.contains(domain))
            || self
                .endpoints
                .iter()
                .any(|endpoint| event.client_request_path.contains(endpoint))
    }
}

/// Provides the rule set for each cycle, optionally from a remote URL.
#[derive(Debug, Clone)]
pub struct FilterStore {
    local: WhitelistRules,
    rules_url: Option<String>,
    client: reqwest::Client,
}

impl FilterStore {
    pub fn new(local: WhitelistRules, rules_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("failed to create HTTP client");
        Self {
            local,
            rules_url,
            client,
        }
    }

    /// The rule set to use right now. Remote fetch failures fall back to
    /// the local rules with a warning.
    pub async fn current(&self) -> WhitelistRules {
        let Some(url) = &self.rules_url else {
            return self.local.clone();
        };

        match self.fetch_remote(url).await {
            Ok(rules) => {
                debug!("Loaded whitelist rules from {}", url);
                rules
            }
            Err(err) => {
                warn!(
                    "Failed to fetch whitelist rules from {} ({}); using local rules",
                    url, err
                );
                self.local.clone()
            }
        }
    }

    async fn fetch_remote(&self, url: &str) -> Result<WhitelistRules, reqwest::Error> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<WhitelistRules>()
            .await
    }
}

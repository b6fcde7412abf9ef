//! Configuration management for abusewatch.
//!
//! Settings come from an optional TOML file (`abusewatch.toml` next to the
//! working directory by default) with every field defaulted, so a bare
//! binary plus two API keys in the environment is a working deployment.
//! Secrets are never part of the file; they are read from the environment
//! (`.env` supported via dotenvy in `main`).

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::services::WhitelistRules;

/// Environment variable holding the WAF API token.
pub const ENV_SOURCE_KEY: &str = "CLOUDFLARE_API_KEY";
/// Environment variable holding the abuse-report API key.
pub const ENV_SINK_KEY: &str = "ABUSEIPDB_API_KEY";
/// Environment variable holding the collector API key.
pub const ENV_COLLECTOR_KEY: &str = "COLLECTOR_API_KEY";

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_interval_secs() -> u64 {
    300
}

fn default_run_on_start() -> bool {
    true
}

fn default_success_cooldown_ms() -> u64 {
    2000
}

fn default_categories() -> String {
    "4".to_string()
}

fn default_cooldown_secs() -> u64 {
    6 * 60 * 60
}

fn default_max_url_length() -> usize {
    256
}

fn default_buffer_capacity() -> usize {
    100_000
}

fn default_history_max_bytes() -> u64 {
    4 * 1024 * 1024
}

fn default_source_api_url() -> String {
    "https://api.cloudflare.com/client/v4/graphql".to_string()
}

fn default_events_limit() -> u32 {
    1000
}

fn default_source_tag() -> String {
    "l7ddos".to_string()
}

fn default_sink_api_url() -> String {
    "https://api.abuseipdb.com/api/v2/report".to_string()
}

fn default_forwarder_interval_secs() -> u64 {
    1800
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Seconds between scheduled cycles.
    pub interval_secs: u64,
    /// Run the first cycle immediately instead of waiting one interval.
    pub run_on_start: bool,
    /// Pause after each successful live report, in milliseconds.
    pub success_cooldown_ms: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            run_on_start: default_run_on_start(),
            success_cooldown_ms: default_success_cooldown_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Abuse categories submitted with every report.
    pub categories: String,
    /// Minimum seconds before an IP may be reported again.
    pub cooldown_secs: u64,
    /// Request paths longer than this are skipped.
    pub max_url_length: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            cooldown_secs: default_cooldown_secs(),
            max_url_length: default_max_url_length(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum queued IPs before new ones are dropped.
    pub capacity: usize,
    /// Queue into the buffer even when not rate limited.
    pub force_buffering: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_buffer_capacity(),
            force_buffering: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Byte threshold past which the history file is reset.
    pub max_bytes: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_history_max_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub api_url: String,
    /// Zone identifier to query events for.
    pub zone_id: String,
    /// Maximum events fetched per cycle.
    pub events_limit: u32,
    /// Only events with this classification source are considered.
    /// An empty string disables the filter.
    pub source_tag: String,
    pub request_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_url: default_source_api_url(),
            zone_id: String::new(),
            events_limit: default_events_limit(),
            source_tag: default_source_tag(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub api_url: String,
    pub request_timeout_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            api_url: default_sink_api_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Operator addresses that must never be reported.
    pub own_ips: Vec<String>,
    /// Optional endpoint returning this machine's public IP as plain text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_echo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    pub enabled: bool,
    pub api_url: String,
    pub interval_secs: u64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: String::new(),
            interval_secs: default_forwarder_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhitelistConfig {
    #[serde(flatten)]
    pub rules: WhitelistRules,
    /// Optional URL serving a replacement rule set each cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_url: Option<String>,
}

impl Default for WhitelistConfig {
    fn default() -> Self {
        Self {
            rules: WhitelistRules::default(),
            rules_url: None,
        }
    }
}

/// Root settings structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory for the buffer and history files. Shell-expanded.
    pub data_dir: String,
    pub cycle: CycleConfig,
    pub report: ReportConfig,
    pub buffer: BufferConfig,
    pub history: HistoryConfig,
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub whitelist: WhitelistConfig,
    pub server: ServerConfig,
    pub forwarder: ForwarderConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cycle: CycleConfig::default(),
            report: ReportConfig::default(),
            buffer: BufferConfig::default(),
            history: HistoryConfig::default(),
            source: SourceConfig::default(),
            sink: SinkConfig::default(),
            whitelist: WhitelistConfig::default(),
            server: ServerConfig::default(),
            forwarder: ForwarderConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from `abusewatch.toml` in the working
    /// directory; defaults apply if no file exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let candidate = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("abusewatch.toml"));

        let settings = if candidate.exists() {
            let content = std::fs::read_to_string(&candidate)
                .with_context(|| format!("failed to read {}", candidate.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", candidate.display()))?
        } else if path.is_some() {
            anyhow::bail!("config file {} does not exist", candidate.display());
        } else {
            Self::default()
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.source.api_url).context("source.api_url is not a valid URL")?;
        url::Url::parse(&self.sink.api_url).context("sink.api_url is not a valid URL")?;
        if self.forwarder.enabled {
            url::Url::parse(&self.forwarder.api_url)
                .context("forwarder.api_url is not a valid URL")?;
        }
        if let Some(rules_url) = &self.whitelist.rules_url {
            url::Url::parse(rules_url).context("whitelist.rules_url is not a valid URL")?;
        }
        if self.buffer.capacity == 0 {
            anyhow::bail!("buffer.capacity must be at least 1");
        }
        Ok(())
    }

    /// Data directory with `~` and environment variables expanded.
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::full(&self.data_dir).map_or_else(
            |_| self.data_dir.clone(),
            |expanded| expanded.into_owned(),
        ))
    }

    pub fn buffer_path(&self) -> PathBuf {
        self.data_dir().join("bulk_buffer.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir().join("reported_ips.jsonl")
    }

    /// Read a required secret from the environment.
    pub fn env_key(name: &str) -> anyhow::Result<String> {
        std::env::var(name)
            .with_context(|| format!("environment variable {name} is not set"))
            .and_then(|v| {
                if v.trim().is_empty() {
                    anyhow::bail!("environment variable {name} is empty")
                } else {
                    Ok(v)
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().expect("default settings validate");
        assert_eq!(settings.cycle.interval_secs, 300);
        assert_eq!(settings.buffer.capacity, 100_000);
        assert_eq!(settings.report.cooldown_secs, 21_600);
        assert_eq!(settings.source.source_tag, "l7ddos");
    }

    #[test]
    fn test_partial_toml_overrides_defaults() {
        let toml = r#"
            data_dir = "/var/lib/abusewatch"

            [cycle]
            interval_secs = 60
            run_on_start = false

            [buffer]
            capacity = 500

            [whitelist]
            endpoints = ["/healthz"]
        "#;
        let settings: Settings = toml::from_str(toml).expect("parse");
        assert_eq!(settings.cycle.interval_secs, 60);
        assert!(!settings.cycle.run_on_start);
        assert_eq!(settings.buffer.capacity, 500);
        assert_eq!(settings.whitelist.rules.endpoints, vec!["/healthz"]);
        // Untouched sections keep their defaults.
        assert_eq!(settings.report.max_url_length, 256);
        assert_eq!(settings.history.max_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_urls_rejected() {
        let mut settings = Settings::default();
        settings.sink.api_url = "not a url".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut settings = Settings::default();
        settings.buffer.capacity = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_paths_derive_from_data_dir() {
        let settings = Settings {
            data_dir: "/tmp/aw".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.buffer_path(), PathBuf::from("/tmp/aw/bulk_buffer.json"));
        assert_eq!(
            settings.history_path(),
            PathBuf::from("/tmp/aw/reported_ips.jsonl")
        );
    }

    #[test]
    fn test_settings_round_trip_through_toml() {
        let settings = Settings::default();
        let serialized = toml::to_string_pretty(&settings).expect("serialize");
        let back: Settings = toml::from_str(&serialized).expect("parse");
        assert_eq!(back.cycle.interval_secs, settings.cycle.interval_secs);
        assert_eq!(back.whitelist.rules, settings.whitelist.rules);
    }
}

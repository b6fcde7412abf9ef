//! HTTP clients for the external collaborators.

mod abuseipdb;
mod cloudflare;

pub use abuseipdb::{AbuseIpDbClient, ReportSink, SubmitError};
pub use cloudflare::{CloudflareClient, EventSource, SourceError};

/// User agent sent on every outbound request.
pub const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; abusewatch/",
    env!("CARGO_PKG_VERSION"),
    "; +https://github.com/monokrome/abusewatch)"
);

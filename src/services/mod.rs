//! Core services: buffering, history, the report gate, and the cycle
//! orchestrator.

pub mod buffer;
pub mod cycle;
pub mod filters;
pub mod forwarder;
pub mod history;
pub mod reporter;
pub mod server_ip;

pub use buffer::{load_buffer, save_buffer, BufferedReport, BulkBuffer, EnqueueOutcome};
pub use cycle::{build_comment, CycleRunner, CycleSettings, CycleStats};
pub use filters::{FilterStore, WhitelistRules};
pub use forwarder::Forwarder;
pub use history::{HistoryIndex, ReportHistory};
pub use reporter::{FlushStats, Reporter};
pub use server_ip::OwnIps;

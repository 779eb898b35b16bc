pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod provider;
pub mod slot_semaphore;
pub mod stats;
pub mod task_registry;
pub mod traits;
pub mod util;

#[cfg(test)]
mod testutil;

pub use cache::{MemoryCache, NoCache, canonical_json, query_fingerprint};
pub use config::ProviderConfig;
pub use error::AppError;
pub use models::{CallStats, CrawlRequest, ExtractedData, HtmlPage, Output, OutputKind, PageType, Query};
pub use provider::ExtractionProvider;
pub use slot_semaphore::SlotSemaphore;
pub use stats::{LatencySummary, StatsCollector};
pub use task_registry::{ShutdownSignal, TaskRegistry};
pub use traits::{CrawlControl, ExtractionTransport, NoCrawl, ResponseCache};

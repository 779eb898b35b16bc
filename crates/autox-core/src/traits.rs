use std::future::Future;

use serde_json::Value;

use crate::error::AppError;
use crate::models::{CallStats, Query};

/// Sends queries to the extraction API.
///
/// Returns one payload per query, in order. A payload is either the
/// extracted data or an object carrying an `error` field. Retries of
/// query-level errors, if any, happen inside the transport.
pub trait ExtractionTransport: Send + Sync {
    fn request_raw(
        &self,
        queries: &[Value],
        stats: &mut CallStats,
    ) -> impl Future<Output = Result<Vec<Value>, AppError>> + Send;
}

/// Stores API payloads by query fingerprint.
pub trait ResponseCache: Send + Sync {
    /// Deterministic cache key for a query.
    fn fingerprint(&self, query: &Query) -> String;

    /// A cache miss is `Ok(None)`, not an error.
    fn get(
        &self,
        fingerprint: &str,
    ) -> impl Future<Output = Result<Option<Value>, AppError>> + Send;

    fn set(
        &self,
        fingerprint: &str,
        value: &Value,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Flush and release resources. Closing twice is a no-op.
    fn close(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// The crawler driving the extraction.
pub trait CrawlControl: Send + Sync {
    /// Ask the crawler to stop. Best effort; the crawler decides how.
    fn close_spider(&self, reason: &str);
}

/// A CrawlControl for callers that have nothing to stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCrawl;

impl CrawlControl for NoCrawl {
    fn close_spider(&self, reason: &str) {
        tracing::warn!(%reason, "Crawl stop requested, but no crawler is attached");
    }
}

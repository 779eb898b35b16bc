//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use crate::cache::query_fingerprint;
use crate::error::AppError;
use crate::models::{CallStats, Query};
use crate::traits::{CrawlControl, ExtractionTransport, ResponseCache};

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// Mock transport that replays queued responses.
///
/// When the queue is empty it answers every query with
/// `{"<pageType>": {"url": <url>}}`, plus an `html` field when the query
/// asked for full HTML.
#[derive(Clone)]
pub struct MockTransport {
    responses: Arc<Mutex<VecDeque<Result<Vec<Value>, AppError>>>>,
    calls: Arc<Mutex<Vec<Vec<Value>>>>,
    attempts_per_call: u64,
    billable_per_call: Option<u64>,
    delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            attempts_per_call: 1,
            billable_per_call: None,
            delay: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_responses(responses: Vec<Result<Vec<Value>, AppError>>) -> Self {
        let transport = Self::new();
        transport.responses.lock().unwrap().extend(responses);
        transport
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    /// Report these counters for every call instead of one attempt and
    /// one billable response per successful result.
    pub fn with_call_stats(mut self, attempts: u64, billable: u64) -> Self {
        self.attempts_per_call = attempts;
        self.billable_per_call = Some(billable);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Query batches received, in call order.
    pub fn calls(&self) -> Vec<Vec<Value>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of calls that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn echo_payload(query: &Value) -> Value {
    let page_type = query["pageType"].as_str().unwrap_or("product");
    let mut payload = serde_json::Map::new();
    payload.insert(page_type.to_string(), json!({ "url": query["url"] }));
    if query.get("fullHtml") == Some(&Value::Bool(true)) {
        payload.insert("html".into(), json!("<html>mock</html>"));
    }
    Value::Object(payload)
}

impl ExtractionTransport for MockTransport {
    async fn request_raw(
        &self,
        queries: &[Value],
        stats: &mut CallStats,
    ) -> Result<Vec<Value>, AppError> {
        self.calls.lock().unwrap().push(queries.to_vec());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        stats.n_attempts += self.attempts_per_call;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self.responses.lock().unwrap().pop_front();
        let result = queued.unwrap_or_else(|| Ok(queries.iter().map(echo_payload).collect()));
        if let Ok(results) = &result {
            stats.n_billable_query_responses += self.billable_per_call.unwrap_or_else(|| {
                results.iter().filter(|r| r.get("error").is_none()).count() as u64
            });
        }
        result
    }
}

// ---------------------------------------------------------------------------
// MockCrawlControl
// ---------------------------------------------------------------------------

/// Records every stop request.
#[derive(Clone, Default)]
pub struct MockCrawlControl {
    reasons: Arc<Mutex<Vec<String>>>,
}

impl MockCrawlControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().unwrap().clone()
    }
}

impl CrawlControl for MockCrawlControl {
    fn close_spider(&self, reason: &str) {
        self.reasons.lock().unwrap().push(reason.to_string());
    }
}

// ---------------------------------------------------------------------------
// RecordingCache
// ---------------------------------------------------------------------------

/// In-memory cache that records writes and can be told to fail lookups.
#[derive(Clone, Default)]
pub struct RecordingCache {
    entries: Arc<Mutex<HashMap<String, Value>>>,
    writes: Arc<Mutex<Vec<String>>>,
    lookups: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    fail_lookups: bool,
    keyed_by_url: bool,
}

impl RecordingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_lookups: true,
            ..Self::default()
        }
    }

    /// Fingerprint on the URL only, like a shared remote collection.
    pub fn keyed_by_url() -> Self {
        Self {
            keyed_by_url: true,
            ..Self::default()
        }
    }

    /// Fingerprints written, in write order.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stored(&self, fingerprint: &str) -> Option<Value> {
        self.entries.lock().unwrap().get(fingerprint).cloned()
    }
}

impl ResponseCache for RecordingCache {
    fn fingerprint(&self, query: &Query) -> String {
        if self.keyed_by_url {
            query.url.clone()
        } else {
            query_fingerprint(query)
        }
    }

    async fn get(&self, fingerprint: &str) -> Result<Option<Value>, AppError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookups {
            return Err(AppError::CacheError("lookup failed".into()));
        }
        Ok(self.entries.lock().unwrap().get(fingerprint).cloned())
    }

    async fn set(&self, fingerprint: &str, value: &Value) -> Result<(), AppError> {
        self.writes.lock().unwrap().push(fingerprint.to_string());
        self.entries
            .lock()
            .unwrap()
            .insert(fingerprint.to_string(), value.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

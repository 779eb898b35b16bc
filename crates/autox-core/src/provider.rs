//! Extraction orchestration.
//!
//! [`ExtractionProvider`] turns a crawl request plus the outputs a caller
//! wants into the smallest set of API queries, runs each one through the
//! cache, the per-domain [`SlotSemaphore`] and the [`TaskRegistry`], and
//! maps the raw payloads back to typed [`Output`]s.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures::future::join_all;
use serde_json::Value;

use crate::config::ProviderConfig;
use crate::error::AppError;
use crate::models::{CallStats, CrawlRequest, ExtractedData, HtmlPage, Output, OutputKind, PageType, Query};
use crate::slot_semaphore::SlotSemaphore;
use crate::stats::StatsCollector;
use crate::task_registry::TaskRegistry;
use crate::traits::{CrawlControl, ExtractionTransport, ResponseCache};
use crate::util::partition_key;

const STATS_PREFIX: &str = "autox";

/// Reason given to the crawler when the API account is disabled.
pub const ACCOUNT_DISABLED_REASON: &str = "account_disabled";

/// Payloads carrying a non-null `error` field are query-level failures.
fn error_marker(payload: &Value) -> Option<&Value> {
    payload.get("error").filter(|e| !e.is_null())
}

/// The error of a failed query, ignoring errors `config` accepts as results.
fn query_error<'a>(payload: &'a Value, config: &ProviderConfig) -> Option<&'a Value> {
    error_marker(payload).filter(|error| {
        !error
            .as_str()
            .is_some_and(|message| config.is_allowed_response_error(message))
    })
}

/// Whether a cached payload can answer `query`.
///
/// Caches keyed on the URL alone may hold a payload for another page
/// type, or one fetched without the full HTML.
fn answers_query(payload: &Value, query: &Query, with_html: bool) -> bool {
    if with_html && !payload.get("html").is_some_and(Value::is_string) {
        return false;
    }
    payload.get(query.page_type.as_str()).is_some() || error_marker(payload).is_some()
}

/// Orchestrates extraction requests against the API.
pub struct ExtractionProvider<T, C, S> {
    transport: T,
    cache: C,
    crawl: S,
    tasks: TaskRegistry,
    slots: SlotSemaphore<String>,
    stats: Arc<StatsCollector>,
    config: ProviderConfig,
    crawl_stopped: AtomicBool,
}

impl<T, C, S> ExtractionProvider<T, C, S>
where
    T: ExtractionTransport,
    C: ResponseCache,
    S: CrawlControl,
{
    /// Fails when `config.slot_concurrency` is zero.
    pub fn new(transport: T, cache: C, crawl: S, config: ProviderConfig) -> Result<Self, AppError> {
        let slots = SlotSemaphore::new(config.slot_concurrency)?;
        Ok(Self {
            transport,
            cache,
            crawl,
            tasks: TaskRegistry::new(),
            slots,
            stats: Arc::new(StatsCollector::new()),
            config,
            crawl_stopped: AtomicBool::new(false),
        })
    }

    /// Run API calls under `tasks`, typically a registry wired to signals.
    pub fn with_tasks(mut self, tasks: TaskRegistry) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_stats(mut self, stats: Arc<StatsCollector>) -> Self {
        self.stats = stats;
        self
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn slots(&self) -> &SlotSemaphore<String> {
        &self.slots
    }

    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Produce the requested outputs for `request`.
    ///
    /// Every query is attempted and accounted for, even when a sibling
    /// fails; the first failure in page type order is returned.
    pub async fn provide(
        &self,
        request: &CrawlRequest,
        outputs: &[OutputKind],
    ) -> Result<Vec<Output>, AppError> {
        let extra = request.extra()?;
        let html_requested = outputs.contains(&OutputKind::Html);
        let mut page_types: Vec<PageType> = Vec::new();
        for kind in outputs {
            if let OutputKind::Data(page_type) = kind {
                if !page_types.contains(page_type) {
                    page_types.push(*page_type);
                }
            }
        }

        // HTML alone still needs a structured query to carry it.
        let html_only = html_requested && page_types.is_empty();
        if html_only {
            page_types.push(self.config.html_page_type);
        }

        let queries = page_types.iter().enumerate().map(|(i, page_type)| {
            let with_html = html_requested && i == 0;
            let mut query = Query::new(request.url.clone(), *page_type);
            if let Some(extra) = extra {
                query = query.with_extras(extra);
            }
            if with_html {
                query = query.with_extra(self.config.full_html_key.clone(), Value::Bool(true));
            }
            self.extract(query, with_html)
        });
        let results = join_all(queries).await;

        let mut provided = Vec::with_capacity(results.len() + 1);
        for result in results {
            let (data, html) = result?;
            if !html_only {
                provided.push(Output::Data(data));
            }
            if let Some(html) = html {
                provided.push(Output::Html(html));
            }
        }
        Ok(provided)
    }

    /// Run one query and account for its outcome.
    async fn extract(
        &self,
        query: Query,
        with_html: bool,
    ) -> Result<(ExtractedData, Option<HtmlPage>), AppError> {
        let page_type = query.page_type;
        self.inc_page_stat(page_type, "pages/count");

        let result = match self.fetch(&query, with_html).await {
            Ok(payload) => interpret(&query, payload, with_html, &self.config),
            Err(e) => Err(e),
        };

        match &result {
            Ok((_, html)) => {
                self.inc_page_stat(page_type, "pages/success");
                if html.is_some() {
                    self.inc_page_stat(page_type, "pages/html");
                }
            }
            Err(e) if e.is_cancelled() => {
                tracing::debug!(url = %query.url, %page_type, "Extraction cancelled");
                self.inc_page_stat(page_type, "pages/cancelled");
            }
            Err(e) => {
                tracing::warn!(url = %query.url, %page_type, error = %e, "Extraction failed");
                self.inc_page_stat(page_type, "pages/errors");
                self.inc_page_stat(page_type, &format!("pages/errors{}", e.summarize()));
            }
        }
        result
    }

    /// Cached payload for `query`, or a fresh one from the API.
    async fn fetch(&self, query: &Query, with_html: bool) -> Result<Value, AppError> {
        let fingerprint = self.cache.fingerprint(query);
        if let Some(payload) = self.cache.get(&fingerprint).await? {
            if answers_query(&payload, query, with_html) {
                tracing::debug!(url = %query.url, page_type = %query.page_type, "Cache hit");
                self.stats.inc_value(&format!("{STATS_PREFIX}/cache/hit"));
                return Ok(payload);
            }
            tracing::debug!(
                url = %query.url,
                page_type = %query.page_type,
                "Cached payload does not answer the query"
            );
            self.stats.inc_value(&format!("{STATS_PREFIX}/cache/mismatch"));
        }

        let payload = self.request(query).await?;
        self.stats.inc_value(&format!("{STATS_PREFIX}/cache/firsthand"));
        if query_error(&payload, &self.config).is_none() {
            self.cache.set(&fingerprint, &payload).await?;
        }
        Ok(payload)
    }

    /// One API call, bounded per domain and cancellable on shutdown.
    async fn request(&self, query: &Query) -> Result<Value, AppError> {
        let slot = partition_key(&query.url);
        let batch = [query.to_value()];
        let mut call_stats = CallStats::default();

        let call = async {
            let started = Instant::now();
            let result = self.transport.request_raw(&batch, &mut call_stats).await;
            Ok::<_, AppError>((result, started.elapsed()))
        };
        let result = match self.tasks.run(self.slots.run(slot, call)).await {
            Ok((result, latency)) => {
                // Only calls the API answered have a meaningful latency.
                if result.is_ok() || matches!(result, Err(AppError::RequestError { .. })) {
                    self.stats.record_latency(STATS_PREFIX, latency);
                    tracing::debug!(
                        url = %query.url,
                        latency_ms = latency.as_millis() as u64,
                        "Extraction API latency"
                    );
                }
                result
            }
            Err(e) => Err(e),
        };

        self.stats.inc_by(
            &format!("{STATS_PREFIX}/total/attempts/count"),
            call_stats.n_attempts,
        );
        self.stats.inc_by(
            &format!("{STATS_PREFIX}/total/attempts/billable"),
            call_stats.n_billable_query_responses,
        );

        match result {
            Ok(results) => results.into_iter().next().ok_or_else(|| {
                AppError::InvalidResponse("API returned no result for the query".into())
            }),
            Err(e) => {
                if e.is_account_disabled() {
                    self.stop_crawl();
                }
                Err(e)
            }
        }
    }

    fn stop_crawl(&self) {
        if self.crawl_stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::error!("Extraction account is disabled, stopping the crawl");
        self.crawl.close_spider(ACCOUNT_DISABLED_REASON);
    }

    fn inc_page_stat(&self, page_type: PageType, stat: &str) {
        self.stats
            .inc_value(&format!("{STATS_PREFIX}/total/{stat}"));
        self.stats
            .inc_value(&format!("{STATS_PREFIX}/{page_type}/{stat}"));
    }

    /// Close the cache and log the collected counters.
    pub async fn close(&self) -> Result<(), AppError> {
        let closed = self.cache.close().await;
        if let Some(latency) = self.stats.latency_summary(STATS_PREFIX) {
            tracing::info!(
                responses = latency.count,
                avg_latency_ms = latency.avg_ms,
                max_latency_ms = latency.max_ms,
                "Extraction API responses"
            );
        }
        for (key, value) in self.stats.snapshot() {
            tracing::info!(stat = %key, value, "Extraction stats");
        }
        closed
    }
}

/// Map a raw API payload to typed outputs.
fn interpret(
    query: &Query,
    payload: Value,
    with_html: bool,
    config: &ProviderConfig,
) -> Result<(ExtractedData, Option<HtmlPage>), AppError> {
    if let Some(error) = query_error(&payload, config) {
        let message = match error {
            Value::String(message) => message.clone(),
            other => other.to_string(),
        };
        let failed_query = payload
            .get("query")
            .cloned()
            .unwrap_or_else(|| query.to_value());
        return Err(AppError::Query {
            query: failed_query,
            message,
        });
    }

    let Value::Object(mut data) = payload else {
        return Err(AppError::InvalidResponse(format!(
            "expected an object for {} at {}",
            query.page_type, query.url
        )));
    };
    let html = data.remove("html");

    let html_page = if with_html {
        let Some(Value::String(html)) = html else {
            return Err(AppError::InvalidResponse(format!(
                "full HTML was requested but missing for {}",
                query.url
            )));
        };
        let url = data
            .get(query.page_type.as_str())
            .and_then(|item| item.get("url"))
            .and_then(Value::as_str)
            .unwrap_or(&query.url)
            .to_string();
        Some(HtmlPage { url, html })
    } else {
        None
    };

    let extracted = ExtractedData {
        page_type: query.page_type,
        data: Value::Object(data),
    };
    Ok((extracted, html_page))
}

use std::time::Duration;

use autox_core::config::ProviderConfig;
use autox_core::error::{AppError, is_domain_occupied, occupied_retry_after, truncate_body};
use autox_core::models::CallStats;
use autox_core::traits::ExtractionTransport;
use reqwest::Client;
use serde_json::Value;

pub const USER_AGENT: &str = concat!("autox/", env!("CARGO_PKG_VERSION"));

/// Wait used when a retriable error does not say how long to wait.
const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_RETRY_WAIT: Duration = Duration::from_secs(60);

/// Query errors that go away on their own.
const TRANSIENT_QUERY_ERRORS: &[&str] = &[
    "query timed out",
    "Downloader error: No response (network5)",
    "Downloader error: http50",
    "Downloader error: GlobalTimeoutError",
    "Proxy error: timeout",
    "Proxy error: internal_error",
];

/// Returns true for query errors worth sending again.
pub fn is_retriable_query_error(message: &str) -> bool {
    is_domain_occupied(message) || TRANSIENT_QUERY_ERRORS.contains(&message)
}

pub(crate) fn map_send_error(e: reqwest::Error, timeout_secs: u64) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout_secs)
    } else if e.is_connect() {
        AppError::NetworkError(format!("Connection failed: {e}"))
    } else {
        AppError::HttpError(e.to_string())
    }
}

/// Extraction API client using reqwest.
///
/// Posts batches of queries as a JSON array, authenticating with the API
/// key as the basic auth user. Retriable query errors are re-sent up to
/// `max_query_error_retries` times.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    api_url: String,
    api_key: String,
    max_query_error_retries: u32,
    timeout_secs: u64,
    max_retry_wait: Duration,
}

impl ReqwestTransport {
    pub fn new(config: &ProviderConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(config.connection_pool_size)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            max_query_error_retries: config.max_query_error_retries,
            timeout_secs: config.timeout_secs,
            max_retry_wait: DEFAULT_MAX_RETRY_WAIT,
        })
    }

    /// Cap on the wait between retry rounds, whatever the API asks for.
    pub fn with_max_retry_wait(mut self, wait: Duration) -> Self {
        self.max_retry_wait = wait;
        self
    }

    /// One HTTP attempt.
    async fn post(&self, batch: &[&Value], stats: &mut CallStats) -> Result<Vec<Value>, AppError> {
        stats.n_attempts += 1;
        let response = self
            .client
            .post(&self.api_url)
            .basic_auth(&self.api_key, Some(""))
            .json(batch)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = truncate_body(&response.text().await.unwrap_or_default());
            tracing::debug!(status = status.as_u16(), %body, "Extraction API returned an error");
            return Err(AppError::RequestError {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))?;
        let results: Vec<Value> = serde_json::from_str(&body).map_err(|e| {
            AppError::InvalidResponse(format!("expected a JSON array of results: {e}"))
        })?;
        if results.len() != batch.len() {
            return Err(AppError::InvalidResponse(format!(
                "sent {} queries, got {} results",
                batch.len(),
                results.len()
            )));
        }
        Ok(results)
    }
}

impl ExtractionTransport for ReqwestTransport {
    async fn request_raw(
        &self,
        queries: &[Value],
        stats: &mut CallStats,
    ) -> Result<Vec<Value>, AppError> {
        let mut results: Vec<Option<Value>> = vec![None; queries.len()];
        let mut pending: Vec<usize> = (0..queries.len()).collect();
        let mut retries = 0;

        while !pending.is_empty() {
            let batch: Vec<&Value> = pending.iter().map(|&i| &queries[i]).collect();
            let answers = self.post(&batch, stats).await?;

            let mut retry = Vec::new();
            let mut wait = Duration::ZERO;
            for (&i, answer) in pending.iter().zip(answers) {
                match answer.get("error").and_then(Value::as_str) {
                    Some(message)
                        if retries < self.max_query_error_retries
                            && is_retriable_query_error(message) =>
                    {
                        let advertised = occupied_retry_after(message)
                            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                            .unwrap_or(DEFAULT_RETRY_WAIT);
                        wait = wait.max(advertised);
                        retry.push(i);
                    }
                    Some(_) => {}
                    None => stats.n_billable_query_responses += 1,
                }
                results[i] = Some(answer);
            }

            if retry.is_empty() {
                break;
            }
            retries += 1;
            let wait = wait.min(self.max_retry_wait);
            tracing::info!(
                queries = retry.len(),
                retry = retries,
                wait_ms = wait.as_millis() as u64,
                "Retrying query errors"
            );
            tokio::time::sleep(wait).await;
            pending = retry;
        }

        results
            .into_iter()
            .map(|r| r.ok_or_else(|| AppError::InvalidResponse("query left without a result".into())))
            .collect()
    }
}

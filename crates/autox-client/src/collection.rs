//! Remote response cache backed by a Scrapy Cloud style collection.
//!
//! Entries are stored as `{"_key": <url>, "value": <payload>}` in a named
//! key-value collection of a project. The cache is keyed on the page URL
//! only, so it is shared between page types and between jobs that point
//! to the same collection.

use std::fmt;
use std::time::Duration;

use autox_core::config::ProviderConfig;
use autox_core::error::{AppError, truncate_body};
use autox_core::models::Query;
use autox_core::traits::ResponseCache;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use url::Url;

use crate::transport::{USER_AGENT, map_send_error};

pub const DEFAULT_STORAGE_URL: &str = "https://storage.scrapinghub.com";
const DEFAULT_COLLECTION: &str = "dev_cache";
const STORAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Collection name: the explicit setting, else one derived from the job
/// id (`1/2/3` → `1_2_3_cache`), else `dev_cache`.
pub fn collection_name(explicit: Option<&str>, job: Option<&str>) -> String {
    if let Some(name) = explicit.filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    match job.filter(|j| !j.is_empty()) {
        Some(job) => format!("{}_cache", job.replace('/', "_")),
        None => DEFAULT_COLLECTION.to_string(),
    }
}

/// Project id: the first component of a `<project>/<spider>/<job>` id.
pub fn project_from_job(job: &str) -> Option<&str> {
    job.split('/').next().filter(|p| !p.is_empty())
}

/// Cache stored in a remote key-value collection.
#[derive(Clone)]
pub struct CollectionCache {
    client: Client,
    store_url: Url,
    api_key: String,
    project: String,
    collection: String,
}

impl CollectionCache {
    pub fn new(
        base_url: &str,
        api_key: &str,
        project: &str,
        collection: &str,
    ) -> Result<Self, AppError> {
        let mut store_url = Url::parse(base_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid storage URL '{base_url}': {e}")))?;
        store_url
            .path_segments_mut()
            .map_err(|_| AppError::ConfigError(format!("Storage URL '{base_url}' cannot be a base")))?
            .pop_if_empty()
            .extend(["collections", project, "s", collection]);

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(STORAGE_TIMEOUT)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            store_url,
            api_key: api_key.to_string(),
            project: project.to_string(),
            collection: collection.to_string(),
        })
    }

    /// Resolve project and collection from `config`.
    ///
    /// The project is `cache_project`, else the one in the job id; having
    /// neither is a configuration error.
    pub fn from_config(config: &ProviderConfig, base_url: &str) -> Result<Self, AppError> {
        let project = config
            .cache_project
            .as_deref()
            .or_else(|| config.job.as_deref().and_then(project_from_job))
            .ok_or_else(|| {
                AppError::ConfigError(
                    "Remote cache needs AUTOX_CACHE_PROJECT or AUTOX_JOB to pick a project".into(),
                )
            })?;
        let collection = collection_name(config.cache_collection.as_deref(), config.job.as_deref());
        Self::new(base_url, &config.api_key, project, &collection)
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn item_url(&self, key: &str) -> Url {
        let mut url = self.store_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(key);
        }
        url
    }
}

impl ResponseCache for CollectionCache {
    fn fingerprint(&self, query: &Query) -> String {
        query.url.clone()
    }

    async fn get(&self, fingerprint: &str) -> Result<Option<Value>, AppError> {
        let response = self
            .client
            .get(self.item_url(fingerprint))
            .basic_auth(&self.api_key, Some(""))
            .send()
            .await
            .map_err(|e| map_send_error(e, STORAGE_TIMEOUT.as_secs()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = truncate_body(&response.text().await.unwrap_or_default());
            return Err(AppError::CacheError(format!(
                "collection lookup failed (HTTP {}): {body}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::CacheError(format!("Failed to read collection item: {e}")))?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let item: Value = serde_json::from_str(&body)?;
        Ok(match item {
            Value::Object(mut map) if map.contains_key("value") => map.remove("value"),
            other => Some(other),
        })
    }

    async fn set(&self, fingerprint: &str, value: &Value) -> Result<(), AppError> {
        let item = json!({"_key": fingerprint, "value": value});
        let response = self
            .client
            .post(self.store_url.clone())
            .basic_auth(&self.api_key, Some(""))
            .json(&item)
            .send()
            .await
            .map_err(|e| map_send_error(e, STORAGE_TIMEOUT.as_secs()))?;

        let status = response.status();
        if !status.is_success() {
            let body = truncate_body(&response.text().await.unwrap_or_default());
            return Err(AppError::CacheError(format!(
                "collection write failed (HTTP {}): {body}",
                status.as_u16()
            )));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        Ok(())
    }
}

impl fmt::Debug for CollectionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionCache")
            .field("store_url", &self.store_url.as_str())
            .field("api_key", &"<redacted>")
            .field("project", &self.project)
            .field("collection", &self.collection)
            .finish()
    }
}

impl fmt::Display for CollectionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CollectionCache <project {} | collection {}>",
            self.project, self.collection
        )
    }
}

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;
use crate::models::PageType;

pub const DEFAULT_API_URL: &str = "https://autoextract.scrapinghub.com/v1/extract";
pub const DEFAULT_SLOT_CONCURRENCY: usize = 8;
pub const DEFAULT_CONNECTION_POOL_SIZE: usize = 16;
pub const DEFAULT_TIMEOUT_SECS: u64 = 660;
pub const DEFAULT_FULL_HTML_KEY: &str = "fullHtml";
/// Query errors accepted as results. Some sites answer 404 for real pages.
pub const DEFAULT_ALLOWED_RESPONSE_ERRORS: &[&str] = &["Downloader error: http404"];

/// Settings shared by the extraction provider, its transport and caches.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub api_url: String,
    pub max_query_error_retries: u32,
    /// Concurrent queries allowed per partition (registrable domain).
    pub slot_concurrency: usize,
    pub connection_pool_size: usize,
    pub timeout_secs: u64,
    /// Local cache file. `None` disables the local cache.
    pub cache_path: Option<PathBuf>,
    pub cache_compression: bool,
    /// Use the remote collection cache instead of the local one.
    pub cache_remote: bool,
    pub cache_collection: Option<String>,
    pub cache_project: Option<String>,
    /// Job id in the `<project>/<spider>/<job>` form.
    pub job: Option<String>,
    /// Page type queried when only HTML is requested.
    pub html_page_type: PageType,
    pub full_html_key: String,
    /// Query error messages treated as successful results.
    pub allowed_response_errors: Vec<String>,
}

impl ProviderConfig {
    /// Defaults for everything but the API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
            max_query_error_retries: 0,
            slot_concurrency: DEFAULT_SLOT_CONCURRENCY,
            connection_pool_size: DEFAULT_CONNECTION_POOL_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            cache_path: None,
            cache_compression: true,
            cache_remote: false,
            cache_collection: None,
            cache_project: None,
            job: None,
            html_page_type: PageType::Product,
            full_html_key: DEFAULT_FULL_HTML_KEY.to_string(),
            allowed_response_errors: DEFAULT_ALLOWED_RESPONSE_ERRORS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }

    /// Whether a query error with this message still counts as a result.
    pub fn is_allowed_response_error(&self, message: &str) -> bool {
        self.allowed_response_errors.iter().any(|e| e == message)
    }

    /// Read configuration from environment variables.
    ///
    /// - `AUTOX_API_KEY` (required)
    /// - `AUTOX_URL`
    /// - `AUTOX_MAX_QUERY_ERROR_RETRIES` (defaults to 0)
    /// - `AUTOX_SLOT_CONCURRENCY`, else `AUTOX_CONCURRENT_REQUESTS_PER_DOMAIN`
    ///   (defaults to 8)
    /// - `AUTOX_CONCURRENT_REQUESTS` (defaults to 16)
    /// - `AUTOX_TIMEOUT_SECS` (defaults to 660)
    /// - `AUTOX_CACHE_PATH`, `AUTOX_CACHE_COMPRESSION` (defaults to true)
    /// - `AUTOX_CACHE_REMOTE` (defaults to false), `AUTOX_CACHE_COLLECTION`,
    ///   `AUTOX_CACHE_PROJECT`, `AUTOX_JOB`
    /// - `AUTOX_HTML_PAGE_TYPE` (defaults to product)
    /// - `AUTOX_FULL_HTML_KEY` (defaults to fullHtml)
    /// - `AUTOX_ALLOWED_RESPONSE_ERRORS`, comma separated, added to
    ///   [`DEFAULT_ALLOWED_RESPONSE_ERRORS`]
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("AUTOX_API_KEY").ok_or_else(|| {
            AppError::ConfigError("AUTOX_API_KEY not set. Required for extraction.".into())
        })?;
        let mut config = Self::new(api_key);

        if let Some(url) = get("AUTOX_URL") {
            config.api_url = url;
        }
        if let Some(raw) = get("AUTOX_MAX_QUERY_ERROR_RETRIES") {
            config.max_query_error_retries = parse_var("AUTOX_MAX_QUERY_ERROR_RETRIES", &raw)?;
        }

        let slot_var = ["AUTOX_SLOT_CONCURRENCY", "AUTOX_CONCURRENT_REQUESTS_PER_DOMAIN"]
            .into_iter()
            .find_map(|key| get(key).map(|raw| (key, raw)));
        if let Some((key, raw)) = slot_var {
            config.slot_concurrency = parse_positive(key, &raw)?;
        }
        if let Some(raw) = get("AUTOX_CONCURRENT_REQUESTS") {
            config.connection_pool_size = parse_positive("AUTOX_CONCURRENT_REQUESTS", &raw)?;
        }
        if let Some(raw) = get("AUTOX_TIMEOUT_SECS") {
            config.timeout_secs = parse_positive("AUTOX_TIMEOUT_SECS", &raw)?;
        }

        config.cache_path = get("AUTOX_CACHE_PATH").map(PathBuf::from);
        if let Some(raw) = get("AUTOX_CACHE_COMPRESSION") {
            config.cache_compression = parse_bool("AUTOX_CACHE_COMPRESSION", &raw)?;
        }
        if let Some(raw) = get("AUTOX_CACHE_REMOTE") {
            config.cache_remote = parse_bool("AUTOX_CACHE_REMOTE", &raw)?;
        }
        config.cache_collection = get("AUTOX_CACHE_COLLECTION");
        config.cache_project = get("AUTOX_CACHE_PROJECT");
        config.job = get("AUTOX_JOB");

        if let Some(raw) = get("AUTOX_HTML_PAGE_TYPE") {
            config.html_page_type = raw
                .parse()
                .map_err(|e: String| AppError::ConfigError(format!("AUTOX_HTML_PAGE_TYPE: {e}")))?;
        }
        if let Some(key) = get("AUTOX_FULL_HTML_KEY") {
            config.full_html_key = key;
        }
        if let Some(raw) = get("AUTOX_ALLOWED_RESPONSE_ERRORS") {
            for message in raw.split(',').map(str::trim).filter(|m| !m.is_empty()) {
                if !config.is_allowed_response_error(message) {
                    config.allowed_response_errors.push(message.to_string());
                }
            }
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::ConfigError(format!("Invalid {key} '{raw}': must be an integer")))
}

fn parse_positive<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: FromStr + Default + PartialEq,
{
    let parsed: T = parse_var(key, raw)?;
    if parsed == T::default() {
        return Err(AppError::ConfigError(format!("{key} must be at least 1")));
    }
    Ok(parsed)
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::ConfigError(format!(
            "Invalid {key} '{raw}': must be true or false"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<ProviderConfig, AppError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ProviderConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_api_key_is_required() {
        let err = config_from(&[]).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(msg) if msg.contains("AUTOX_API_KEY")));

        let err = config_from(&[("AUTOX_API_KEY", "  ")]).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("AUTOX_API_KEY", "key")]).unwrap();
        assert_eq!(config.api_key, "key");
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.max_query_error_retries, 0);
        assert_eq!(config.slot_concurrency, 8);
        assert_eq!(config.connection_pool_size, 16);
        assert_eq!(config.timeout_secs, 660);
        assert!(config.cache_path.is_none());
        assert!(config.cache_compression);
        assert!(!config.cache_remote);
        assert_eq!(config.html_page_type, PageType::Product);
        assert_eq!(config.full_html_key, "fullHtml");
        assert!(config.is_allowed_response_error("Downloader error: http404"));
        assert!(!config.is_allowed_response_error("Downloader error: http500"));
    }

    #[test]
    fn test_allowed_response_errors_extend_defaults() {
        let config = config_from(&[
            ("AUTOX_API_KEY", "key"),
            (
                "AUTOX_ALLOWED_RESPONSE_ERRORS",
                "Downloader error: http410, ,Downloader error: http404",
            ),
        ])
        .unwrap();
        assert_eq!(
            config.allowed_response_errors,
            vec!["Downloader error: http404", "Downloader error: http410"]
        );
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("AUTOX_API_KEY", "key"),
            ("AUTOX_URL", "http://localhost:1234/extract"),
            ("AUTOX_MAX_QUERY_ERROR_RETRIES", "3"),
            ("AUTOX_SLOT_CONCURRENCY", "2"),
            ("AUTOX_CONCURRENT_REQUESTS", "32"),
            ("AUTOX_CACHE_PATH", "/tmp/cache.sqlite"),
            ("AUTOX_CACHE_COMPRESSION", "false"),
            ("AUTOX_CACHE_REMOTE", "yes"),
            ("AUTOX_JOB", "1/2/3"),
            ("AUTOX_HTML_PAGE_TYPE", "article"),
        ])
        .unwrap();
        assert_eq!(config.api_url, "http://localhost:1234/extract");
        assert_eq!(config.max_query_error_retries, 3);
        assert_eq!(config.slot_concurrency, 2);
        assert_eq!(config.connection_pool_size, 32);
        assert_eq!(config.cache_path, Some(PathBuf::from("/tmp/cache.sqlite")));
        assert!(!config.cache_compression);
        assert!(config.cache_remote);
        assert_eq!(config.job.as_deref(), Some("1/2/3"));
        assert_eq!(config.html_page_type, PageType::Article);
    }

    #[test]
    fn test_slot_concurrency_falls_back_to_per_domain_setting() {
        let config = config_from(&[
            ("AUTOX_API_KEY", "key"),
            ("AUTOX_CONCURRENT_REQUESTS_PER_DOMAIN", "5"),
        ])
        .unwrap();
        assert_eq!(config.slot_concurrency, 5);

        let config = config_from(&[
            ("AUTOX_API_KEY", "key"),
            ("AUTOX_SLOT_CONCURRENCY", "3"),
            ("AUTOX_CONCURRENT_REQUESTS_PER_DOMAIN", "5"),
        ])
        .unwrap();
        assert_eq!(config.slot_concurrency, 3);
    }

    #[test]
    fn test_invalid_values_fail_fast() {
        let zero = config_from(&[("AUTOX_API_KEY", "key"), ("AUTOX_SLOT_CONCURRENCY", "0")]);
        assert!(matches!(zero, Err(AppError::ConfigError(msg)) if msg.contains("at least 1")));

        let junk = config_from(&[("AUTOX_API_KEY", "key"), ("AUTOX_TIMEOUT_SECS", "soon")]);
        assert!(matches!(junk, Err(AppError::ConfigError(_))));

        let flag = config_from(&[("AUTOX_API_KEY", "key"), ("AUTOX_CACHE_COMPRESSION", "maybe")]);
        assert!(matches!(flag, Err(AppError::ConfigError(_))));

        let page = config_from(&[("AUTOX_API_KEY", "key"), ("AUTOX_HTML_PAGE_TYPE", "recipe")]);
        assert!(matches!(page, Err(AppError::ConfigError(_))));
    }
}

use thiserror::Error;

/// Error type the extraction API reports for disabled accounts.
pub const ACCOUNT_DISABLED_ERROR_TYPE: &str =
    "http://errors.xod.scrapinghub.com/account-disabled.html";

/// Application-wide error types for autox.
#[derive(Error, Debug)]
pub enum AppError {
    /// The API answered, but the query itself failed (throttling, bad domain...).
    #[error("QueryError: message='{message}', query={query}")]
    Query {
        query: serde_json::Value,
        message: String,
    },

    /// The task was cancelled, either explicitly or by a shutdown signal.
    #[error("Task cancelled")]
    Cancelled,

    /// HTTP request to the extraction API failed.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The extraction API answered with a non-success status.
    #[error("Request error (HTTP {status}): {body}")]
    RequestError { status: u16, body: String },

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The API answered with something that is not a list of results.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Cache backend failed.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Name of the variant, used where a low-cardinality label is needed.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Query { .. } => "QueryError",
            AppError::Cancelled => "Cancelled",
            AppError::HttpError(_) => "HttpError",
            AppError::RequestError { .. } => "RequestError",
            AppError::NetworkError(_) => "NetworkError",
            AppError::Timeout(_) => "Timeout",
            AppError::InvalidResponse(_) => "InvalidResponse",
            AppError::SerializationError(_) => "SerializationError",
            AppError::CacheError(_) => "CacheError",
            AppError::ConfigError(_) => "ConfigError",
            AppError::Generic(_) => "Generic",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }

    /// Short text describing the error, suitable as a stats key suffix.
    ///
    /// Query errors keep their message, minus the parts that vary from
    /// one occurrence to the next. Everything else collapses to the
    /// variant name.
    pub fn summarize(&self) -> String {
        match self {
            AppError::Query { message, .. } => {
                if is_domain_occupied(message) {
                    "/query/domain occupied".to_string()
                } else {
                    format!("/query/{message}")
                }
            }
            other => format!("/rest/{}", other.kind()),
        }
    }

    /// Returns true when the API rejected the request because the account
    /// is disabled. Nothing will succeed after that.
    pub fn is_account_disabled(&self) -> bool {
        let AppError::RequestError { body, .. } = self else {
            return false;
        };
        serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| {
                v.get("type")
                    .and_then(|t| t.as_str())
                    .map(|t| t == ACCOUNT_DISABLED_ERROR_TYPE)
            })
            .unwrap_or(false)
    }
}

/// Matches "domain example.com is occupied, please retry in 2.2 seconds".
pub fn is_domain_occupied(message: &str) -> bool {
    message.starts_with("domain ") && message.contains(" is occupied")
}

/// Seconds the API asks to wait in a domain-occupied message, if any.
pub fn occupied_retry_after(message: &str) -> Option<f64> {
    if !is_domain_occupied(message) {
        return None;
    }
    let (_, tail) = message.split_once("retry in ")?;
    tail.split_whitespace().next()?.parse().ok()
}

/// Longest error body kept in errors and logs, in characters.
pub const MAX_ERROR_BODY: usize = 2000;

/// Shorten `body` to its head and tail when it exceeds [`MAX_ERROR_BODY`].
pub fn truncate_body(body: &str) -> String {
    let len = body.chars().count();
    if len <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let half = MAX_ERROR_BODY / 2;
    let head: String = body.chars().take(half).collect();
    let tail: String = body.chars().skip(len - half).collect();
    format!("{head} [...] {tail}")
}

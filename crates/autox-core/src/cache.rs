//! Response cache variants that live in-process.
//!
//! Persistent and remote caches live in `autox-cache` and `autox-client`;
//! they share [`canonical_json`] so the same query maps to the same key
//! everywhere.

use std::fmt;

use moka::future::Cache;
use serde_json::Value;

use crate::error::AppError;
use crate::models::Query;
use crate::traits::ResponseCache;

/// Serialize `value` with object keys sorted at every depth.
///
/// Two queries that differ only in field order produce the same string.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push_str(": ");
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Fingerprint shared by the caches keyed on the whole query.
pub fn query_fingerprint(query: &Query) -> String {
    canonical_json(&query.to_value())
}

/// Cache used when caching is disabled: every lookup misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl ResponseCache for NoCache {
    fn fingerprint(&self, _query: &Query) -> String {
        String::new()
    }

    async fn get(&self, _fingerprint: &str) -> Result<Option<Value>, AppError> {
        Ok(None)
    }

    async fn set(&self, _fingerprint: &str, _value: &Value) -> Result<(), AppError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        Ok(())
    }
}

impl fmt::Display for NoCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no cache")
    }
}

/// Bounded in-memory cache, lost when the process exits.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Cache<String, Value>,
}

impl MemoryCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            entries: Cache::new(max_entries),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}

impl ResponseCache for MemoryCache {
    fn fingerprint(&self, query: &Query) -> String {
        query_fingerprint(query)
    }

    async fn get(&self, fingerprint: &str) -> Result<Option<Value>, AppError> {
        Ok(self.entries.get(fingerprint).await)
    }

    async fn set(&self, fingerprint: &str, value: &Value) -> Result<(), AppError> {
        self.entries
            .insert(fingerprint.to_string(), value.clone())
            .await;
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        self.entries.invalidate_all();
        Ok(())
    }
}

impl fmt::Display for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryCache <{} records>", self.entries.entry_count())
    }
}

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use autox_core::AppError;
use autox_core::cache::query_fingerprint;
use autox_core::models::Query;
use autox_core::traits::ResponseCache;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::{CacheConfig, ensure_parent};

const COMPRESSED_TABLE: &str = "responses_gzip";
const PLAIN_TABLE: &str = "responses";
const GZIP_LEVEL: u32 = 3;

fn db_error(e: sqlx::Error) -> AppError {
    AppError::CacheError(e.to_string())
}

/// Serialize a payload for storage, gzipped when `compressed`.
pub fn encode(value: &Value, compressed: bool) -> Result<Vec<u8>, AppError> {
    let json = serde_json::to_vec(value)?;
    if !compressed {
        return Ok(json);
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(GZIP_LEVEL));
    encoder
        .write_all(&json)
        .and_then(|()| encoder.finish())
        .map_err(|e| AppError::CacheError(format!("Failed to compress entry: {e}")))
}

pub fn decode(bytes: &[u8], compressed: bool) -> Result<Value, AppError> {
    if !compressed {
        return Ok(serde_json::from_slice(bytes)?);
    }
    let mut json = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut json)
        .map_err(|e| AppError::CacheError(format!("Failed to decompress entry: {e}")))?;
    Ok(serde_json::from_slice(&json)?)
}

/// Response cache persisted in a local SQLite file.
///
/// Compressed and plain entries live in different tables, so switching
/// compression on an existing file never mixes encodings.
#[derive(Clone)]
pub struct SqliteCache {
    pool: SqlitePool,
    path: PathBuf,
    compressed: bool,
}

impl SqliteCache {
    /// Open (or create) the cache described by `config`.
    pub async fn open(config: &CacheConfig) -> Result<Self, AppError> {
        let path = config.resolved_path();
        Self::open_path(&path, config.compressed).await
    }

    /// Open (or create) the cache file at `path` as given.
    pub async fn open_path(path: &Path, compressed: bool) -> Result<Self, AppError> {
        ensure_parent(path).await?;

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| AppError::CacheError(format!("Failed to open {}: {e}", path.display())))?;

        let cache = Self {
            pool,
            path: path.to_path_buf(),
            compressed,
        };
        cache.migrate().await?;
        tracing::debug!(path = %cache.path.display(), compressed, "Opened response cache");
        Ok(cache)
    }

    async fn migrate(&self) -> Result<(), AppError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, value BLOB NOT NULL)",
            self.table()
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    fn table(&self) -> &'static str {
        if self.compressed {
            COMPRESSED_TABLE
        } else {
            PLAIN_TABLE
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Number of stored entries.
    pub async fn len(&self) -> Result<u64, AppError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table());
        let (count,): (i64,) = sqlx::query_as(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(count.max(0) as u64)
    }

    pub async fn is_empty(&self) -> Result<bool, AppError> {
        Ok(self.len().await? == 0)
    }

    /// `SqliteCache <path | compressed: true | 12 records>`
    pub async fn summary(&self) -> Result<String, AppError> {
        Ok(format!(
            "SqliteCache <{} | compressed: {} | {} records>",
            self.path.display(),
            self.compressed,
            self.len().await?
        ))
    }
}

impl ResponseCache for SqliteCache {
    fn fingerprint(&self, query: &Query) -> String {
        query_fingerprint(query)
    }

    async fn get(&self, fingerprint: &str) -> Result<Option<Value>, AppError> {
        let sql = format!("SELECT value FROM {} WHERE key = ?", self.table());
        let row: Option<(Vec<u8>,)> = sqlx::query_as(&sql)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(|(bytes,)| decode(&bytes, self.compressed))
            .transpose()
    }

    async fn set(&self, fingerprint: &str, value: &Value) -> Result<(), AppError> {
        let bytes = encode(value, self.compressed)?;
        let sql = format!(
            "INSERT OR REPLACE INTO {} (key, value) VALUES (?, ?)",
            self.table()
        );
        sqlx::query(&sql)
            .bind(fingerprint)
            .bind(bytes)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        if !self.pool.is_closed() {
            tracing::debug!(path = %self.path.display(), "Closing response cache");
            self.pool.close().await;
        }
        Ok(())
    }
}

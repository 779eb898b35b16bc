use std::path::{Path, PathBuf};

use autox_core::AppError;
use autox_core::config::ProviderConfig;

/// Directory relative cache paths are resolved against.
pub const DATA_DIR: &str = ".autox";

/// Configuration for the local response cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub path: PathBuf,
    pub compressed: bool,
}

impl CacheConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            compressed: true,
        }
    }

    pub fn with_compression(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// The local cache settings of `config`, or `None` when no cache path
    /// is configured.
    pub fn from_provider(config: &ProviderConfig) -> Option<Self> {
        config
            .cache_path
            .as_ref()
            .map(|path| Self::new(path).with_compression(config.cache_compression))
    }

    /// Absolute paths are kept, relative ones live under [`DATA_DIR`].
    pub fn resolved_path(&self) -> PathBuf {
        resolve_path(Path::new(DATA_DIR), &self.path)
    }
}

fn resolve_path(data_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir.join(path)
    }
}

/// Create the parent directory of `path` if it is missing.
pub(crate) async fn ensure_parent(path: &Path) -> Result<(), AppError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| {
                AppError::CacheError(format!(
                    "Failed to create cache directory {}: {e}",
                    parent.display()
                ))
            }),
        _ => Ok(()),
    }
}

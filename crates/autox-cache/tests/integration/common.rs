use autox_cache::SqliteCache;
use tempfile::TempDir;

/// Opens a cache in a fresh temporary directory.
///
/// The `TempDir` must be kept in scope for the test duration; dropping it
/// deletes the database file.
pub async fn setup_test_cache(compressed: bool) -> (SqliteCache, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let cache = SqliteCache::open_path(&dir.path().join("cache.sqlite"), compressed)
        .await
        .expect("Failed to open cache");
    (cache, dir)
}

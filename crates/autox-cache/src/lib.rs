pub mod config;
pub mod sqlite;

pub use config::CacheConfig;
pub use sqlite::SqliteCache;

mod cache;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use futures::StreamExt;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use autox_cache::{CacheConfig, SqliteCache};
use autox_client::ReqwestTransport;
use autox_client::collection::DEFAULT_STORAGE_URL;
use autox_core::config::ProviderConfig;
use autox_core::models::{CrawlRequest, OutputKind, PageType};
use autox_core::provider::ExtractionProvider;
use autox_core::task_registry::{ShutdownSignal, TaskRegistry};
use autox_core::traits::{CrawlControl, ResponseCache};

use crate::cache::AnyCache;

#[derive(Parser)]
#[command(name = "autox", version, about = "Batch page extraction through the extraction API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract structured data for one or more URLs
    Extract {
        /// Target URL (repeatable)
        #[arg(short, long = "url")]
        urls: Vec<String>,

        /// File with one URL per line
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Page type to extract (repeatable, defaults to product)
        #[arg(short, long = "page-type")]
        page_types: Vec<PageType>,

        /// Also return the full page HTML
        #[arg(long, default_value_t = false)]
        html: bool,

        /// Base URL of the remote collection storage
        #[arg(long, env = "AUTOX_CACHE_STORAGE_URL", default_value = DEFAULT_STORAGE_URL)]
        storage_url: String,
    },

    /// Show the local response cache
    CacheInfo {
        /// Cache file
        #[arg(short, long, env = "AUTOX_CACHE_PATH")]
        path: PathBuf,

        /// Whether the cache stores gzip-compressed entries
        #[arg(long, env = "AUTOX_CACHE_COMPRESSION", default_value_t = true, action = ArgAction::Set)]
        compressed: bool,
    },
}

/// Stops the batch by shutting the task registry down.
struct RegistryCrawl {
    tasks: TaskRegistry,
}

impl CrawlControl for RegistryCrawl {
    fn close_spider(&self, reason: &str) {
        tracing::error!(%reason, "Stopping the extraction batch");
        if let Err(e) = self.tasks.trigger_shutdown(ShutdownSignal::Requested) {
            tracing::error!(error = %e, "Shutdown hooks failed");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("autox=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            urls,
            input,
            page_types,
            html,
            storage_url,
        } => {
            let mut urls = urls;
            if let Some(input) = input {
                urls.extend(read_urls(&input)?);
            }
            anyhow::ensure!(!urls.is_empty(), "No URLs given. Use --url or --input.");
            let outputs = requested_outputs(&page_types, html);
            let config = ProviderConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
            cmd_extract(urls, &outputs, config, &storage_url).await?;
        }
        Commands::CacheInfo { path, compressed } => {
            let config = CacheConfig::new(path).with_compression(compressed);
            cmd_cache_info(&config).await?;
        }
    }

    Ok(())
}

/// Non-empty, non-comment lines of `path`.
fn read_urls(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL file: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

fn requested_outputs(page_types: &[PageType], html: bool) -> Vec<OutputKind> {
    let mut outputs: Vec<OutputKind> = page_types.iter().copied().map(OutputKind::Data).collect();
    if html {
        outputs.push(OutputKind::Html);
    }
    if outputs.is_empty() {
        outputs.push(OutputKind::Data(PageType::Product));
    }
    outputs
}

async fn cmd_extract(
    urls: Vec<String>,
    outputs: &[OutputKind],
    config: ProviderConfig,
    storage_url: &str,
) -> Result<()> {
    let tasks = TaskRegistry::new();
    #[cfg(unix)]
    let _signals = tasks
        .install_signal_handlers(&[ShutdownSignal::Interrupt, ShutdownSignal::Terminate])
        .map_err(|e| anyhow::anyhow!(e))?;

    let cache = AnyCache::from_config(&config, storage_url)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    let description = cache.describe().await.map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!(cache = %description, "Using response cache");

    let transport = ReqwestTransport::new(&config).context("Failed to create HTTP client")?;
    let parallelism = config.connection_pool_size;
    let crawl = RegistryCrawl {
        tasks: tasks.clone(),
    };
    let provider = Arc::new(
        ExtractionProvider::new(transport, cache, crawl, config)
            .map_err(|e| anyhow::anyhow!(e))?
            .with_tasks(tasks.clone()),
    );

    tracing::info!(urls = urls.len(), parallelism, "Starting extraction");

    let mut results = futures::stream::iter(urls)
        .map(|url| {
            let provider = Arc::clone(&provider);
            async move {
                let outcome = provider.provide(&CrawlRequest::new(url.clone()), outputs).await;
                (url, outcome)
            }
        })
        .buffer_unordered(parallelism);

    let mut failed = 0usize;
    while let Some((url, outcome)) = results.next().await {
        let line = match outcome {
            Ok(outputs) => json!({ "url": url, "outputs": outputs }),
            Err(e) => {
                failed += 1;
                json!({ "url": url, "error": e.to_string(), "kind": e.kind() })
            }
        };
        println!("{line}");
    }
    drop(results);

    if tasks.is_cancelled() {
        tracing::warn!("Extraction was interrupted");
    }
    provider.close().await.map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!(failed, "Extraction finished");

    Ok(())
}

async fn cmd_cache_info(config: &CacheConfig) -> Result<()> {
    let path = config.resolved_path();
    anyhow::ensure!(path.exists(), "No cache file at {}", path.display());

    let cache = SqliteCache::open(config)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    println!("{}", cache.summary().await.map_err(|e| anyhow::anyhow!(e))?);
    cache.close().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_requested_outputs_default_to_product() {
        assert_eq!(
            requested_outputs(&[], false),
            vec![OutputKind::Data(PageType::Product)]
        );
        assert_eq!(requested_outputs(&[], true), vec![OutputKind::Html]);
        assert_eq!(
            requested_outputs(&[PageType::Article], true),
            vec![OutputKind::Data(PageType::Article), OutputKind::Html]
        );
    }

    #[test]
    fn test_read_urls_skips_blanks_and_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "http://a.com\n\n# skipped\n  http://b.com  ").unwrap();
        let urls = read_urls(file.path()).unwrap();
        assert_eq!(urls, vec!["http://a.com", "http://b.com"]);
    }

    #[test]
    fn test_cli_parses_extract() {
        let cli = Cli::try_parse_from([
            "autox",
            "extract",
            "--url",
            "http://a.com",
            "-u",
            "http://b.com",
            "--page-type",
            "article",
            "--html",
        ])
        .unwrap();
        let Commands::Extract {
            urls,
            page_types,
            html,
            ..
        } = cli.command
        else {
            panic!("expected extract");
        };
        assert_eq!(urls, vec!["http://a.com", "http://b.com"]);
        assert_eq!(page_types, vec![PageType::Article]);
        assert!(html);
    }
}

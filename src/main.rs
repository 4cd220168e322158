mod cache;
mod config;
mod http;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use cache::{CacheLayer, CacheSource, CacheStorage, CacheStore, SqliteStorage};
use http::{resolve, HttpNetwork, Request};
use worker::{Host, OfflineCacheHandler};

#[derive(Parser, Debug)]
#[command(name = "precache")]
#[command(about = "Pre-cache static assets and serve them cache-first")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./precache.yaml or $XDG_CONFIG_HOME/precache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache database path (overrides the config file)
  #[arg(long)]
  db: Option<PathBuf>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch every configured asset into the cache store
  Install,
  /// Serve one request cache-first
  Fetch {
    /// Absolute URL, or an identifier relative to the origin (e.g. ./index.html)
    target: String,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// List the entries of the configured cache store
  List,
  /// List all cache store names
  Caches,
}

type Handler = OfflineCacheHandler<SqliteStorage, HttpNetwork>;

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging(args.log_file.as_deref())?;

  let config = config::Config::load(args.config.as_deref())?;

  // Override database if specified on command line
  let config = if let Some(db) = args.db {
    config::Config {
      database: Some(db),
      ..config
    }
  } else {
    config
  };

  let storage = SqliteStorage::open_at(&config.database_path()?)?;
  let network = Arc::new(HttpNetwork::new(Duration::from_secs(config.timeout_secs))?);
  let cache = CacheLayer::new(storage, config.origin.clone());
  let handler = OfflineCacheHandler::new(config.manifest(), cache, Arc::clone(&network));

  match args.command {
    Command::Install => install(handler, network).await,
    Command::Fetch { target, output } => fetch(handler, network, &target, output.as_deref()).await,
    Command::List => list(&handler),
    Command::Caches => {
      for name in handler.cache().storage().names()? {
        println!("{}", name);
      }
      Ok(())
    }
  }
}

async fn install(handler: Handler, network: Arc<HttpNetwork>) -> Result<()> {
  let cache_name = handler.manifest().cache_name.clone();
  let asset_count = handler.manifest().assets.len();

  let mut host = Host::new(handler, network);
  host.install().await?;

  println!("Cached {} assets in '{}'", asset_count, cache_name);
  Ok(())
}

async fn fetch(
  handler: Handler,
  network: Arc<HttpNetwork>,
  target: &str,
  output: Option<&Path>,
) -> Result<()> {
  let url = resolve(handler.cache().origin(), target)?;
  let host = if handler.is_installed()? {
    Host::resume(handler, network)
  } else {
    Host::new(handler, network)
  };

  let served = host.fetch(&Request::get(url)).await?;
  let source = match (served.source, served.cached_at) {
    (CacheSource::Cache, Some(cached_at)) => {
      format!("cache, stored {}", cached_at.format("%Y-%m-%d %H:%M:%S"))
    }
    (source, _) => source.to_string(),
  };
  let response = served.data;

  eprintln!(
    "{} {} ({}, {} bytes{})",
    response.status,
    response.status_text,
    source,
    response.body.len(),
    response
      .header("content-type")
      .map(|t| format!(", {}", String::from_utf8_lossy(t)))
      .unwrap_or_default()
  );

  match output {
    Some(path) => tokio::fs::write(path, &response.body)
      .await
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
    None => std::io::stdout().write_all(&response.body)?,
  }

  Ok(())
}

fn list(handler: &Handler) -> Result<()> {
  let name = &handler.manifest().cache_name;
  if !handler.cache().storage().has(name)? {
    return Err(eyre!("No cache store named '{}'. Run `precache install` first.", name));
  }

  let store = handler.cache().open(name)?;
  for entry in store.keys()? {
    println!(
      "{} {:>10} {} {} {}",
      entry.status,
      entry.size,
      &entry.digest[..12],
      entry.cached_at.format("%Y-%m-%d %H:%M:%S"),
      entry.key
    );
  }

  Ok(())
}

/// Log to stderr, or to `log_file` through a non-blocking writer.
///
/// The returned guard flushes the file writer when dropped.
fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  let Some(path) = log_file else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  };

  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
  let dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or_else(|| Path::new("."));

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(Some(guard))
}

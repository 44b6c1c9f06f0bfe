mod cache;
mod config;
mod http;
mod net;
mod worker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use cache::{CacheSource, CacheStorage, MemoryStorage, SqliteStorage};
use http::{Request, Response};
use net::{Fetcher, HttpFetcher};
use worker::{FetchOutcome, Host, ServiceWorker};

#[derive(Parser, Debug)]
#[command(name = "cinelyon-sw")]
#[command(about = "Network-first offline cache for the CinéLyon page")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./cinelyon-sw.yaml or $XDG_CONFIG_HOME/cinelyon-sw/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep caches in memory for this run only
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the static assets into the current cache
  Install,
  /// Delete every cache except the current one
  Activate,
  /// Dispatch one fetch event and print the response
  Fetch {
    /// Absolute URL or path on the configured origin
    target: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Value of the accept header
    #[arg(long)]
    accept: Option<String>,
  },
  /// List cache names
  Caches,
}

/// Host that only reports the worker's lifecycle signals.
struct CliHost;

#[async_trait]
impl Host for CliHost {
  async fn skip_waiting(&self) -> Result<()> {
    info!("Worker installed, skipping the waiting phase");
    Ok(())
  }

  async fn claim_clients(&self) -> Result<()> {
    info!("Worker activated, claiming open pages");
    Ok(())
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = init_logging(config.log_dir.as_deref());

  let worker_config = config.worker()?;
  let fetcher = Arc::new(HttpFetcher::new()?);

  if args.ephemeral {
    let storage = Arc::new(MemoryStorage::new());
    let worker = ServiceWorker::new(worker_config, storage, fetcher, CliHost);
    run(&worker, args.command).await
  } else {
    let storage = Arc::new(SqliteStorage::open(config.database.as_deref())?);
    let worker = ServiceWorker::new(worker_config, storage, fetcher, CliHost);
    run(&worker, args.command).await
  }
}

/// Log to stderr, or to a daily file when a log directory is configured.
fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "cinelyon-sw.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .init();
      Some(guard)
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      None
    }
  }
}

async fn run<S: CacheStorage + 'static>(
  worker: &ServiceWorker<S, HttpFetcher, CliHost>,
  command: Command,
) -> Result<()> {
  match command {
    Command::Install => {
      let result = worker.install().await;
      info!(state = %worker.state(), "Install finished");
      result
    }
    Command::Activate => {
      let result = worker.activate().await;
      info!(state = %worker.state(), "Activate finished");
      result
    }
    Command::Caches => {
      let current = worker.cache().name();
      for name in worker.cache().storage().keys().await? {
        let marker = if name == current { "*" } else { " " };
        println!("{} {}", marker, name);
      }
      Ok(())
    }
    Command::Fetch {
      target,
      method,
      accept,
    } => {
      let mut request = Request::new(&method, &worker.config().origin, &target)?;
      if let Some(accept) = accept {
        request = request.with_header("accept", &accept);
      }

      let result = match worker.handle_fetch(&request).await {
        FetchOutcome::Passthrough => {
          // Not ours: plain network request, nothing cached
          let response = worker.fetcher().fetch(&request).await?;
          print_response(&response, "passthrough", None)
        }
        FetchOutcome::Respond(result) => match result.data {
          Some(response) => print_response(&response, &result.source.to_string(), result.cached_at),
          None if result.source == CacheSource::AppShell => {
            Err(eyre!("Offline and no app shell cached for {}", request.url))
          }
          None => Err(eyre!("No response for {}", request.url)),
        },
      };

      worker.flush().await;
      result
    }
  }
}

fn print_response(
  response: &Response,
  source: &str,
  cached_at: Option<DateTime<Utc>>,
) -> Result<()> {
  match cached_at {
    Some(at) => println!(
      "{} {} ({}, cached {})",
      response.status,
      response.status_text,
      source,
      at.format("%Y-%m-%d %H:%M:%S UTC")
    ),
    None => println!("{} {} ({})", response.status, response.status_text, source),
  }
  for (name, value) in &response.headers {
    println!("{}: {}", name, value);
  }
  println!();

  let mut stdout = std::io::stdout();
  stdout.write_all(&response.body)?;
  stdout.flush()?;
  Ok(())
}

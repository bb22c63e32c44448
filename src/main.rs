//! `infoline` command line: connection status, listings and cache maintenance.

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use infoline::backend::{RemoteBackend, RestBackend};
use infoline::cache::{AlwaysOnline, CacheResult, OfflineFlag};
use infoline::config::Config;
use infoline::error::QueryError;
use infoline::infoline::{InfoLineClient, UserRole};
use infoline::logging;
use infoline::monitor::{ConnectionMonitor, ConnectionStatus, MonitorOptions};
use infoline::query::{Query, QueryStatus};

/// How long `list` stays quiet before reporting that it is still waiting.
const SLOW_FETCH: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "infoline")]
#[command(about = "Query the InfoLine backend through the retry and cache layer")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/infoline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Serve cached data only, without touching the network
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Probe the backend once
  Status,
  /// List records
  List {
    #[arg(value_enum)]
    resource: Resource,
    /// Region id for sectors, sector id for schools, role for users
    #[arg(long)]
    parent: Option<String>,
    /// 1-based page number
    #[arg(long, default_value_t = 1)]
    page: u64,
  },
  /// Print connection status changes until Ctrl-C
  Watch,
  /// Manage the local cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Remove every cached query
  Clear,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Resource {
  Regions,
  Sectors,
  Schools,
  Users,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging)?;

  let backend: Arc<dyn RemoteBackend> = Arc::new(RestBackend::new(&config)?);

  match args.command {
    Command::Status => status(backend, &config).await,
    Command::Watch => watch(backend, &config).await,
    Command::List {
      resource,
      parent,
      page,
    } => {
      let listing = Listing::parse(resource, parent)?;
      let connectivity = Arc::new(OfflineFlag::new(args.offline));
      let client = InfoLineClient::from_config(&config, backend, connectivity)?;
      list(client, listing, page).await
    }
    Command::Cache {
      action: CacheAction::Clear,
    } => {
      let client = InfoLineClient::from_config(&config, backend, Arc::new(AlwaysOnline))?;
      client.clear_cache();
      println!("Cache cleared");
      Ok(())
    }
  }
}

async fn status(backend: Arc<dyn RemoteBackend>, config: &Config) -> Result<()> {
  let monitor = ConnectionMonitor::new(backend, MonitorOptions::from(&config.monitor));
  let reachable = monitor.check_connection().await;
  let state = monitor.state();

  let latency = state
    .last_latency
    .map(|l| format!("{} ms", l.as_millis()))
    .unwrap_or_else(|| "-".to_string());
  println!("{} (probe latency {})", state.status, latency);

  if reachable {
    Ok(())
  } else {
    Err(eyre!("Backend at {} is unreachable", config.backend.url))
  }
}

async fn watch(backend: Arc<dyn RemoteBackend>, config: &Config) -> Result<()> {
  let monitor = ConnectionMonitor::new(backend, MonitorOptions::from(&config.monitor));
  let mut rx = monitor.subscribe();
  monitor.start()?;

  let mut last = ConnectionStatus::Unknown;
  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      changed = rx.changed() => {
        if changed.is_err() {
          break;
        }
        let state = rx.borrow_and_update().clone();
        if state.status != last {
          let at = state
            .last_checked
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_default();
          println!("{} {} -> {}", at, last, state.status);
          last = state.status;
        }
      }
    }
  }

  monitor.stop().await;
  Ok(())
}

/// A listing with its arguments checked.
#[derive(Debug, Clone)]
enum Listing {
  Regions,
  Sectors(String),
  Schools(String),
  Users(Option<UserRole>),
}

impl Listing {
  fn parse(resource: Resource, parent: Option<String>) -> Result<Self> {
    Ok(match resource {
      Resource::Regions => Self::Regions,
      Resource::Sectors => Self::Sectors(
        parent.ok_or_else(|| eyre!("--parent <region id> is required for sectors"))?,
      ),
      Resource::Schools => Self::Schools(
        parent.ok_or_else(|| eyre!("--parent <sector id> is required for schools"))?,
      ),
      Resource::Users => Self::Users(
        parent
          .as_deref()
          .map(str::parse::<UserRole>)
          .transpose()
          .map_err(|e| eyre!(e))?,
      ),
    })
  }
}

async fn list(client: InfoLineClient, listing: Listing, page: u64) -> Result<()> {
  let mut query = Query::new(move || {
    let client = client.clone();
    let listing = listing.clone();
    async move { fetch_lines(&client, &listing, page).await }
  });

  query.fetch();
  // Retries back off for seconds, so say why nothing is printed yet
  if tokio::time::timeout(SLOW_FETCH, query.settle()).await.is_err() {
    eprintln!("Waiting for the backend...");
  }

  if query.settle().await == QueryStatus::Failed {
    if let Some(e) = query.error() {
      return Err(eyre!("{}", e));
    }
  }

  if let Some(result) = query.result() {
    if query.is_degraded() {
      eprintln!("warning: backend unavailable, showing {} data", result.source);
    }
    eprintln!("{} rows from {}", result.data.len(), result.source);
    for line in &result.data {
      println!("{}", line);
    }
  }
  Ok(())
}

async fn fetch_lines(
  client: &InfoLineClient,
  listing: &Listing,
  page: u64,
) -> Result<CacheResult<Vec<String>>, QueryError> {
  fn lines<T: Display>(result: CacheResult<Vec<T>>) -> CacheResult<Vec<String>> {
    result.map(|rows| rows.iter().map(ToString::to_string).collect())
  }

  Ok(match listing {
    Listing::Regions => lines(client.list_regions(page).await?),
    Listing::Sectors(region) => lines(client.list_sectors(region, page).await?),
    Listing::Schools(sector) => lines(client.list_schools(sector, page).await?),
    Listing::Users(role) => lines(client.list_users(*role, page).await?),
  })
}

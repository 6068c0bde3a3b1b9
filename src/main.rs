use catsync::cache::{MemoryCache, NoopStorage, SliceStorage, SqliteStorage, SystemClock};
use catsync::catalog::{CatalogClient, CatalogRecord, HttpTransport, StaticTokenSession};
use catsync::config::Config;
use catsync::logging::{self, LogTarget};
use catsync::sync::{LoadStart, SyncEvent, SyncOrchestrator, ViewUpdate};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "catsync")]
#[command(about = "Browse a remote media catalog through an offline-first cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/catsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(long)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List the children of a parent, loading more pages on demand
  Browse {
    parent: String,
    /// Number of pages to load
    #[arg(long, default_value_t = 1)]
    pages: u32,
  },
  /// Print what the disk cache holds for a parent, without network access
  Show { parent: String },
  /// Drop the cached listing of a parent
  Invalidate { parent: String },
  /// Drop every cached listing
  Reset,
  /// Warm the cache for several parents
  Prefetch {
    #[arg(required = true)]
    parents: Vec<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let target = if args.log_stderr {
    LogTarget::Stderr
  } else {
    LogTarget::File
  };
  let _guard = logging::init(&config.logging, target)?;

  match args.command {
    Command::Browse { parent, pages } => browse(&config, &parent, pages).await,
    Command::Show { parent } => {
      let slice = open_storage(&config)
        .read(&parent, 0, 0)
        .map_err(|e| eyre!("Failed to read cache: {}", e))?;
      if slice.updated_at_ms == 0 {
        println!("{}: not cached", parent);
      } else {
        println!(
          "{}: {} of {} items, cached at {}",
          parent,
          slice.items.len(),
          slice.total_count,
          format_timestamp(slice.updated_at_ms)
        );
        print_items(&slice.items);
      }
      Ok(())
    }
    Command::Invalidate { parent } => {
      open_storage(&config)
        .clear_parent(&parent)
        .map_err(|e| eyre!("Failed to invalidate {}: {}", parent, e))?;
      println!("Invalidated {}", parent);
      Ok(())
    }
    Command::Reset => {
      open_storage(&config)
        .clear_all()
        .map_err(|e| eyre!("Failed to reset cache: {}", e))?;
      println!("Cache cleared");
      Ok(())
    }
    Command::Prefetch { parents } => {
      let (mut orchestrator, _events, _views) = build(&config)?;
      let report = orchestrator.prefetch(&parents).await;
      for (request, result) in &report.outcomes {
        match result {
          Ok(_) => println!("{}: ok", request.parent_id),
          Err(e) => println!("{}: {}", request.parent_id, e),
        }
      }
      Ok(())
    }
  }
}

/// Open the disk tier, falling back to memory-only when it is unavailable.
fn open_storage(config: &Config) -> Arc<dyn SliceStorage> {
  if !config.cache.enabled {
    return Arc::new(NoopStorage);
  }
  let Some(path) = config.cache.path.clone().or_else(SqliteStorage::default_path) else {
    warn!("Could not determine cache location; running memory-only");
    return Arc::new(NoopStorage);
  };
  match SqliteStorage::open(&path) {
    Ok(storage) => Arc::new(storage),
    Err(e) => {
      warn!(error = %e, "Disk cache unavailable; running memory-only");
      Arc::new(NoopStorage)
    }
  }
}

type Built = (
  SyncOrchestrator<HttpTransport>,
  mpsc::UnboundedReceiver<SyncEvent>,
  mpsc::UnboundedReceiver<ViewUpdate>,
);

fn build(config: &Config) -> Result<Built> {
  let transport = HttpTransport::new(config.server_url()?)
    .map_err(|e| eyre!("Failed to create HTTP transport: {}", e))?;
  let session = Arc::new(StaticTokenSession::new(Config::get_api_token()));
  let client = CatalogClient::new(transport, session, config.client_options());

  let cache = MemoryCache::new(
    open_storage(config),
    Arc::new(SystemClock),
    config.cache.fresh_ttl(),
    config.cache.stale_ttl(),
  );

  let (view_tx, view_rx) = mpsc::unbounded_channel();
  let (orchestrator, events) =
    SyncOrchestrator::new(client, cache, config.sync_options(), view_tx);
  Ok((orchestrator, events, view_rx))
}

/// Control loop: fold fetch completions in until nothing is pending.
async fn browse(config: &Config, parent: &str, pages: u32) -> Result<()> {
  let (mut orchestrator, mut events, mut views) = build(config)?;

  orchestrator.load(parent);
  let mut pages_left = pages.saturating_sub(1);

  loop {
    while let Ok(update) = views.try_recv() {
      print_update(&update);
    }

    if !orchestrator.has_pending() {
      if pages_left == 0 {
        break;
      }
      pages_left -= 1;
      match orchestrator.load_more(parent) {
        LoadStart::Fetching => continue,
        _ => break,
      }
    }

    match events.recv().await {
      Some(event) => orchestrator.handle_event(event),
      None => break,
    }
  }

  while let Ok(update) = views.try_recv() {
    print_update(&update);
  }
  Ok(())
}

fn print_update(update: &ViewUpdate) {
  match update {
    ViewUpdate::Loading { parent_id, loading } => {
      if *loading {
        println!("[{}] loading...", parent_id);
      }
    }
    ViewUpdate::ItemsReplaced {
      parent_id,
      items,
      total_count,
      source,
    } => {
      println!(
        "[{}] {} of {} items ({:?})",
        parent_id,
        items.len(),
        total_count,
        source
      );
      print_items(items);
    }
    ViewUpdate::ItemsAppended {
      parent_id, items, ..
    } => {
      println!("[{}] +{} items", parent_id, items.len());
      print_items(items);
    }
    ViewUpdate::TotalCountChanged {
      parent_id,
      total_count,
    } => println!("[{}] total is now {}", parent_id, total_count),
    ViewUpdate::LoadError { parent_id, error } => {
      let hint = if error.is_retryable() {
        " (retry later)"
      } else {
        ""
      };
      eprintln!("[{}] error: {}{}", parent_id, error, hint);
    }
  }
}

fn print_items(items: &[CatalogRecord]) {
  for item in items {
    let name = item
      .payload
      .get("Name")
      .and_then(|v| v.as_str())
      .unwrap_or("");
    let kind = item.kind.as_deref().unwrap_or("-");
    println!("  {:<36} {:<16} {}", item.id, kind, name);
  }
}

fn format_timestamp(ms: i64) -> String {
  chrono::DateTime::from_timestamp_millis(ms)
    .map(|dt| dt.to_rfc3339())
    .unwrap_or_else(|| ms.to_string())
}

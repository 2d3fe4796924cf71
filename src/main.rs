use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use xrate::app::App;
use xrate::commands;
use xrate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "xrate")]
#[command(about = "Exchange rates from the terminal, throttled and cached")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/xrate/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Latest rates, served from cache inside the throttle window
  Latest {
    /// Print the raw snapshot as JSON
    #[arg(long)]
    json: bool,

    /// Show every currency instead of the default set
    #[arg(long)]
    all: bool,
  },
  /// Fetch fresh rates, ignoring the throttle window
  Refresh,
  /// Convert an amount between currencies
  Convert {
    amount: f64,
    from: String,
    /// Target currencies (default: USD JPY CNY HKD TWD)
    to: Vec<String>,
  },
  /// Inspect or maintain the response cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Remove expired entries and shrink the cache to its size limit
  Sweep,
  /// Delete every cached response
  Clear,
  /// Print the cache directory
  Path,
}

/// Logs go to stderr unless a file is configured. The returned guard must
/// outlive every log call.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_env("XRATE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

  match log_file {
    Some(path) => {
      let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
      let name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      std::fs::create_dir_all(dir)?;

      let appender = tracing_appender::rolling::never(dir, name);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let log_file = args.log_file.or_else(|| config.logging.file.clone());
  let _guard = init_tracing(log_file.as_deref())?;

  let app = App::new(config)?;

  match args.command {
    Command::Latest { json, all } => commands::latest(&app, json, all).await,
    Command::Refresh => commands::refresh(&app).await,
    Command::Convert { amount, from, to } => commands::convert_amount(&app, amount, &from, &to).await,
    Command::Cache { action } => match action {
      CacheAction::Sweep => commands::cache_sweep(&app).await,
      CacheAction::Clear => commands::cache_clear(&app).await,
      CacheAction::Path => {
        commands::cache_path(&app);
        Ok(())
      }
    },
  }
}

use bookshelf::cache::{SqliteStore, SystemClock};
use bookshelf::catalog::{BooksRepository, CatalogClient};
use bookshelf::{commands, config, logging};
use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "bookshelf")]
#[command(about = "Browse a remote book catalog, offline first")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/bookshelf/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Catalog endpoint, overriding config and BOOKSHELF_API_URL
  #[arg(long)]
  api_url: Option<String>,

  /// Log to stderr instead of the log file
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// All lists with a preview of each (default)
  Home {
    /// Exit after this long without changes
    #[arg(long, default_value_t = 2000)]
    idle_ms: u64,
  },
  /// Every book of one list
  List {
    id: i64,
    #[arg(long, default_value_t = 2000)]
    idle_ms: u64,
  },
  /// Full details of one book
  Book {
    id: i64,
    #[arg(long, default_value_t = 2000)]
    idle_ms: u64,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration; the flag beats the environment
  let config = config::Config::load(args.config.as_deref())?.with_api_url(args.api_url);

  let _guard = logging::init(&config.log, args.verbose)?;

  let cache_path = config.cache_path()?;
  info!(path = %cache_path.display(), api = %config.api.base_url, "Starting bookshelf");

  let store = Arc::new(SqliteStore::open(&cache_path)?);
  let client = Arc::new(CatalogClient::new(&config)?);
  let repo = BooksRepository::new(client, store, Arc::new(SystemClock), config.staleness());

  let mut out = std::io::stdout();
  match args.command.unwrap_or(Command::Home { idle_ms: 2000 }) {
    Command::Home { idle_ms } => {
      commands::run_home(
        repo,
        config.home.preview_limit,
        Duration::from_millis(idle_ms),
        &mut out,
      )
      .await?
    }
    Command::List { id, idle_ms } => {
      commands::run_list(repo, id, Duration::from_millis(idle_ms), &mut out).await?
    }
    Command::Book { id, idle_ms } => {
      commands::run_book(repo, id, Duration::from_millis(idle_ms), &mut out).await?
    }
  }

  Ok(())
}

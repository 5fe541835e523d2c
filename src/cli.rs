use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::auth::{CredentialProvider, FileCredentialProvider};
use crate::beatport::CatalogClient;
use crate::config::{self, Config, ConfigError};
use crate::db::{self, LibraryDb};
use crate::prompt::{AutoAccept, DecisionProvider, TerminalPrompt};
use crate::sync::{self, StopReason};
use crate::types::TrackFilter;

const USER_AGENT: &str = concat!("beatport-sync/", env!("CARGO_PKG_VERSION"));

#[derive(Parser)]
#[command(name = "beatport-sync", version, about = "Sync Mixxx track genres from Beatport")]
struct Cli {
    /// Config file (default: ~/.beatport-sync.config.yml)
    #[arg(long, global = true, env = "BEATPORT_SYNC_CONFIG")]
    config: Option<PathBuf>,
    /// Debug logging for this tool
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Look up each track on Beatport and update its genre
    Sync(SyncArgs),
    /// Show library location, track count, crates and genres
    Stats(StatsArgs),
    /// Create the config file and check the Beatport credentials
    Init,
}

#[derive(clap::Args)]
struct SyncArgs {
    /// Only tracks in these crates (comma separated)
    #[arg(short, long, value_delimiter = ',')]
    crates: Vec<String>,
    /// Only tracks with these current genres (comma separated)
    #[arg(short, long, value_delimiter = ',')]
    genres: Vec<String>,
    /// Write every differing genre without asking
    #[arg(short, long)]
    auto_accept: bool,
    /// Path to mixxxdb.sqlite
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[derive(clap::Args)]
struct StatsArgs {
    /// Path to mixxxdb.sqlite
    #[arg(short, long)]
    database: Option<PathBuf>,
}

pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_path()?,
    };

    let config_verbose = Config::load(&config_path)
        .map(|c| c.options.verbose)
        .unwrap_or(false);
    init_logging(cli.verbose || config_verbose)?;

    match cli.command {
        Command::Sync(args) => sync(&config_path, args).await,
        Command::Stats(args) => stats(&config_path, args.database.as_deref()),
        Command::Init => init(&config_path).await,
    }
}

fn build_filter(verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = if verbose { "debug" } else { "warn" };
    EnvFilter::new(format!(
        "warn,{}={level}",
        env!("CARGO_PKG_NAME").replace('-', "_")
    ))
}

fn init_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(build_filter(verbose))
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

/// Split-on-comma leaves stray spaces and empty entries behind.
fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn load_config_or_default(path: &Path) -> Result<Config, ConfigError> {
    match Config::load(path) {
        Err(ConfigError::Missing(_)) => Ok(Config::default()),
        other => other,
    }
}

fn open_library(database: Option<&Path>, config: &Config) -> Result<LibraryDb, Box<dyn std::error::Error>> {
    let db_path = db::resolve_db_path(database, &config.database.path).ok_or(
        "Cannot find the Mixxx database. Pass --database or set MIXXX_DB_PATH.",
    )?;
    Ok(LibraryDb::open(&db_path)?)
}

fn http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()
}

async fn sync(config_path: &Path, args: SyncArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(config_path)?;
    if !config.has_credentials() {
        return Err(format!(
            "No Beatport access token in {}. Run `beatport-sync init` for instructions.",
            config_path.display()
        )
        .into());
    }

    let filter = TrackFilter::new(clean_list(args.crates), clean_list(args.genres));
    let db = open_library(args.database.as_deref(), &config)?;
    eprintln!("Library: {}", db.path().display());

    let http = http_client()?;
    let min_interval = Duration::from_millis(config.options.rate_limit_ms);
    let credentials: Arc<dyn CredentialProvider> = Arc::new(FileCredentialProvider::new(
        http.clone(),
        config,
        config_path.to_path_buf(),
    ));
    let mut catalog = CatalogClient::with_min_interval(http, credentials, min_interval);
    let mut decisions: Box<dyn DecisionProvider> = if args.auto_accept {
        Box::new(AutoAccept)
    } else {
        Box::new(TerminalPrompt)
    };

    let report = sync::run(
        db,
        &filter,
        &mut catalog,
        &mut *decisions,
        args.auto_accept,
    )
    .await?;

    match report.stop {
        StopReason::AuthFailed(reason) => Err(format!(
            "Beatport authentication failed: {reason}. Run `beatport-sync init` to check your tokens."
        )
        .into()),
        StopReason::Completed | StopReason::Quit => Ok(()),
    }
}

fn stats(config_path: &Path, database: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config_or_default(config_path)?;
    let mut db = open_library(database, &config)?;

    let total = db.track_count()?;
    let crates = db.crates()?;
    let genres = db.genres()?;
    db.close();

    println!("Library: {}", db.path().display());
    println!("Tracks:  {total}");
    println!("\nCrates ({}):", crates.len());
    for name in &crates {
        println!("  {name}");
    }
    println!("\nGenres ({}):", genres.len());
    for name in &genres {
        println!("  {name}");
    }
    Ok(())
}

async fn init(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if config::write_template(config_path)? {
        println!("Created {}", config_path.display());
    } else {
        println!("Config already exists at {}", config_path.display());
    }

    let config = Config::load(config_path)?;
    if config.has_credentials() {
        let provider =
            FileCredentialProvider::new(http_client()?, config, config_path.to_path_buf());
        if provider.validate().await {
            println!("Beatport access token is valid.");
            return Ok(());
        }
        println!("Beatport access token was rejected.");
    } else {
        println!("No Beatport access token configured.");
    }

    println!(
        "\nTo get tokens:\n  1. Log in at https://api.beatport.com/v4/docs/\n  2. Copy client_id, access_token and refresh_token from the token response\n  3. Paste them into {}",
        config_path.display()
    );
    Ok(())
}

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pithy::config::Config;
use pithy::feed::Fetcher;
use pithy::refresh::{FeedRefresher, RoundSummary, Scheduler};
use pithy::storage::{Database, DatabaseError};
use pithy::util::validate_feed_url;

/// Get the config directory path (~/.config/pithy/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("pithy"))
}

/// Create the config directory if needed and restrict it to the current user.
fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }
    Ok(())
}

fn print_summary(summary: &RoundSummary) {
    println!(
        "Refreshed {} feeds: {} updated ({} new items), {} unchanged, {} failed, {} not recorded",
        summary.total(),
        summary.updated,
        summary.new_items,
        summary.unchanged,
        summary.failed,
        summary.record_errors
    );
}

#[derive(Parser, Debug)]
#[command(name = "pithy", about = "Background refresher for RSS and Atom subscriptions")]
struct Args {
    /// Config file (default: ~/.config/pithy/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database file, overriding `database_path` in the config
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Run a single refresh round, print its summary and exit
    #[arg(long)]
    once: bool,

    /// Subscribe a user to a feed URL before refreshing
    #[arg(long, value_name = "URL")]
    subscribe: Option<String>,

    /// User the --subscribe flag acts for
    #[arg(long, value_name = "ID", default_value_t = 1, requires = "subscribe")]
    user: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    ensure_config_dir(&config_dir)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = args
        .database
        .clone()
        .or_else(|| config.database_path.clone())
        .unwrap_or_else(|| config_dir.join("pithy.db"));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of pithy appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    if let Some(url) = &args.subscribe {
        let url = validate_feed_url(url).context("Refusing to subscribe")?;
        let feed_id = db
            .subscribe(args.user, &url)
            .await
            .context("Failed to subscribe")?;
        println!("User {} subscribed to feed {} ({})", args.user, feed_id, url);
    }

    let fetcher = Fetcher::new(config.fetcher_config()).context("Failed to build HTTP client")?;
    let repo = Arc::new(db);
    let refresher = Arc::new(FeedRefresher::new(fetcher, repo.clone()));
    let scheduler = Scheduler::new(repo, refresher, config.scheduler_config());

    if args.once {
        let summary = scheduler
            .run_round()
            .await
            .context("Failed to list stale feeds")?;
        print_summary(&summary);
        return Ok(());
    }

    tokio::select! {
        () = scheduler.run() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Shutting down");
        }
    }
    Ok(())
}

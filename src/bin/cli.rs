use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spotify_playlist_dedup as lib;
use lib::api::{spotify::SpotifyWebApi, SpotifyApi};
use lib::auth::SessionManager;
use lib::config::Config;
use lib::dedup::DuplicateResolver;
use lib::store::SqliteStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::subscriber as tracing_subscriber_global;
use tracing_appender::rolling::RollingFileAppender;
use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "spotify-playlist-dedup", version)]
struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize a Spotify account and store its tokens (interactive)
    Login,
    /// Remove the current account's authorization
    Logout,
    /// List stored accounts
    Accounts,
    /// Make another stored account the active one
    Switch {
        /// User id of the account to activate
        #[arg(long)]
        user: String,
    },
    /// Find and remove duplicate items in a playlist
    Dedup {
        /// Playlist id to deduplicate
        playlist_id: String,

        /// List duplicates but do not remove anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate config file and exit
    ConfigValidate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // Resolve config path: explicit --config overrides; otherwise prefer
    // the per-user config dir and fall back to the repository example
    // config for local/dev usage.
    let resolved_config_path: PathBuf = match &cli.config {
        Some(p) => p.clone(),
        None => {
            let user_path = dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("spotify-playlist-dedup/config.toml");
            if user_path.exists() {
                user_path
            } else {
                PathBuf::from("config/example-config.toml")
            }
        }
    };

    let cfg = Config::from_path(&resolved_config_path)
        .with_context(|| format!("loading config from {}", resolved_config_path.display()))?;

    // Initialize log->tracing bridge and structured logging.
    // Logs go to both stdout and a daily-rotated file in cfg.log_dir.
    let _ = LogTracer::init();
    let file_appender: RollingFileAppender =
        tracing_appender::rolling::daily(&cfg.log_dir, "spotify-playlist-dedup.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Honor RUST_LOG if set, otherwise default to info.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer().with_writer(non_blocking);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer);

    tracing_subscriber_global::set_global_default(subscriber)
        .expect("failed to set global tracing subscriber");

    if let Commands::ConfigValidate = cli.command {
        match Config::from_path(Path::new(&resolved_config_path)) {
            Ok(_) => println!("OK"),
            Err(e) => {
                eprintln!("Config validation failed: {}", e);
                std::process::exit(2);
            }
        }
        return Ok(());
    }

    let store = Arc::new(
        SqliteStore::open(&cfg.db_path)
            .with_context(|| format!("opening credential store {}", cfg.db_path.display()))?,
    );
    let client_secret = {
        let trimmed = cfg.client_secret.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    };
    let api: Arc<dyn SpotifyApi> =
        Arc::new(SpotifyWebApi::new(cfg.client_id.clone(), client_secret));
    let session = SessionManager::new(&cfg, api.clone(), store)?;

    match cli.command {
        Commands::Login => {
            run_login(&session).await?;
        }
        Commands::Logout => {
            if !session.is_authorized().await {
                eprintln!("No account is currently authorized.");
                std::process::exit(1);
            }
            session.deauthorize().await?;
            println!("Logged out.");
        }
        Commands::Accounts => {
            let set = session.accounts().await;
            if set.is_empty() {
                println!("No stored accounts. Run `login` first.");
                return Ok(());
            }
            println!("Stored accounts:");
            for account in &set.accounts {
                let marker = if set.current.as_deref() == Some(account.user_id.as_str()) {
                    "*"
                } else {
                    " "
                };
                let name = account.display_name.as_deref().unwrap_or("-");
                println!("{} {} ({})", marker, account.user_id, name);
            }
        }
        Commands::Switch { user } => match session.switch_account(&user).await {
            Ok(account) => {
                println!(
                    "Switched to account {} ({})",
                    account.user_id,
                    account.display_name.as_deref().unwrap_or("-")
                );
            }
            Err(e) => {
                eprintln!("Couldn't switch account: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Dedup {
            playlist_id,
            dry_run,
        } => {
            if !session.is_authorized().await {
                eprintln!("Not authorized. Run `login` first.");
                std::process::exit(1);
            }
            // Long scans can outlive the access token; keep it fresh.
            session.schedule_auto_refresh().await;
            let resolver = DuplicateResolver::new(session.clone(), api.clone(), &cfg);

            if dry_run {
                let candidates = resolver.find_duplicates(&playlist_id).await?;
                if candidates.is_empty() {
                    println!("Playlist {} does not have any duplicates.", playlist_id);
                    return Ok(());
                }
                println!("{} duplicate(s) found:", candidates.len());
                for c in &candidates {
                    println!("- {} at position {}", c.uri, c.position);
                }
                println!("Dry run: nothing was removed.");
            } else {
                match resolver.find_and_remove(&playlist_id).await {
                    Ok(summary) if summary.removed == 0 => {
                        println!("Playlist {} does not have any duplicates.", playlist_id);
                    }
                    Ok(summary) => {
                        println!(
                            "Removed {} duplicate(s) from {} in {} batch(es).",
                            summary.removed, playlist_id, summary.batches_applied
                        );
                    }
                    Err(e) => {
                        eprintln!("Couldn't remove duplicates from {}: {}", playlist_id, e);
                        std::process::exit(1);
                    }
                }
            }
        }
        Commands::ConfigValidate => unreachable!("handled above"),
    }

    Ok(())
}

async fn run_login(session: &SessionManager) -> Result<()> {
    use std::io;

    let url = session.begin_authorization().await?;
    println!(
        "Open this URL in your browser and authorize the application:\n\n{}\n",
        url
    );
    println!("After authorizing, you'll be redirected to the configured redirect URI.");
    println!("Copy the full redirect URL and paste it here.");
    println!("Paste redirect URL:");
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    match session.complete_authorization(input).await {
        Ok(account) => {
            println!(
                "Authorized as {} ({}).",
                account.user_id,
                account.display_name.as_deref().unwrap_or("-")
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Couldn't authorize: {}", e);
            std::process::exit(1);
        }
    }
}

//! Kaibora - offline host for the Kaibora guide front-end.
//!
//! Installs the application shell into a durable cache, serves it through a
//! cache-first local proxy, and submits adventurer registrations.

mod proxy;

use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kaibora_core::cache::{CacheStorage, CacheStore, DiskStorage};
use kaibora_core::models::RegistrationForm;
use kaibora_core::registration::{LocalStorage, RegistrationClient};
use kaibora_core::{AssetRequest, Config, HttpFetcher, Method, OfflineCacheManager};

/// Overrides the configured origin when set
const ORIGIN_ENV: &str = "KAIBORA_ORIGIN";

pub type Manager = OfflineCacheManager<DiskStorage, HttpFetcher>;

#[derive(Parser, Debug)]
#[command(name = "kaibora")]
#[command(about = "Offline cache and registration for the Kaibora guide")]
#[command(version)]
struct Args {
    /// Path to config file (default: $XDG_CONFIG_HOME/kaibora/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cache the application shell and activate the current cache generation
    Install,

    /// Resolve one request through the offline cache
    Fetch {
        /// Absolute URL, or a path relative to the origin
        target: String,

        #[arg(short = 'X', long, default_value = "GET")]
        method: Method,

        /// Write the body here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Serve the application through a cache-first local proxy
    Serve {
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
    },

    /// List cache generations and their entries
    List,

    /// Register an adventurer with the guild backend
    Register {
        #[arg(long)]
        adventurer: String,

        #[arg(long)]
        player: String,

        #[arg(long = "class")]
        origin_class: String,

        #[arg(long)]
        motivation: String,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid log file path: {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = Config::load(path)?;
    if let Ok(origin) = std::env::var(ORIGIN_ENV) {
        config.origin = origin;
    }
    Ok(config)
}

fn build_manager(config: &Config) -> Result<Manager> {
    let storage = DiskStorage::new(config.cache_dir()?);
    let fetcher = HttpFetcher::with_timeout(config.request_timeout())
        .context("Failed to build HTTP client")?;
    Ok(OfflineCacheManager::new(storage, fetcher, config.cache_settings()?))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let _guard = init_tracing(args.log_file.as_deref())?;
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Install => install(&config).await,
        Command::Fetch {
            target,
            method,
            output,
        } => fetch(&config, &target, method, output.as_deref()).await,
        Command::Serve { listen } => serve(&config, listen).await,
        Command::List => list(&config).await,
        Command::Register {
            adventurer,
            player,
            origin_class,
            motivation,
        } => {
            let form = RegistrationForm {
                adventurer_name: adventurer,
                player_name: player,
                origin_class,
                motivation,
            };
            register(&config, &form).await
        }
    }
}

async fn install(config: &Config) -> Result<()> {
    let manager = build_manager(config)?;
    let report = manager.install().await.context("Install failed")?;
    let removed = manager.activate().await?;

    println!("Cached {} assets in {}", report.stored.len(), report.cache_name);
    for key in &report.stored {
        println!("  {}", key.url);
    }
    for name in removed {
        println!("Removed stale cache {}", name);
    }
    Ok(())
}

async fn fetch(config: &Config, target: &str, method: Method, output: Option<&Path>) -> Result<()> {
    let manager = build_manager(config)?;
    // Reuse whatever an earlier install left; cleanup belongs to install
    manager.resume();

    let url = manager
        .settings()
        .origin
        .join(target)
        .with_context(|| format!("Invalid target: {}", target))?;
    let resolution = manager.handle(AssetRequest::new(method, url.clone())).await?;
    let source = resolution.source();
    let Some(response) = resolution.into_response() else {
        anyhow::bail!("{} is not cached and the network is unavailable", url);
    };

    if let Some(source) = source {
        eprintln!("{} {} [{}]", response.status, url, source.as_str());
    }
    match output {
        Some(path) => std::fs::write(path, &response.body)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => io::stdout().write_all(&response.body)?,
    }
    Ok(())
}

async fn serve(config: &Config, listen: SocketAddr) -> Result<()> {
    let manager = Arc::new(build_manager(config)?);

    // A failed install leaves the manager inactive: requests pass straight to
    // the network until a later run installs successfully.
    match manager.install().await {
        Ok(report) => {
            info!(cache = %report.cache_name, stored = report.stored.len(), "Installed");
            manager.activate().await?;
        }
        Err(e) => warn!(error = %e, "Install failed, serving without offline cache"),
    }

    proxy::serve(manager, listen).await
}

async fn list(config: &Config) -> Result<()> {
    let storage = DiskStorage::new(config.cache_dir()?);
    let names = storage.names().await?;
    if names.is_empty() {
        println!("No caches in {}", storage.root().display());
        return Ok(());
    }

    for name in names {
        let marker = if name == config.cache_name { " (current)" } else { "" };
        println!("{}{}", name, marker);

        let store = storage.open(&name).await?;
        for key in store.keys().await? {
            if let Some(entry) = store.lookup(&key).await? {
                println!(
                    "  {:>3} {:>8}B {:>9}  {}",
                    entry.response.status,
                    entry.response.body.len(),
                    entry.age_display(),
                    key
                );
            }
        }
    }
    Ok(())
}

async fn register(config: &Config, form: &RegistrationForm) -> Result<()> {
    let client = RegistrationClient::with_timeout(config.registration_endpoint()?, config.request_timeout())?;
    let mut local = LocalStorage::open(config.data_dir()?)?;

    match client.register(form, &mut local).await {
        Ok(registered) => {
            println!("Welcome, {}! Continue at {}", registered.adventurer_name, registered.redirect);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            Err(e.into())
        }
    }
}

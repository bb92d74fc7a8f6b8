//! Binary entrypoint for the warpgate CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml` and create the location database
//! - `status [--json]` - print how many homes and warps are stored
//! - `warps` - list warps with their positions
//! - `homes <owner>` - list the homes of one player (UUID)
//!
//! The teleport core itself is a library (`warpgate::teleport`) embedded by the game host.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use warpgate::config::Config;
use warpgate::teleport::{ActorId, LocationStore, SledLocationBackend};

#[derive(Parser)]
#[command(name = "warpgate")]
#[command(about = "Homes, warps and deferred teleports for game servers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and create the database
    Init,
    /// Show stored home and warp counts
    Status {
        /// Print machine-readable JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List all warps
    Warps,
    /// List the homes of one player
    Homes {
        /// Player UUID
        owner: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Some(Config::load(&cli.config).await?),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Init => {
            info!("Initializing new warpgate configuration");
            if tokio::fs::metadata(&cli.config).await.is_ok() {
                warn!("{} already exists; leaving it untouched", cli.config);
            } else {
                Config::create_default(&cli.config).await?;
                info!("Configuration file created at {}", cli.config);
            }
            let config = Config::load(&cli.config).await?;
            let store = open_store(&config)?;
            let (owners, homes) = store.home_totals();
            info!(
                "Location database ready at {} ({} homes for {} owners, {} warps)",
                config.db_path().display(),
                homes,
                owners,
                store.list_warps().len()
            );
        }
        Commands::Status { json } => {
            let config = require_config(pre_config)?;
            let store = open_store(&config)?;
            let (owners, homes) = store.home_totals();
            let warps = store.list_warps().len();
            if json {
                let payload = serde_json::json!({
                    "db_path": config.db_path().display().to_string(),
                    "owners": owners,
                    "homes": homes,
                    "warps": warps,
                    "teleport_delay": config.teleport.teleport_delay,
                    "max_homes": config.teleport.max_homes,
                    "tpa_timeout": config.teleport.tpa_timeout,
                });
                println!("{}", payload);
            } else {
                println!("warpgate v{}", env!("CARGO_PKG_VERSION"));
                println!("Database:      {}", config.db_path().display());
                println!("Homes:         {} ({} owners)", homes, owners);
                println!("Warps:         {}", warps);
                println!(
                    "Defaults:      delay {}s, {} homes, request timeout {}s",
                    config.teleport.teleport_delay,
                    config.teleport.max_homes,
                    config.teleport.tpa_timeout
                );
            }
        }
        Commands::Warps => {
            let config = require_config(pre_config)?;
            let store = open_store(&config)?;
            let warps = store.list_warps();
            if warps.is_empty() {
                println!("No warps set.");
            }
            for (name, warp) in warps {
                println!("{:<20} {} ({})", name, warp.position, warp.dimension);
            }
        }
        Commands::Homes { owner } => {
            let config = require_config(pre_config)?;
            let owner: ActorId = owner
                .parse()
                .map_err(|e| anyhow!("Invalid player UUID '{}': {}", owner, e))?;
            let store = open_store(&config)?;
            let homes = store.list_homes(owner);
            if homes.is_empty() {
                println!("{} has no homes.", owner);
            }
            for (name, home) in homes {
                println!("{:<20} {} ({})", name, home.position, home.dimension);
            }
        }
    }

    Ok(())
}

fn require_config(config: Option<Config>) -> Result<Config> {
    config.ok_or_else(|| anyhow!("Configuration was not loaded"))
}

fn open_store(config: &Config) -> Result<LocationStore> {
    let backend = SledLocationBackend::open(config.db_path())?;
    Ok(LocationStore::open(Box::new(backend))?)
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins over the configured level
    let configured = config
        .as_ref()
        .and_then(|cfg| cfg.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    match log_file {
        Some(file) => {
            let file = std::sync::Mutex::new(file);
            // Echo to the console only when someone is watching it
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}

//! Binary entrypoint for the MeshBaba CLI.
//!
//! Commands:
//! - `start [--port <path>] [--dry-run]` - run the node, talking to a Meshtastic device
//!   (or only logging what would be sent)
//! - `init` - create a starter `config.toml`
//! - `status` - print this node's identity and a summary of the peer database
//!
//! See the library crate docs for module-level details: `meshbaba::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};

use meshbaba::config::Config;
use meshbaba::identity::build_identity;
use meshbaba::meshtastic::role_name;
use meshbaba::node::MeshNode;
use meshbaba::storage::{JsonPeerFile, PeerPersistence};

#[derive(Parser)]
#[command(name = "meshbaba")]
#[command(about = "Autoresponder and node controller for Meshtastic mesh networks")]
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
    /// Start the node
    Start {
        /// Meshtastic device port (e.g., /dev/ttyUSB0), overrides the config
        #[arg(short, long)]
        port: Option<String>,

        /// Do not open the device; log outgoing packets instead
        #[arg(long)]
        dry_run: bool,
    },
    /// Write a new configuration file
    Init,
    /// Show node identity and peer database summary
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { port, dry_run } => {
            let config = Config::load(&cli.config).await?;
            init_logging(Some(&config), cli.verbose);
            info!("Starting MeshBaba v{}", env!("CARGO_PKG_VERSION"));

            let node = MeshNode::open(config).await?;
            if dry_run {
                node.run_dry().await?;
            } else {
                node.run_serial(port).await?;
            }
        }
        Commands::Init => {
            init_logging(None, cli.verbose);
            if std::path::Path::new(&cli.config).exists() {
                warn!(
                    "Configuration file {} already exists, not overwriting",
                    cli.config
                );
                return Ok(());
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Status => {
            let config = Config::load(&cli.config).await?;
            init_logging(Some(&config), cli.verbose);
            show_status(&config)?;
        }
    }

    Ok(())
}

fn show_status(config: &Config) -> Result<()> {
    let identity = build_identity(config)?;
    println!("MeshBaba v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "Node: {} {} '{}' ({})",
        identity.user_id(),
        identity.short_name,
        identity.long_name,
        role_name(identity.role)
    );
    if let Some(pos) = identity.position {
        println!(
            "Position: {:.5}, {:.5} alt {} m",
            pos.latitude, pos.longitude, pos.altitude
        );
    }
    println!(
        "Device: {} @ {} baud (sending {})",
        config.meshtastic.port,
        config.meshtastic.baud_rate,
        if config.meshtastic.send_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );

    let path = config.peer_db_path();
    let mut peers = JsonPeerFile::new(&path).load()?.peers;
    println!("Peer database: {} ({} peers)", path.display(), peers.len());
    peers.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
    for peer in peers.iter().take(10) {
        println!(
            "  {} {:<4} {:<12} last seen {}",
            peer.info.user_id(),
            peer.info.short_name,
            role_name(peer.info.role),
            peer.last_seen.format("%Y-%m-%d %H:%M:%SZ")
        );
    }
    Ok(())
}

fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "off" => log::LevelFilter::Off,
        "error" => log::LevelFilter::Error,
        "warn" | "warning" => log::LevelFilter::Warn,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    }
}

fn init_logging(config: Option<&Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .map(|c| parse_level(&c.logging.level))
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    if let Some(f) = log_file {
        let file = std::sync::Mutex::new(f);
        // Echo to the console only when attached to a terminal
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
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}

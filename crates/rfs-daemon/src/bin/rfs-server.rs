//! rfs server
//!
//! Serves a storage root over TCP.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 127.0.0.1:2024, ./server_root
//! rfs-server
//!
//! # Custom root, one global lock, at most 64 live connections
//! rfs-server --root /var/lib/rfs --lock-scope global --max-connections 64
//! ```

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rfs_core::{Config, LockScope};
use rfs_daemon::{HostConfig, RfsHost};

#[derive(Parser, Debug)]
#[command(name = "rfs-server")]
#[command(about = "Remote file store server")]
#[command(version)]
struct Args {
    /// Configuration file (default: platform config dir)
    #[arg(short, long, env = "RFS_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Storage root directory
    #[arg(short, long, env = "RFS_ROOT")]
    root: Option<PathBuf>,

    /// Lock granularity: global or per_path
    #[arg(long)]
    lock_scope: Option<LockScope>,

    /// Maximum concurrently handled connections (default: unbounded)
    #[arg(long)]
    max_connections: Option<usize>,

    /// Reject paths that could leave the storage root
    #[arg(long)]
    confine_paths: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };

    let server = &mut config.server;
    if let Some(bind) = args.bind {
        server.bind = bind;
    }
    if let Some(port) = args.port {
        server.port = port;
    }
    if let Some(root) = args.root {
        server.root = root;
    }
    if let Some(scope) = args.lock_scope {
        server.lock_scope = scope;
    }
    if args.max_connections.is_some() {
        server.max_connections = args.max_connections;
    }
    if args.confine_paths {
        server.confine_paths = true;
    }

    if args.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    std::fs::create_dir_all(&config.server.root)?;

    let host = RfsHost::bind(HostConfig::from(&config.server)).await?;

    info!("Starting rfs server...");
    info!("  Storage root: {:?}", config.server.root);
    info!("  Listening on: {}", host.local_addr()?);

    tokio::select! {
        result = host.serve() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e.into());
            }
        }
        _ = signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    Ok(())
}

//! rfs CLI - talk to an rfs server
//!
//! Usage:
//!   rfs WRITE <local> <remote> [R|W]   Upload a file (R = read-only)
//!   rfs GET <remote> <local>           Download a file
//!   rfs RM <remote>                    Delete a file

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rfs_core::{Config, Permission, Response};
use rfs_daemon::{ClientError, RfsClient};

#[derive(Parser)]
#[command(name = "rfs")]
#[command(about = "Remote file store client", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Server address (default from config, then 127.0.0.1:2024)
    #[arg(short, long, global = true, env = "RFS_SERVER")]
    server: Option<SocketAddr>,

    /// Configuration file
    #[arg(short, long, global = true, env = "RFS_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file
    #[command(name = "WRITE", alias = "write")]
    Write {
        /// File to upload
        local: PathBuf,
        /// Destination path on the server
        remote: String,
        /// R for read-only, W for writable (default)
        permission: Option<String>,
    },

    /// Download a remote file
    #[command(name = "GET", alias = "get")]
    Get {
        /// Path on the server
        remote: String,
        /// Where to save it
        local: PathBuf,
    },

    /// Delete a remote file
    #[command(name = "RM", alias = "rm")]
    Rm {
        /// Path on the server
        remote: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if is_usage_failure(&e) {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();

    let config = match &cli.config {
        Some(path) => match Config::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Bad config {:?}: {}", path, e);
                return ExitCode::FAILURE;
            }
        },
        None => Config::load(),
    };

    let server = cli.server.unwrap_or(config.client.server);
    debug!("Using server {}", server);
    let client = RfsClient::new(server);

    let succeeded = match cli.command {
        Commands::Write {
            local,
            remote,
            permission,
        } => {
            let permission = Permission::from_token(permission.as_deref().map(str::as_bytes));
            run_write(&client, local, &remote, permission).await
        }
        Commands::Get { remote, local } => run_get(&client, &remote, local).await,
        Commands::Rm { remote } => run_rm(&client, &remote).await,
    };

    if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_write(
    client: &RfsClient,
    local: PathBuf,
    remote: &str,
    permission: Permission,
) -> bool {
    match client.write(&local, remote, permission).await {
        Ok(response) => {
            println!("Server says: {}", response);
            response.is_ok()
        }
        Err(e) => {
            report(&e);
            false
        }
    }
}

async fn run_get(client: &RfsClient, remote: &str, local: PathBuf) -> bool {
    match client.get(remote, &local).await {
        Ok(outcome) if outcome.is_complete() => {
            println!("Got the file: {}", local.display());
            true
        }
        Ok(outcome) => {
            eprintln!(
                "File didn't fully arrive. Partial data only ({} of {} bytes).",
                outcome.received, outcome.expected
            );
            false
        }
        Err(ClientError::Server(_)) => {
            eprintln!("Server says: File not found or can't open it.");
            false
        }
        Err(e) => {
            report(&e);
            false
        }
    }
}

async fn run_rm(client: &RfsClient, remote: &str) -> bool {
    match client.remove(remote).await {
        Ok(Response::Ok) => {
            println!("Server deleted the file/folder for us.");
            true
        }
        Ok(Response::Error(_)) => {
            println!("Server says: Couldn't remove it.");
            false
        }
        Err(e) => {
            report(&e);
            false
        }
    }
}

fn report(e: &ClientError) {
    match e {
        ClientError::Connect { .. } => eprintln!("Couldn't connect to server. Is it running? ({})", e),
        ClientError::NoResponse => eprintln!("Server gave no response at all."),
        _ => eprintln!("{}", e),
    }
}

/// `--help` and `--version` end parsing without being failures.
fn is_usage_failure(e: &clap::Error) -> bool {
    e.use_stderr()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_error(args: &[&str]) -> clap::Error {
        match Cli::try_parse_from(args) {
            Ok(_) => panic!("{:?} should not parse", args),
            Err(e) => e,
        }
    }

    #[test]
    fn test_usage_errors_fail() {
        assert!(is_usage_failure(&parse_error(&["rfs"])));
        assert!(is_usage_failure(&parse_error(&["rfs", "WRITE", "only-local"])));
        assert!(is_usage_failure(&parse_error(&["rfs", "LIST", "x"])));
        assert!(is_usage_failure(&parse_error(&["rfs", "--server", "nope", "RM", "x"])));
    }

    #[test]
    fn test_help_and_version_succeed() {
        assert!(!is_usage_failure(&parse_error(&["rfs", "--help"])));
        assert!(!is_usage_failure(&parse_error(&["rfs", "--version"])));
    }

    #[test]
    fn test_commands_parse() {
        let cli = Cli::try_parse_from(["rfs", "rm", "a/b"]).unwrap();
        assert!(matches!(cli.command, Commands::Rm { remote } if remote == "a/b"));
    }
}

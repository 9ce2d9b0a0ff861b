//! `vaultpush daemon` - auto-push daemon lifecycle.

use anyhow::{Context, Result};
use clap::Subcommand;

use vaultpush_daemon::{start_blocking, DaemonClient, DaemonError};

use super::home;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (watcher + socket server).
    Start,
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = home()?;

    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match DaemonClient::new(&home).stop() {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => {
            let client = DaemonClient::new(&home);
            let payload = match client.status() {
                Ok(status) => serde_json::to_value(status)
                    .context("failed to render daemon status JSON")?,
                Err(DaemonError::DaemonNotRunning { socket }) => serde_json::json!({
                    "running": false,
                    "socket": socket,
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload)
                    .context("failed to render daemon status JSON")?
            );
        }
    }

    Ok(())
}

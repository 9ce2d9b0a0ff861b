//! vaultpush: push a local notes vault to a GitHub branch.
//!
//! # Usage
//!
//! ```text
//! vaultpush init <path> --owner <o> --repo <r> [--branch main] [--name <n>]
//! vaultpush vault list|remove <name>|reset <name>
//! vaultpush push <vault> [--dry-run] [--message <m>]
//! vaultpush push --all [--dry-run]
//! vaultpush status [--json]
//! vaultpush changes <vault>
//! vaultpush daemon start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    changes::ChangesArgs, daemon::DaemonCommand, init::InitArgs, push::PushArgs,
    status::StatusArgs, vault::VaultCommand,
};

#[derive(Parser, Debug)]
#[command(
    name = "vaultpush",
    version,
    about = "Push a local notes vault to a GitHub branch",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a vault and the branch it pushes to.
    Init(InitArgs),

    /// Manage registered vaults.
    Vault {
        #[command(subcommand)]
        command: VaultCommand,
    },

    /// Push local changes of a vault as one commit.
    Push(PushArgs),

    /// Show pending local changes for every registered vault (offline).
    Status(StatusArgs),

    /// List the pending changes of one vault (offline).
    Changes(ChangesArgs),

    /// Run or control the auto-push daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    // The daemon installs its own subscriber with a louder default.
    if !matches!(
        cli.command,
        Commands::Daemon {
            command: DaemonCommand::Start
        }
    ) {
        init_tracing();
    }

    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Vault { command } => commands::vault::run(command),
        Commands::Push(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Changes(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

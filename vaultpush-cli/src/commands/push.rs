//! `vaultpush push` - commit local changes of a vault to its branch.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use vaultpush_core::types::{ChangeKind, LocalChange};
use vaultpush_sync::{
    pipeline::{self, PushOptions, PushOutcome, PushScope, VaultPushResult},
    Notifier,
};

use super::{block_on, home};

/// Arguments for `vaultpush push`.
#[derive(Args, Debug)]
pub struct PushArgs {
    /// Name of the vault to push (omit when using `--all`).
    pub vault: Option<String>,

    /// Push every registered vault.
    #[arg(long, conflicts_with = "vault")]
    pub all: bool,

    /// Show what would be pushed without writing to the remote.
    #[arg(long)]
    pub dry_run: bool,

    /// Commit message to use instead of the generated one.
    #[arg(long, short = 'm')]
    pub message: Option<String>,
}

/// Prints notices to stdout as they happen.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, message: &str) {
        println!("  {message}");
    }
}

impl PushArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let scope = if self.all {
            PushScope::All
        } else {
            PushScope::Vault(
                self.vault
                    .clone()
                    .context("provide a vault name or use --all")?,
            )
        };
        let options = PushOptions {
            dry_run: self.dry_run,
            commit_message: self.message.clone(),
        };

        let vaults = pipeline::resolve_scope(&home, &scope).context("failed to resolve vaults")?;
        if vaults.is_empty() {
            println!("No vaults registered. Run `vaultpush init` first.");
            return Ok(());
        }

        let mut stale = Vec::new();
        let mut failed = Vec::new();
        for vault in &vaults {
            println!("{}", vault.name.0.bold());
            let result = block_on(pipeline::push_registered(
                &home,
                vault,
                &options,
                &vaultpush_github::connect,
                &ConsoleNotifier,
            ))?;
            match result {
                Ok(result) => {
                    if matches!(result.outcome, PushOutcome::RemoteAdvanced { .. }) {
                        stale.push(result.vault.clone());
                    }
                    print_result(&result);
                }
                Err(err) => {
                    eprintln!("  {} {err}", "error:".red().bold());
                    failed.push(vault.name.0.clone());
                }
            }
        }

        if !failed.is_empty() {
            bail!("push failed for {}", failed.join(", "));
        }
        if !stale.is_empty() {
            bail!(
                "remote branch moved for {}; pull, then run `vaultpush vault resync <name>` before pushing again",
                stale.join(", ")
            );
        }
        Ok(())
    }
}

fn print_result(result: &VaultPushResult) {
    match &result.outcome {
        PushOutcome::Pushed(report) => {
            println!(
                "{} {} change(s) in {}",
                "✓".green(),
                report.applied.len(),
                report.commit.short()
            );
        }
        PushOutcome::DryRun {
            changes,
            remote_commit,
        } => {
            println!(
                "[dry-run] {} change(s) on top of {}",
                changes.len(),
                remote_commit.short()
            );
            for change in changes {
                println!("  {}", change_line(change));
            }
        }
        PushOutcome::RemoteAdvanced { expected, actual } => {
            println!(
                "{} expected {}, branch is at {}",
                "!".yellow().bold(),
                expected.short(),
                actual.short()
            );
        }
        PushOutcome::NothingToSync => {}
    }
}

/// `+ path`, `~ path` or `- path`, colored by kind.
pub(crate) fn change_line(change: &LocalChange) -> String {
    match change.kind() {
        ChangeKind::Created => format!("+ {}", change.path()).green().to_string(),
        ChangeKind::Changed => format!("~ {}", change.path()).yellow().to_string(),
        ChangeKind::Deleted => format!("- {}", change.path()).red().to_string(),
    }
}

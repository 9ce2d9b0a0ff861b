//! `vaultpush vault list|remove|reset|resync`

use anyhow::{Context, Result};
use clap::Subcommand;

use vaultpush_core::{registry, types::VaultName};
use vaultpush_sync::{baseline, pipeline, NoopNotifier};

use super::{block_on, home};

#[derive(Subcommand, Debug)]
pub enum VaultCommand {
    /// List registered vaults.
    List,

    /// Unregister a vault and forget its baseline. Files are left alone.
    Remove {
        name: String,
    },

    /// Forget the baseline so the next push uploads every file.
    Reset {
        name: String,
    },

    /// Record the branch tip and the vault's current files as in sync.
    ///
    /// Use after pulling remote changes into the vault with another tool.
    Resync {
        name: String,
    },
}

pub fn run(cmd: VaultCommand) -> Result<()> {
    match cmd {
        VaultCommand::List => list(),
        VaultCommand::Remove { name } => remove(&name),
        VaultCommand::Reset { name } => reset(&name),
        VaultCommand::Resync { name } => resync(&name),
    }
}

fn list() -> Result<()> {
    let vaults = registry::list_vaults().context("failed to load registry")?;

    if vaults.is_empty() {
        println!("No vaults registered.");
        println!("Run: vaultpush init <path> --owner <owner> --repo <repo>");
        return Ok(());
    }

    for vault in &vaults {
        println!("{} ({})", vault.name, vault.path.display());
        println!("  -> {}", vault.remote);
        if !vault.exclude.is_empty() {
            println!("  exclude: {}", vault.exclude.join(", "));
        }
    }
    Ok(())
}

fn remove(name: &str) -> Result<()> {
    let home = home()?;
    registry::remove_vault_at(&home, &VaultName::from(name))
        .with_context(|| format!("no vault named '{name}' is registered"))?;
    baseline::reset_at(&home, name)
        .with_context(|| format!("failed to remove baseline of '{name}'"))?;
    println!("✓ Removed '{name}'");
    Ok(())
}

fn reset(name: &str) -> Result<()> {
    let home = home()?;
    registry::load_vault_at(&home, &VaultName::from(name))
        .with_context(|| format!("no vault named '{name}' is registered"))?;
    let removed = baseline::reset_at(&home, name)
        .with_context(|| format!("failed to remove baseline of '{name}'"))?;
    if removed {
        println!("✓ Baseline of '{name}' cleared; the next push uploads every file");
    } else {
        println!("'{name}' has no baseline yet");
    }
    Ok(())
}

fn resync(name: &str) -> Result<()> {
    let home = home()?;
    let vault = registry::load_vault_at(&home, &VaultName::from(name))
        .with_context(|| format!("no vault named '{name}' is registered"))?;
    let snapshot = block_on(pipeline::resync_registered(
        &home,
        &vault,
        &vaultpush_github::connect,
        &NoopNotifier,
    ))?
    .with_context(|| format!("resync failed for {name}"))?;
    println!(
        "✓ '{name}' anchored at {} with {} file(s)",
        snapshot.last_fetched_commit_sha.short(),
        snapshot.local_sha.len()
    );
    Ok(())
}

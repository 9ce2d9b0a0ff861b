//! `vaultpush changes <vault>` - list what the next push would send.

use anyhow::{Context, Result};
use clap::Args;

use vaultpush_core::{registry, types::VaultName};
use vaultpush_sync::{baseline, staleness, DiskVault};

use super::{block_on, home, push::change_line};

/// Arguments for `vaultpush changes`.
#[derive(Args, Debug)]
pub struct ChangesArgs {
    /// Vault name.
    pub vault: String,
}

impl ChangesArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let vault = registry::load_vault_at(&home, &VaultName::from(self.vault.as_str()))
            .with_context(|| format!("no vault named '{}' is registered", self.vault))?;
        let previous = baseline::load_at(&home, &self.vault)
            .with_context(|| format!("failed to load baseline of '{}'", self.vault))?;

        let store = DiskVault::from_vault(&vault);
        let local = block_on(staleness::check_local(&store, previous.as_ref()))?
            .with_context(|| format!("failed to scan '{}'", vault.path.display()))?;

        if local.changes.is_empty() {
            println!("No local changes for '{}'.", vault.name);
            return Ok(());
        }
        if previous.is_none() {
            println!("'{}' was never pushed; every file is pending.", vault.name);
        }
        for change in &local.changes {
            println!("{}", change_line(change));
        }
        Ok(())
    }
}

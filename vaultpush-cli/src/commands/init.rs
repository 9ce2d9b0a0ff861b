//! `vaultpush init <path> --owner <o> --repo <r> ...`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use vaultpush_core::{
    registry,
    types::{RemoteSpec, VaultName, DEFAULT_API_BASE, DEFAULT_BRANCH, DEFAULT_TOKEN_ENV},
};

/// Register a vault and the branch it pushes to.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Path to the vault root directory.
    pub path: PathBuf,

    /// Owner (user or organization) of the target repository.
    #[arg(long)]
    pub owner: String,

    /// Name of the target repository.
    #[arg(long)]
    pub repo: String,

    #[arg(long, default_value = DEFAULT_BRANCH)]
    pub branch: String,

    /// Registry name of the vault. Defaults to the directory name.
    #[arg(long)]
    pub name: Option<String>,

    /// Environment variable holding the GitHub token.
    #[arg(long, default_value = DEFAULT_TOKEN_ENV)]
    pub token_env: String,

    #[arg(long, default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Vault-relative directory never pushed. Repeatable.
    #[arg(long = "exclude", value_name = "DIR")]
    pub exclude: Vec<String>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let path = self
            .path
            .canonicalize()
            .with_context(|| format!("cannot resolve path '{}'", self.path.display()))?;

        let remote = RemoteSpec {
            branch: self.branch,
            token_env: self.token_env,
            api_base: self.api_base.trim_end_matches('/').to_string(),
            ..RemoteSpec::new(self.owner, self.repo)
        };

        let mut vault = registry::init(path.clone(), self.name.map(VaultName::from), remote)
            .with_context(|| format!("failed to register '{}'", path.display()))?;

        let exclude: Vec<String> = self
            .exclude
            .iter()
            .map(|dir| dir.trim_matches('/').to_string())
            .filter(|dir| !dir.is_empty())
            .collect();
        if !exclude.is_empty() && vault.exclude != exclude {
            vault.exclude = exclude;
            vault.updated_at = chrono::Utc::now();
            registry::save_vault(&vault)
                .with_context(|| format!("failed to save '{}'", vault.name))?;
        }

        println!("✓ Registered '{}' -> {}", vault.name, vault.remote);
        println!("  Saved to: ~/.vaultpush/vaults/{}.yaml", vault.name);
        println!("  Token read from ${}", vault.remote.token_env);
        Ok(())
    }
}

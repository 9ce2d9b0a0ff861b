//! `vaultpush status` - offline view of pending changes per vault.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use vaultpush_core::{
    registry,
    types::{ChangeKind, LocalChange, Vault},
};
use vaultpush_sync::{baseline, staleness, DiskVault};

use super::{block_on, home};

/// Arguments for `vaultpush status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let vaults = registry::list_vaults_at(&home).context("failed to load registry")?;

        let now = Utc::now();
        let mut rows = Vec::with_capacity(vaults.len());
        for vault in &vaults {
            rows.push(
                vault_status(&home, vault, now)
                    .with_context(|| format!("status check failed for '{}'", vault.name))?,
            );
        }

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        print_table(rows);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
struct PendingCounts {
    created: usize,
    changed: usize,
    deleted: usize,
}

impl PendingCounts {
    fn from_changes(changes: &[LocalChange]) -> Self {
        let mut counts = Self::default();
        for change in changes {
            match change.kind() {
                ChangeKind::Created => counts.created += 1,
                ChangeKind::Changed => counts.changed += 1,
                ChangeKind::Deleted => counts.deleted += 1,
            }
        }
        counts
    }

    fn total(&self) -> usize {
        self.created + self.changed + self.deleted
    }
}

#[derive(Debug, Clone, Serialize)]
struct VaultStatus {
    vault: String,
    remote: String,
    /// `never-pushed`, `clean` or `pending`.
    state: &'static str,
    pending: PendingCounts,
    baseline_commit: Option<String>,
    last_push_at: Option<String>,
    last_push_age: String,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "vault")]
    vault: String,
    #[tabled(rename = "remote")]
    remote: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "pending")]
    pending: String,
    #[tabled(rename = "commit")]
    commit: String,
    #[tabled(rename = "last push")]
    last_push: String,
}

fn vault_status(home: &Path, vault: &Vault, now: DateTime<Utc>) -> Result<VaultStatus> {
    let previous = baseline::load_at(home, &vault.name.0)?;
    let store = DiskVault::from_vault(vault);
    let local = block_on(staleness::check_local(&store, previous.as_ref()))??;
    let pending = PendingCounts::from_changes(&local.changes);

    let state = match (&previous, pending.total()) {
        (None, _) => "never-pushed",
        (Some(_), 0) => "clean",
        (Some(_), _) => "pending",
    };

    Ok(VaultStatus {
        vault: vault.name.0.clone(),
        remote: vault.remote.to_string(),
        state,
        pending,
        baseline_commit: previous
            .as_ref()
            .map(|b| b.last_fetched_commit_sha.short().to_string()),
        last_push_at: previous.as_ref().map(|b| b.synced_at.to_rfc3339()),
        last_push_age: previous
            .as_ref()
            .map(|b| format_age(b.synced_at, now))
            .unwrap_or_else(|| "never".to_string()),
    })
}

/// Coarse human age: `just now`, `5m ago`, `3h ago`, `2d ago`.
fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..=59 => "just now".to_string(),
        60..=3_599 => format!("{}m ago", secs / 60),
        3_600..=86_399 => format!("{}h ago", secs / 3_600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

fn print_table(rows: Vec<VaultStatus>) {
    let pending_vaults = rows.iter().filter(|row| row.state != "clean").count();
    println!(
        "vaultpush v{} | {} vaults | {} with pending changes",
        env!("CARGO_PKG_VERSION"),
        rows.len(),
        pending_vaults,
    );

    if rows.is_empty() {
        println!("No vaults registered.");
        return;
    }

    let table_rows: Vec<StatusTableRow> = rows
        .into_iter()
        .map(|row| StatusTableRow {
            state: state_label(row.state),
            pending: format!(
                "+{} ~{} -{}",
                row.pending.created, row.pending.changed, row.pending.deleted
            ),
            commit: row.baseline_commit.unwrap_or_else(|| "-".to_string()),
            vault: row.vault,
            remote: row.remote,
            last_push: row.last_push_age,
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");

    if pending_vaults > 0 {
        println!("Run 'vaultpush push --all' to push pending changes.");
    }
}

fn state_label(state: &str) -> String {
    match state {
        "clean" => "CLEAN".green().to_string(),
        "pending" => "PENDING".yellow().to_string(),
        _ => "NEVER PUSHED".bright_black().to_string(),
    }
}

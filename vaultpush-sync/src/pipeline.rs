//! Push pipeline entrypoints used by the CLI and the daemon.
//!
//! [`push`] runs the protocol against an explicit baseline snapshot and
//! returns the next one; [`push_vault`] adds loading, recording and
//! notification around it; [`run`] resolves registered vaults.

use std::path::Path;

use chrono::Utc;

use vaultpush_core::error::RegistryError;
use vaultpush_core::registry;
use vaultpush_core::types::{CommitSha, LocalChange, SyncBaseline, TreeSha, Vault, VaultName};

use crate::baseline::{commit_baseline, next_baseline, BaselineStore, FileBaselineStore};
use crate::commit::{commit_and_advance, default_message};
use crate::error::{remote_err, PushStage, SyncError};
use crate::hasher::compute_fingerprints;
use crate::notify::{self, NoopNotifier, Notifier};
use crate::remote::RemoteRepo;
use crate::staleness::{check_preconditions, GuardVerdict, Rejection};
use crate::tree::{self, AppliedChange};
use crate::vault::{DiskVault, LocalStore};

static NOOP: NoopNotifier = NoopNotifier;

/// The collaborators of one push.
pub struct PushContext<'a, S: ?Sized, R: ?Sized> {
    pub vault: &'a str,
    pub store: &'a S,
    pub remote: &'a R,
    pub notifier: &'a dyn Notifier,
}

impl<'a, S: ?Sized, R: ?Sized> PushContext<'a, S, R> {
    pub fn new(vault: &'a str, store: &'a S, remote: &'a R) -> Self {
        Self {
            vault,
            store,
            remote,
            notifier: &NOOP,
        }
    }

    pub fn with_notifier(mut self, notifier: &'a dyn Notifier) -> Self {
        self.notifier = notifier;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOptions {
    /// Run the checks and report the pending changes without writing.
    pub dry_run: bool,
    pub commit_message: Option<String>,
}

/// A completed push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReport {
    pub vault: String,
    pub remote: String,
    pub commit: CommitSha,
    pub tree: TreeSha,
    pub applied: Vec<AppliedChange>,
    /// Snapshot to record now that the branch points at `commit`.
    pub baseline: SyncBaseline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    NothingToSync,
    RemoteAdvanced {
        expected: CommitSha,
        actual: CommitSha,
    },
    DryRun {
        changes: Vec<LocalChange>,
        remote_commit: CommitSha,
    },
    Pushed(PushReport),
}

impl PushOutcome {
    /// Short stable label for status output.
    pub fn label(&self) -> &'static str {
        match self {
            PushOutcome::NothingToSync => "nothing-to-sync",
            PushOutcome::RemoteAdvanced { .. } => "remote-advanced",
            PushOutcome::DryRun { .. } => "dry-run",
            PushOutcome::Pushed(_) => "pushed",
        }
    }
}

impl From<Rejection> for PushOutcome {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::NothingToSync => PushOutcome::NothingToSync,
            Rejection::RemoteAdvanced { expected, actual } => {
                PushOutcome::RemoteAdvanced { expected, actual }
            }
        }
    }
}

/// Push local changes on top of `previous`. Never records anything.
///
/// On success the branch points at the new commit and the returned report
/// carries the snapshot describing it.
pub async fn push<S, R>(
    ctx: &PushContext<'_, S, R>,
    previous: Option<&SyncBaseline>,
    options: &PushOptions,
) -> Result<PushOutcome, SyncError>
where
    S: LocalStore + ?Sized,
    R: RemoteRepo + ?Sized,
{
    let started_at = Utc::now();

    let prepared = match check_preconditions(ctx.store, ctx.remote, previous).await? {
        GuardVerdict::Ready(prepared) => prepared,
        GuardVerdict::Rejected(rejection) => return Ok(rejection.into()),
    };

    if options.dry_run {
        return Ok(PushOutcome::DryRun {
            changes: prepared.changes,
            remote_commit: prepared.remote_commit,
        });
    }

    let Some(built) = tree::build(
        ctx.store,
        ctx.remote,
        &prepared.changes,
        &prepared.remote_commit,
    )
    .await?
    else {
        return Ok(PushOutcome::NothingToSync);
    };

    let message = options
        .commit_message
        .clone()
        .unwrap_or_else(|| default_message(ctx.vault, started_at));
    let commit =
        commit_and_advance(ctx.remote, &built.tree, &prepared.remote_commit, &message).await?;

    // The branch has moved; from here on the push must report success.
    let tree = match ctx.remote.commit_tree(&commit).await {
        Ok(tree) => tree,
        Err(err) => {
            tracing::warn!(
                "could not read back tree of {} ({}), recording the submitted tree",
                commit.short(),
                remote_err(PushStage::ReadCommit)(err)
            );
            built.tree.clone()
        }
    };

    let baseline = next_baseline(previous, &built.applied, commit.clone(), tree.clone(), started_at);
    let remote = ctx.remote.describe();
    tracing::info!(
        "pushed {} change(s) from {} to {} at {}",
        built.applied.len(),
        ctx.vault,
        remote,
        commit.short()
    );

    Ok(PushOutcome::Pushed(PushReport {
        vault: ctx.vault.to_string(),
        remote,
        commit,
        tree,
        applied: built.applied,
        baseline,
    }))
}

/// Load the baseline, push, record the new baseline, then notify.
pub async fn push_vault<S, R, B>(
    ctx: &PushContext<'_, S, R>,
    baselines: &B,
    options: &PushOptions,
) -> Result<PushOutcome, SyncError>
where
    S: LocalStore + ?Sized,
    R: RemoteRepo + ?Sized,
    B: BaselineStore + ?Sized,
{
    let previous = baselines.load()?;
    let outcome = push(ctx, previous.as_ref(), options).await?;

    match &outcome {
        PushOutcome::Pushed(report) => {
            commit_baseline(baselines, &report.baseline)?;
            for applied in &report.applied {
                ctx.notifier.notify(&notify::change_message(&applied.change));
            }
            ctx.notifier.notify(&notify::pushed_message(&report.remote));
        }
        PushOutcome::NothingToSync => ctx.notifier.notify(notify::NOTHING_TO_SYNC),
        PushOutcome::RemoteAdvanced { .. } => ctx.notifier.notify(notify::REMOTE_ADVANCED),
        PushOutcome::DryRun { .. } => {}
    }
    Ok(outcome)
}

/// Re-anchor the baseline on the current branch tip.
///
/// Records the tip and the vault's current fingerprints as agreeing. Run it
/// after bringing the vault up to date with the remote; anything edited
/// locally before that is treated as already pushed.
pub async fn resync_vault<S, R, B>(
    ctx: &PushContext<'_, S, R>,
    baselines: &B,
) -> Result<SyncBaseline, SyncError>
where
    S: LocalStore + ?Sized,
    R: RemoteRepo + ?Sized,
    B: BaselineStore + ?Sized,
{
    let local_sha = compute_fingerprints(ctx.store).await?;
    let tip = ctx
        .remote
        .ref_tip_commit()
        .await
        .map_err(remote_err(PushStage::ReadRef))?;
    let tree = ctx
        .remote
        .commit_tree(&tip)
        .await
        .map_err(remote_err(PushStage::ReadCommit))?;

    let previous = baselines.load()?;
    let snapshot = SyncBaseline {
        local_sha,
        last_fetched_commit_sha: tip,
        last_fetched_remote_sha: tree,
        synced_at: Utc::now(),
    };
    baselines.save(&snapshot)?;

    match previous {
        Some(previous) if previous.last_fetched_commit_sha != snapshot.last_fetched_commit_sha => {
            tracing::info!(
                "{} re-anchored from {} to {}",
                ctx.vault,
                previous.last_fetched_commit_sha.short(),
                snapshot.last_fetched_commit_sha.short()
            );
        }
        _ => tracing::info!(
            "{} anchored at {} with {} file(s)",
            ctx.vault,
            snapshot.last_fetched_commit_sha.short(),
            snapshot.local_sha.len()
        ),
    }
    ctx.notifier
        .notify(&notify::resynced_message(&snapshot.last_fetched_commit_sha));
    Ok(snapshot)
}

// ---------------------------------------------------------------------------
// Registered vaults
// ---------------------------------------------------------------------------

/// Scope for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushScope {
    /// Push every registered vault.
    All,
    /// Push a single named vault.
    Vault(String),
}

/// Builds the remote client of a registered vault.
pub trait RemoteFactory: Send + Sync {
    type Remote: RemoteRepo;

    fn connect(&self, vault: &Vault) -> Result<Self::Remote, SyncError>;
}

impl<F, R> RemoteFactory for F
where
    F: Fn(&Vault) -> Result<R, SyncError> + Send + Sync,
    R: RemoteRepo,
{
    type Remote = R;

    fn connect(&self, vault: &Vault) -> Result<R, SyncError> {
        self(vault)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultPushResult {
    pub vault: String,
    pub outcome: PushOutcome,
}

/// Resolve the vaults in `scope` from the registry under `home`.
pub fn resolve_scope(home: &Path, scope: &PushScope) -> Result<Vec<Vault>, SyncError> {
    match scope {
        PushScope::All => Ok(registry::list_vaults_at(home)?),
        PushScope::Vault(name) => match registry::load_vault_at(home, &VaultName::from(name.as_str())) {
            Ok(vault) => Ok(vec![vault]),
            Err(RegistryError::RegistryNotFound { .. }) => Err(SyncError::UnknownVault(name.clone())),
            Err(err) => Err(err.into()),
        },
    }
}

/// Push one registered vault using its on-disk baseline.
pub async fn push_registered<F>(
    home: &Path,
    vault: &Vault,
    options: &PushOptions,
    factory: &F,
    notifier: &dyn Notifier,
) -> Result<VaultPushResult, SyncError>
where
    F: RemoteFactory + ?Sized,
{
    let store = DiskVault::from_vault(vault);
    let remote = factory.connect(vault)?;
    let baselines = FileBaselineStore::new(home, vault.name.0.clone());
    let ctx = PushContext::new(&vault.name.0, &store, &remote).with_notifier(notifier);

    tracing::debug!("pushing {} to {}", vault.name, vault.remote);
    let outcome = push_vault(&ctx, &baselines, options).await?;
    Ok(VaultPushResult {
        vault: vault.name.0.clone(),
        outcome,
    })
}

/// Re-anchor one registered vault on its branch tip.
pub async fn resync_registered<F>(
    home: &Path,
    vault: &Vault,
    factory: &F,
    notifier: &dyn Notifier,
) -> Result<SyncBaseline, SyncError>
where
    F: RemoteFactory + ?Sized,
{
    let store = DiskVault::from_vault(vault);
    let remote = factory.connect(vault)?;
    let baselines = FileBaselineStore::new(home, vault.name.0.clone());
    let ctx = PushContext::new(&vault.name.0, &store, &remote).with_notifier(notifier);
    resync_vault(&ctx, &baselines).await
}

/// Run the push pipeline for a scope.
///
/// This is the canonical entrypoint for both `vaultpush push` and the
/// daemon processor. Vaults are pushed one after another.
pub async fn run<F>(
    home: &Path,
    scope: &PushScope,
    options: &PushOptions,
    factory: &F,
    notifier: &dyn Notifier,
) -> Result<Vec<VaultPushResult>, SyncError>
where
    F: RemoteFactory + ?Sized,
{
    let vaults = resolve_scope(home, scope)?;
    let mut results = Vec::with_capacity(vaults.len());
    for vault in &vaults {
        results.push(push_registered(home, vault, options, factory, notifier).await?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use tempfile::TempDir;
    use vaultpush_core::types::RemoteSpec;

    use super::*;
    use crate::baseline::MemoryBaselineStore;
    use crate::notify::MemoryNotifier;
    use crate::remote::MemoryRemote;
    use crate::vault::MemoryVault;

    #[tokio::test]
    async fn run_all_empty_registry_returns_empty_vec() {
        let home = TempDir::new().expect("home");
        let remote = Arc::new(MemoryRemote::new("me/notes"));
        let factory = |_: &Vault| Ok::<_, SyncError>(Arc::clone(&remote));
        let results = run(home.path(), &PushScope::All, &PushOptions::default(), &factory, &NOOP)
            .await
            .expect("run");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn run_unknown_vault_is_an_error() {
        let home = TempDir::new().expect("home");
        let remote = Arc::new(MemoryRemote::new("me/notes"));
        let factory = |_: &Vault| Ok::<_, SyncError>(Arc::clone(&remote));
        let err = run(
            home.path(),
            &PushScope::Vault("nope".into()),
            &PushOptions::default(),
            &factory,
            &NOOP,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::UnknownVault(name) if name == "nope"));
    }

    #[tokio::test]
    async fn run_single_vault_pushes_and_records_baseline() {
        let home = TempDir::new().expect("home");
        let vault_dir = TempDir::new().expect("vault");
        fs::write(vault_dir.path().join("a.md"), "A").expect("write");
        registry::init_at(
            vault_dir.path().to_path_buf(),
            Some(VaultName::from("notes")),
            RemoteSpec::new("me", "notes"),
            home.path(),
        )
        .expect("init");

        let remote = Arc::new(MemoryRemote::new("me/notes"));
        let factory = |_: &Vault| Ok::<_, SyncError>(Arc::clone(&remote));
        let results = run(
            home.path(),
            &PushScope::Vault("notes".into()),
            &PushOptions::default(),
            &factory,
            &NOOP,
        )
        .await
        .expect("run");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome.label(), "pushed");
        let stored = FileBaselineStore::new(home.path(), "notes")
            .load()
            .expect("load")
            .expect("baseline written");
        assert_eq!(stored.last_fetched_commit_sha, remote.head());
    }

    #[tokio::test]
    async fn dry_run_reports_without_writing() {
        let vault = MemoryVault::with_files([("a.md", "A")]);
        let remote = MemoryRemote::new("me/notes");
        let baselines = MemoryBaselineStore::new(None);
        let ctx = PushContext::new("notes", &vault, &remote);
        let options = PushOptions {
            dry_run: true,
            ..PushOptions::default()
        };

        let outcome = push_vault(&ctx, &baselines, &options).await.unwrap();
        let PushOutcome::DryRun { changes, remote_commit } = outcome else {
            panic!("expected DryRun");
        };
        assert_eq!(changes.len(), 1);
        assert_eq!(remote_commit, remote.head());
        assert_eq!(remote.calls().writes(), 0);
        assert!(baselines.current().is_none());
    }

    #[tokio::test]
    async fn custom_commit_message_is_used() {
        let vault = MemoryVault::with_files([("a.md", "A")]);
        let remote = MemoryRemote::new("me/notes");
        let ctx = PushContext::new("notes", &vault, &remote);
        let options = PushOptions {
            commit_message: Some("nightly backup".into()),
            ..PushOptions::default()
        };

        let PushOutcome::Pushed(report) = push(&ctx, None, &options).await.unwrap() else {
            panic!("expected Pushed");
        };
        assert_eq!(remote.commit(&report.commit).unwrap().message, "nightly backup");
    }

    #[tokio::test]
    async fn notifications_follow_the_outcome() {
        let vault = MemoryVault::with_files([("a.md", "A")]);
        let remote = MemoryRemote::new("me/notes");
        let baselines = MemoryBaselineStore::new(None);
        let notifier = MemoryNotifier::new();
        let ctx = PushContext::new("notes", &vault, &remote).with_notifier(&notifier);

        push_vault(&ctx, &baselines, &PushOptions::default()).await.unwrap();
        push_vault(&ctx, &baselines, &PushOptions::default()).await.unwrap();

        assert_eq!(
            notifier.messages(),
            vec![
                "a.md modified on remote.",
                "Successfully pushed to me/notes",
                "No local changes detected.",
            ]
        );
    }
}

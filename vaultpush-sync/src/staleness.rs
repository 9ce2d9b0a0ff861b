//! Pre-push checks: is there anything to push, and is the remote still where
//! the baseline left it?
//!
//! Verdict precedence:
//! 1. `NothingToSync` (no local change; no remote call is made)
//! 2. `RemoteAdvanced` (branch tip differs from the baseline commit)
//! 3. `Ready`

use vaultpush_core::types::{CommitSha, FingerprintMap, LocalChange, SyncBaseline};

use crate::detector::detect;
use crate::error::{remote_err, PushStage, SyncError};
use crate::hasher::compute_fingerprints;
use crate::notify;
use crate::remote::RemoteRepo;
use crate::vault::LocalStore;

/// Local side of the check: current fingerprints and what changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalState {
    pub changes: Vec<LocalChange>,
    pub fingerprints: FingerprintMap,
}

/// Everything the rest of a push needs once the checks passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedPush {
    pub changes: Vec<LocalChange>,
    /// Branch tip the new commit will be parented on.
    pub remote_commit: CommitSha,
    pub fingerprints: FingerprintMap,
}

/// Why a push stops before writing anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NothingToSync,
    RemoteAdvanced {
        expected: CommitSha,
        actual: CommitSha,
    },
}

impl Rejection {
    pub fn message(&self) -> &'static str {
        match self {
            Rejection::NothingToSync => notify::NOTHING_TO_SYNC,
            Rejection::RemoteAdvanced { .. } => notify::REMOTE_ADVANCED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Ready(PreparedPush),
    Rejected(Rejection),
}

/// Hash the vault and diff it against the baseline. Never touches the remote.
pub async fn check_local<S>(store: &S, baseline: Option<&SyncBaseline>) -> Result<LocalState, SyncError>
where
    S: LocalStore + ?Sized,
{
    let fingerprints = compute_fingerprints(store).await?;
    let previous = baseline.map(|b| &b.local_sha);
    let changes = detect(previous, &fingerprints, store).await?;
    Ok(LocalState {
        changes,
        fingerprints,
    })
}

/// Run every check that must pass before the first remote write.
///
/// Without a baseline the current branch tip is taken as the anchor, so the
/// first push uploads the whole vault on top of whatever the remote holds.
pub async fn check_preconditions<S, R>(
    store: &S,
    remote: &R,
    baseline: Option<&SyncBaseline>,
) -> Result<GuardVerdict, SyncError>
where
    S: LocalStore + ?Sized,
    R: RemoteRepo + ?Sized,
{
    let LocalState {
        changes,
        fingerprints,
    } = check_local(store, baseline).await?;
    if changes.is_empty() {
        return Ok(GuardVerdict::Rejected(Rejection::NothingToSync));
    }

    let tip = remote
        .ref_tip_commit()
        .await
        .map_err(remote_err(PushStage::ReadRef))?;

    match baseline {
        Some(baseline) if baseline.last_fetched_commit_sha != tip => {
            tracing::warn!(
                "{} moved from {} to {} since the last sync",
                remote.describe(),
                baseline.last_fetched_commit_sha.short(),
                tip.short()
            );
            return Ok(GuardVerdict::Rejected(Rejection::RemoteAdvanced {
                expected: baseline.last_fetched_commit_sha.clone(),
                actual: tip,
            }));
        }
        Some(_) => {}
        None => tracing::warn!(
            "no baseline recorded, uploading {} file(s) on top of {} at {}",
            changes.len(),
            remote.describe(),
            tip.short()
        ),
    }

    tracing::debug!("{} local change(s) ready on top of {}", changes.len(), tip.short());
    Ok(GuardVerdict::Ready(PreparedPush {
        changes,
        remote_commit: tip,
        fingerprints,
    }))
}

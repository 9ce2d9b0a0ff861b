//! Commit creation and branch advance.

use chrono::{DateTime, SecondsFormat, Utc};

use vaultpush_core::types::{CommitSha, TreeSha};

use crate::error::{remote_err, PushStage, SyncError};
use crate::remote::RemoteRepo;

/// `Commit from vaultpush (<vault>) on <RFC 3339 time>`
pub fn default_message(vault: &str, at: DateTime<Utc>) -> String {
    format!(
        "Commit from vaultpush ({vault}) on {}",
        at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// Commit `tree` on top of `parent` and fast-forward the branch to it.
///
/// If anything fails here the objects created so far are unreferenced and
/// the branch has not moved.
pub async fn commit_and_advance<R>(
    remote: &R,
    tree: &TreeSha,
    parent: &CommitSha,
    message: &str,
) -> Result<CommitSha, SyncError>
where
    R: RemoteRepo + ?Sized,
{
    let commit = remote
        .create_commit(tree, parent, message)
        .await
        .map_err(remote_err(PushStage::CreateCommit))?;
    let confirmed = remote
        .update_ref(&commit)
        .await
        .map_err(remote_err(PushStage::UpdateRef))?;
    if confirmed != commit {
        return Err(SyncError::RefMismatch {
            expected: commit,
            actual: confirmed,
        });
    }
    tracing::debug!("{} now at {}", remote.describe(), commit.short());
    Ok(commit)
}

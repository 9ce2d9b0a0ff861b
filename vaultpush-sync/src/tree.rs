//! Turns a batch of local changes into one new tree on the remote.

use futures::{stream, StreamExt, TryStreamExt};

use vaultpush_core::types::{CommitSha, LocalChange, TreeSha};

use crate::error::{remote_err, PushStage, SyncError};
use crate::hasher::fingerprint;
use crate::remote::{RemoteRepo, TreeNode};
use crate::vault::{FileHandle, LocalStore, VaultError};

/// Maximum number of file reads and blob uploads in flight while building.
pub const UPLOAD_CONCURRENCY: usize = 8;

/// A change that made it into the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    pub change: LocalChange,
    /// Fingerprint of the bytes uploaded; `None` for deletions.
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltTree {
    pub tree: TreeSha,
    pub applied: Vec<AppliedChange>,
}

/// Build and submit the tree for `changes` on top of `base_commit`'s tree.
///
/// Returns `None` when every change was dropped because its file vanished.
/// Nothing has been written to the remote in that case.
pub async fn build<S, R>(
    store: &S,
    remote: &R,
    changes: &[LocalChange],
    base_commit: &CommitSha,
) -> Result<Option<BuiltTree>, SyncError>
where
    S: LocalStore + ?Sized,
    R: RemoteRepo + ?Sized,
{
    // Futures are collected first (they are lazy) so no closure ends up in the
    // future's type; rustc otherwise fails to prove callers' futures `Send`.
    let pending: Vec<_> = changes.iter().map(|change| node_for(store, remote, change)).collect();
    let mutations: Vec<Option<(TreeNode, AppliedChange)>> = stream::iter(pending)
        .buffered(UPLOAD_CONCURRENCY)
        .try_collect()
        .await?;
    let (nodes, applied): (Vec<TreeNode>, Vec<AppliedChange>) = mutations.into_iter().flatten().unzip();

    if nodes.is_empty() {
        tracing::debug!("all {} change(s) dropped, no tree to build", changes.len());
        return Ok(None);
    }

    let base_tree = remote
        .commit_tree(base_commit)
        .await
        .map_err(remote_err(PushStage::ReadCommit))?;
    let tree = remote
        .create_tree(&nodes, &base_tree)
        .await
        .map_err(remote_err(PushStage::CreateTree))?;

    tracing::debug!(
        "created tree {} with {} mutation(s) over {}",
        tree.short(),
        nodes.len(),
        base_tree.short()
    );
    Ok(Some(BuiltTree { tree, applied }))
}

async fn node_for<S, R>(
    store: &S,
    remote: &R,
    change: &LocalChange,
) -> Result<Option<(TreeNode, AppliedChange)>, SyncError>
where
    S: LocalStore + ?Sized,
    R: RemoteRepo + ?Sized,
{
    let path = change.path();
    if let LocalChange::Deleted { .. } = change {
        return Ok(Some((
            TreeNode::delete(path),
            AppliedChange {
                change: change.clone(),
                fingerprint: None,
            },
        )));
    }

    let Some(handle) = store.resolve(path).await? else {
        tracing::warn!("{path} vanished before upload, skipping");
        return Ok(None);
    };
    let content = match handle.read().await {
        Ok(bytes) => bytes,
        Err(VaultError::NotFound(_)) => {
            tracing::warn!("{path} vanished before upload, skipping");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };

    let hash = fingerprint(&content);
    let node = match String::from_utf8(content) {
        Ok(text) => TreeNode::inline(path, text),
        Err(err) => {
            let sha = remote
                .create_blob(err.as_bytes())
                .await
                .map_err(remote_err(PushStage::CreateBlob))?;
            TreeNode::blob(path, sha)
        }
    };

    Ok(Some((
        node,
        AppliedChange {
            change: change.clone(),
            fingerprint: Some(hash),
        },
    )))
}

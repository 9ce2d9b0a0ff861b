//! Error types for vaultpush-sync.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use vaultpush_core::error::RegistryError;
use vaultpush_core::types::CommitSha;

use crate::remote::RemoteError;
use crate::vault::VaultError;

/// Which remote call of a push failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushStage {
    /// Building a client for the remote (credentials, endpoint).
    Connect,
    ReadRef,
    ReadCommit,
    CreateBlob,
    CreateTree,
    CreateCommit,
    UpdateRef,
}

impl PushStage {
    /// Stages that create objects or move the ref.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            PushStage::CreateBlob
                | PushStage::CreateTree
                | PushStage::CreateCommit
                | PushStage::UpdateRef
        )
    }
}

impl fmt::Display for PushStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PushStage::Connect => "connect",
            PushStage::ReadRef => "read ref",
            PushStage::ReadCommit => "read commit",
            PushStage::CreateBlob => "create blob",
            PushStage::CreateTree => "create tree",
            PushStage::CreateCommit => "create commit",
            PushStage::UpdateRef => "update ref",
        };
        f.write_str(name)
    }
}

/// All errors that can arise from a push.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Baseline JSON serialization/deserialization error.
    #[error("baseline JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("remote {stage} failed: {source}")]
    Remote {
        stage: PushStage,
        #[source]
        source: RemoteError,
    },

    /// The ref update answered with a commit other than the one submitted.
    #[error("branch points at {actual} after update, expected {expected}")]
    RefMismatch {
        expected: CommitSha,
        actual: CommitSha,
    },

    /// The remote advanced to `commit` but the new baseline could not be
    /// recorded. The next push from the old baseline will be rejected as
    /// stale.
    #[error("pushed {commit} but failed to record the new baseline: {source}")]
    BaselinePersist {
        commit: CommitSha,
        #[source]
        source: Box<SyncError>,
    },

    #[error("no vault named '{0}' is registered")]
    UnknownVault(String),
}

impl SyncError {
    /// Whether the failure happened after the protocol started writing to
    /// the remote.
    pub fn is_remote_write(&self) -> bool {
        match self {
            SyncError::Remote { stage, .. } => stage.is_write(),
            SyncError::RefMismatch { .. } | SyncError::BaselinePersist { .. } => true,
            _ => false,
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// `map_err` adapter tagging a [`RemoteError`] with the stage it came from.
pub(crate) fn remote_err(stage: PushStage) -> impl FnOnce(RemoteError) -> SyncError {
    move |source| SyncError::Remote { stage, source }
}

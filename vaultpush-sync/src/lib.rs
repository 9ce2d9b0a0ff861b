//! # vaultpush-sync
//!
//! One-way push of a local vault to a git branch.
//!
//! A push hashes the vault, diffs it against the recorded baseline, checks
//! that the remote branch has not moved, builds one tree with every change,
//! commits it, fast-forwards the branch, and only then records the new
//! baseline. Call [`pipeline::push_vault`] for a single vault with explicit
//! collaborators, or [`pipeline::run`] for registered vaults.

pub mod baseline;
pub mod commit;
pub mod detector;
pub mod error;
pub mod hasher;
pub mod notify;
pub mod pipeline;
pub mod remote;
pub mod staleness;
pub mod tree;
pub mod vault;

pub use baseline::{BaselineStore, FileBaselineStore, MemoryBaselineStore};
pub use error::{PushStage, SyncError};
pub use notify::{LogNotifier, MemoryNotifier, NoopNotifier, Notifier};
pub use pipeline::{
    push, push_vault, resync_vault, run, PushContext, PushOptions, PushOutcome, PushReport, PushScope,
    RemoteFactory, VaultPushResult,
};
pub use remote::{MemoryRemote, RemoteError, RemoteRepo, TreeNode, TreeNodeContent};
pub use vault::{DiskVault, FileHandle, LocalStore, MemoryVault, VaultError};

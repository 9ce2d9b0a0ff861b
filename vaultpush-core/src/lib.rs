//! vaultpush core library: domain types, vault registry persistence, errors.
//!
//! - [`types`]: newtypes, change and baseline types, registry entries
//! - [`error`]: [`RegistryError`]
//! - [`registry`]: load / save / init / remove vault configs

pub mod error;
pub mod registry;
pub mod types;

pub use error::RegistryError;
pub use types::{
    BlobSha, ChangeKind, CommitSha, FingerprintMap, LocalChange, RemoteSpec, SyncBaseline,
    TreeSha, Vault, VaultName,
};

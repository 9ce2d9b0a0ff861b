//! vaultpush auto-push daemon: vault watcher, serialized push processor and
//! Unix-socket control protocol.

pub mod error;
pub mod paths;
pub mod protocol;
pub mod runtime;

pub use error::DaemonError;
pub use protocol::{
    DaemonClient, DaemonStatus, PushRecord, PushSummary, Reply, Request, VaultSummary,
    WatchedVaultStatus,
};
pub use runtime::{run, run_with_factory, start_blocking};

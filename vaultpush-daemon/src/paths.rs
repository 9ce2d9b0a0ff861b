use std::path::{Path, PathBuf};
use std::time::Duration;

/// Quiet period after the last file event before a vault is pushed.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn vaultpush_root(home: &Path) -> PathBuf {
    home.join(".vaultpush")
}

pub fn vaults_root(home: &Path) -> PathBuf {
    vaultpush_root(home).join("vaults")
}

pub fn socket_path(home: &Path) -> PathBuf {
    vaultpush_root(home).join(DAEMON_SOCKET)
}

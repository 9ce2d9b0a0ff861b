//! Control protocol spoken over `~/.vaultpush/daemon.sock`.
//!
//! One JSON object per line in each direction. A connection may carry any
//! number of request/reply pairs; the daemon closes it after `stop`.
//!
//! ```text
//! -> {"cmd":"push","vault":"notes"}
//! <- {"reply":"pushed","target":"notes","source":"socket","vaults":[...],"duration_ms":41}
//! ```

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// How long `status` keeps retrying while a freshly started daemon binds.
const STARTUP_GRACE: Duration = Duration::from_millis(500);
const STARTUP_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Request {
    Status,
    /// Push one vault, or every registered vault when `vault` is absent.
    Push {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vault: Option<String>,
    },
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "lowercase")]
pub enum Reply {
    Status(DaemonStatus),
    Pushed(PushSummary),
    Stopping,
    Error { message: String },
}

impl Reply {
    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            message: message.into(),
        }
    }
}

/// Last push attempt of one vault since the daemon started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRecord {
    pub last_attempt_at_unix: u64,
    /// Outcome label of the last attempt, or `"error"`.
    pub last_outcome: String,
    pub last_error: Option<String>,
    pub last_pushed_at_unix: Option<u64>,
    pub last_commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSummary {
    pub vault: String,
    pub outcome: String,
    pub changes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one queued push job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSummary {
    /// Vault name, or `all`.
    pub target: String,
    /// `socket` or `watcher`.
    pub source: String,
    pub vaults: Vec<VaultSummary>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedVaultStatus {
    pub name: String,
    pub path: PathBuf,
    pub remote: String,
    /// `None` until the daemon attempted a push for this vault.
    #[serde(default)]
    pub last_push: Option<PushRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub started_at_unix: u64,
    /// Most recent successful push of any vault, 0 if none.
    pub last_push_at_unix: u64,
    pub vaults: Vec<WatchedVaultStatus>,
    pub socket: PathBuf,
    pub vaults_root: PathBuf,
}

/// Blocking client for the daemon socket under one home directory.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket: PathBuf,
}

impl DaemonClient {
    pub fn new(home: &Path) -> Self {
        Self {
            socket: socket_path(home),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Send `request` on a fresh connection and read the single reply.
    pub fn call(&self, request: &Request) -> Result<Reply, DaemonError> {
        let stream = UnixStream::connect(&self.socket).map_err(|err| match err.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
                DaemonError::DaemonNotRunning {
                    socket: self.socket.clone(),
                }
            }
            _ => io_err(&self.socket, err),
        })?;

        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        (&stream)
            .write_all(&line)
            .map_err(|e| io_err(&self.socket, e))?;

        let mut reply = String::new();
        BufReader::new(&stream)
            .read_line(&mut reply)
            .map_err(|e| io_err(&self.socket, e))?;
        if reply.trim().is_empty() {
            return Err(DaemonError::Protocol(
                "daemon hung up without replying".to_string(),
            ));
        }
        match serde_json::from_str(&reply)? {
            Reply::Error { message } => Err(DaemonError::Protocol(message)),
            reply => Ok(reply),
        }
    }

    /// Runtime status. Retries briefly so `daemon start &` followed by
    /// `daemon status` sees the new daemon.
    pub fn status(&self) -> Result<DaemonStatus, DaemonError> {
        let deadline = Instant::now() + STARTUP_GRACE;
        loop {
            match self.call(&Request::Status) {
                Ok(Reply::Status(status)) => return Ok(status),
                Ok(other) => return Err(unexpected("status", &other)),
                Err(DaemonError::DaemonNotRunning { .. }) if Instant::now() < deadline => {
                    sleep(STARTUP_POLL);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Queue a push and wait for its summary.
    pub fn push(&self, vault: Option<&str>) -> Result<PushSummary, DaemonError> {
        let request = Request::Push {
            vault: vault.map(str::to_string),
        };
        match self.call(&request)? {
            Reply::Pushed(summary) => Ok(summary),
            other => Err(unexpected("push", &other)),
        }
    }

    pub fn stop(&self) -> Result<(), DaemonError> {
        match self.call(&Request::Stop)? {
            Reply::Stopping => Ok(()),
            other => Err(unexpected("stop", &other)),
        }
    }
}

fn unexpected(command: &str, reply: &Reply) -> DaemonError {
    DaemonError::Protocol(format!("unexpected reply to {command}: {reply:?}"))
}

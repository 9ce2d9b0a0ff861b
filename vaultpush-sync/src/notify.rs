//! User-facing notices emitted by a push.

use std::sync::{Mutex, PoisonError};

use vaultpush_core::types::{CommitSha, LocalChange};

pub const NOTHING_TO_SYNC: &str = "No local changes detected.";
pub const REMOTE_ADVANCED: &str =
    "Remote changed after last pull/write, please pull again and run `vaultpush vault resync`.";

/// Receives one short human-readable message per notable event.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Forwards notices to the log at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        tracing::info!("{message}");
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _message: &str) {}
}

/// Keeps every notice, in order.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    messages: Mutex<Vec<String>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }
}

/// Notice for a change that has been pushed.
pub fn change_message(change: &LocalChange) -> String {
    match change {
        LocalChange::Created { path, .. } => format!("{path} added to remote."),
        LocalChange::Changed { path, .. } => format!("{path} modified on remote."),
        LocalChange::Deleted { path } => format!("{path} deleted from remote."),
    }
}

pub fn pushed_message(remote: &str) -> String {
    format!("Successfully pushed to {remote}")
}

pub fn resynced_message(commit: &CommitSha) -> String {
    format!("Baseline re-anchored at {}.", commit.short())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_messages() {
        let created = LocalChange::Created {
            path: "a.md".into(),
            extension: "md".into(),
        };
        let deleted = LocalChange::Deleted {
            path: "b.md".into(),
        };
        assert_eq!(change_message(&created), "a.md added to remote.");
        assert_eq!(change_message(&deleted), "b.md deleted from remote.");
    }

    #[test]
    fn memory_notifier_keeps_order() {
        let notifier = MemoryNotifier::new();
        notifier.notify("one");
        notifier.notify("two");
        assert_eq!(notifier.messages(), vec!["one", "two"]);
    }
}

//! Domain types for vaultpush.
//!
//! Filesystem locations use `PathBuf`; vault-relative file paths are `String`
//! with forward slashes, because they double as keys on the remote tree.
//! All types are serializable via serde (YAML for the registry, JSON for
//! baselines).

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a registered vault.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VaultName(pub String);

impl fmt::Display for VaultName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for VaultName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VaultName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a commit object on the remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitSha(pub String);

impl CommitSha {
    /// Abbreviated form for display (first 7 characters).
    pub fn short(&self) -> &str {
        abbreviate(&self.0)
    }
}

impl fmt::Display for CommitSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CommitSha {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CommitSha {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a tree object on the remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeSha(pub String);

impl TreeSha {
    /// Abbreviated form for display (first 7 characters).
    pub fn short(&self) -> &str {
        abbreviate(&self.0)
    }
}

impl fmt::Display for TreeSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TreeSha {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TreeSha {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a blob object on the remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobSha(pub String);

impl fmt::Display for BlobSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for BlobSha {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BlobSha {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

fn abbreviate(sha: &str) -> &str {
    match sha.char_indices().nth(7) {
        Some((idx, _)) => &sha[..idx],
        None => sha,
    }
}

/// Vault-relative path → hex content fingerprint.
///
/// Ordered so that serialized baselines are stable across runs.
pub type FingerprintMap = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Local changes
// ---------------------------------------------------------------------------

/// Classification of a single local change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Changed,
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Created => write!(f, "created"),
            ChangeKind::Changed => write!(f, "changed"),
            ChangeKind::Deleted => write!(f, "deleted"),
        }
    }
}

/// A file that differs between the baseline and the current vault.
///
/// Deletions carry no extension: the file no longer exists to be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LocalChange {
    Created { path: String, extension: String },
    Changed { path: String, extension: String },
    Deleted { path: String },
}

impl LocalChange {
    pub fn path(&self) -> &str {
        match self {
            LocalChange::Created { path, .. }
            | LocalChange::Changed { path, .. }
            | LocalChange::Deleted { path } => path,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            LocalChange::Created { .. } => ChangeKind::Created,
            LocalChange::Changed { .. } => ChangeKind::Changed,
            LocalChange::Deleted { .. } => ChangeKind::Deleted,
        }
    }

    pub fn extension(&self) -> Option<&str> {
        match self {
            LocalChange::Created { extension, .. } | LocalChange::Changed { extension, .. } => {
                Some(extension)
            }
            LocalChange::Deleted { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Baseline
// ---------------------------------------------------------------------------

/// The last point at which the vault and the remote were known consistent.
///
/// Treated as an immutable snapshot: a push reads one and produces a new one,
/// it never edits fields in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBaseline {
    pub local_sha: FingerprintMap,
    pub last_fetched_commit_sha: CommitSha,
    pub last_fetched_remote_sha: TreeSha,
    pub synced_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Registry entries
// ---------------------------------------------------------------------------

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_TOKEN_ENV: &str = "GITHUB_TOKEN";
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

/// Where a vault is pushed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSpec {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Name of the environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl RemoteSpec {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: default_branch(),
            token_env: default_token_env(),
            api_base: default_api_base(),
        }
    }

    /// `owner/repo`
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl fmt::Display for RemoteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.branch)
    }
}

/// A vault registered with vaultpush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub name: VaultName,
    /// Absolute path to the vault root on disk.
    pub path: PathBuf,
    pub remote: RemoteSpec,
    /// Extra vault-relative directory prefixes never pushed.
    #[serde(default)]
    pub exclude: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(VaultName::from("notes").to_string(), "notes");
        assert_eq!(CommitSha::from("abc").to_string(), "abc");
        assert_eq!(TreeSha::from("def").to_string(), "def");
    }

    #[test]
    fn short_sha_truncates_to_seven() {
        let sha = CommitSha::from("0123456789abcdef");
        assert_eq!(sha.short(), "0123456");
        assert_eq!(TreeSha::from("abc").short(), "abc");
    }

    #[test]
    fn deleted_change_has_no_extension() {
        let change = LocalChange::Deleted {
            path: "b.md".to_string(),
        };
        assert_eq!(change.kind(), ChangeKind::Deleted);
        assert_eq!(change.extension(), None);
        assert_eq!(change.path(), "b.md");
    }

    #[test]
    fn local_change_serializes_with_type_tag() {
        let change = LocalChange::Created {
            path: "a.md".to_string(),
            extension: "md".to_string(),
        };
        let yaml = serde_yaml::to_string(&change).expect("serialize");
        assert!(yaml.contains("type: created"));
        let back: LocalChange = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(back, change);
    }

    #[test]
    fn remote_spec_defaults_fill_missing_fields() {
        let yaml = "owner: me\nrepo: notes\n";
        let spec: RemoteSpec = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(spec.branch, DEFAULT_BRANCH);
        assert_eq!(spec.token_env, DEFAULT_TOKEN_ENV);
        assert_eq!(spec.api_base, DEFAULT_API_BASE);
        assert_eq!(spec.to_string(), "me/notes@main");
    }
}

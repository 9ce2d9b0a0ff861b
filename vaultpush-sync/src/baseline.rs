//! Baseline store: the last snapshot at which vault and remote agreed.
//!
//! Persists one JSON document per vault at
//! `<home>/.vaultpush/baselines/<vault>.json`.
//! Writes use the same atomic `.tmp` + rename pattern as the registry, so a
//! concurrent reader sees either the old snapshot or the new one.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use vaultpush_core::registry::validate_name;
use vaultpush_core::types::{CommitSha, FingerprintMap, LocalChange, SyncBaseline, TreeSha};

use crate::error::{io_err, SyncError};
use crate::tree::AppliedChange;

/// Loads and saves the baseline of one vault.
pub trait BaselineStore: Send + Sync {
    /// `None` when the vault has never been pushed.
    fn load(&self) -> Result<Option<SyncBaseline>, SyncError>;

    fn save(&self, baseline: &SyncBaseline) -> Result<(), SyncError>;
}

/// On-disk form. Also accepts camelCase field names and a missing
/// `synced_at`, so a baseline written by a plugin-side client can be copied
/// into place.
#[derive(Debug, Deserialize)]
struct BaselineCompat {
    #[serde(alias = "localSha")]
    local_sha: FingerprintMap,
    #[serde(alias = "lastFetchedCommitSha")]
    last_fetched_commit_sha: CommitSha,
    #[serde(alias = "lastFetchedRemoteSha")]
    last_fetched_remote_sha: TreeSha,
    synced_at: Option<DateTime<Utc>>,
}

/// `~/.vaultpush/baselines/<vault>.json`
pub fn store_path_at(home: &Path, vault: &str) -> PathBuf {
    home.join(".vaultpush")
        .join("baselines")
        .join(format!("{vault}.json"))
}

/// Load the baseline for `vault`, `None` if it was never written.
pub fn load_at(home: &Path, vault: &str) -> Result<Option<SyncBaseline>, SyncError> {
    validate_name(vault)?;
    let path = store_path_at(home, vault);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let stored: BaselineCompat = serde_json::from_str(&contents)?;
    Ok(Some(SyncBaseline {
        local_sha: stored.local_sha,
        last_fetched_commit_sha: stored.last_fetched_commit_sha,
        last_fetched_remote_sha: stored.last_fetched_remote_sha,
        synced_at: stored.synced_at.unwrap_or_else(Utc::now),
    }))
}

/// Save the baseline for `vault` atomically.
///
/// Writes to `<path>.tmp` then renames to `<path>`.
pub fn save_at(home: &Path, vault: &str, baseline: &SyncBaseline) -> Result<(), SyncError> {
    validate_name(vault)?;
    let path = store_path_at(home, vault);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid baseline path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(baseline)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// Remove the stored baseline, if any. The next push re-uploads every file.
pub fn reset_at(home: &Path, vault: &str) -> Result<bool, SyncError> {
    validate_name(vault)?;
    let path = store_path_at(home, vault);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(&path, err)),
    }
}

/// Baseline file of one registered vault.
#[derive(Debug, Clone)]
pub struct FileBaselineStore {
    home: PathBuf,
    vault: String,
}

impl FileBaselineStore {
    pub fn new(home: impl Into<PathBuf>, vault: impl Into<String>) -> Self {
        Self {
            home: home.into(),
            vault: vault.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        store_path_at(&self.home, &self.vault)
    }
}

impl BaselineStore for FileBaselineStore {
    fn load(&self) -> Result<Option<SyncBaseline>, SyncError> {
        load_at(&self.home, &self.vault)
    }

    fn save(&self, baseline: &SyncBaseline) -> Result<(), SyncError> {
        save_at(&self.home, &self.vault, baseline)
    }
}

/// In-memory baseline slot for tests.
#[derive(Debug, Default)]
pub struct MemoryBaselineStore {
    slot: Mutex<Option<SyncBaseline>>,
    fail_saves: bool,
}

impl MemoryBaselineStore {
    pub fn new(initial: Option<SyncBaseline>) -> Self {
        Self {
            slot: Mutex::new(initial),
            fail_saves: false,
        }
    }

    /// A store whose every save fails with an I/O error.
    pub fn read_only(initial: Option<SyncBaseline>) -> Self {
        Self {
            slot: Mutex::new(initial),
            fail_saves: true,
        }
    }

    pub fn current(&self) -> Option<SyncBaseline> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl BaselineStore for MemoryBaselineStore {
    fn load(&self) -> Result<Option<SyncBaseline>, SyncError> {
        Ok(self.current())
    }

    fn save(&self, baseline: &SyncBaseline) -> Result<(), SyncError> {
        if self.fail_saves {
            return Err(io_err(
                "<memory>",
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only baseline store"),
            ));
        }
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(baseline.clone());
        Ok(())
    }
}

/// Snapshot after a successful push.
///
/// Starts from the previous fingerprints and applies exactly what was
/// uploaded. Paths skipped during the push keep their old entry, so they
/// show up again as changes next time.
pub fn next_baseline(
    previous: Option<&SyncBaseline>,
    applied: &[AppliedChange],
    commit: CommitSha,
    tree: TreeSha,
    synced_at: DateTime<Utc>,
) -> SyncBaseline {
    let mut local_sha = previous.map(|b| b.local_sha.clone()).unwrap_or_default();
    for AppliedChange { change, fingerprint } in applied {
        match (change, fingerprint) {
            (LocalChange::Deleted { path }, _) => {
                local_sha.remove(path);
            }
            (_, Some(hash)) => {
                local_sha.insert(change.path().to_string(), hash.clone());
            }
            (_, None) => {}
        }
    }
    SyncBaseline {
        local_sha,
        last_fetched_commit_sha: commit,
        last_fetched_remote_sha: tree,
        synced_at,
    }
}

/// Record `baseline` after the branch moved to its commit.
///
/// A failure here means the remote is ahead of what is recorded locally; the
/// error keeps the pushed commit so the caller can report it.
pub fn commit_baseline<B>(store: &B, baseline: &SyncBaseline) -> Result<(), SyncError>
where
    B: BaselineStore + ?Sized,
{
    store.save(baseline).map_err(|source| SyncError::BaselinePersist {
        commit: baseline.last_fetched_commit_sha.clone(),
        source: Box::new(source),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(files: &[(&str, &str)]) -> SyncBaseline {
        SyncBaseline {
            local_sha: files
                .iter()
                .map(|(p, h)| (p.to_string(), h.to_string()))
                .collect(),
            last_fetched_commit_sha: CommitSha::from("c1"),
            last_fetched_remote_sha: TreeSha::from("t1"),
            synced_at: Utc::now(),
        }
    }

    fn applied(change: LocalChange, fingerprint: Option<&str>) -> AppliedChange {
        AppliedChange {
            change,
            fingerprint: fingerprint.map(str::to_string),
        }
    }

    #[test]
    fn missing_file_loads_as_none() {
        let tmp = TempDir::new().unwrap();
        assert!(load_at(tmp.path(), "notes").unwrap().is_none());
    }

    #[test]
    fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let baseline = sample(&[("a.md", "h1"), ("daily/b.md", "h2")]);
        save_at(tmp.path(), "notes", &baseline).unwrap();
        assert_eq!(load_at(tmp.path(), "notes").unwrap(), Some(baseline));
        let tmp_path = store_path_at(tmp.path(), "notes").with_extension("json.tmp");
        assert!(!tmp_path.exists(), "tmp file should be removed after atomic rename");
    }

    #[test]
    fn plugin_style_baseline_is_accepted() {
        let tmp = TempDir::new().unwrap();
        let path = store_path_at(tmp.path(), "imported");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{"localSha":{"a.md":"h1"},"lastFetchedCommitSha":"c9","lastFetchedRemoteSha":"t9"}"#,
        )
        .unwrap();

        let before = Utc::now();
        let loaded = load_at(tmp.path(), "imported").unwrap().expect("baseline");
        assert_eq!(loaded.local_sha["a.md"], "h1");
        assert_eq!(loaded.last_fetched_commit_sha, CommitSha::from("c9"));
        assert!(loaded.synced_at >= before);
    }

    #[test]
    fn corrupt_baseline_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = store_path_at(tmp.path(), "bad");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_at(tmp.path(), "bad"), Err(SyncError::Json(_))));
    }

    #[test]
    fn reset_removes_file() {
        let tmp = TempDir::new().unwrap();
        save_at(tmp.path(), "notes", &sample(&[])).unwrap();
        assert!(reset_at(tmp.path(), "notes").unwrap());
        assert!(!reset_at(tmp.path(), "notes").unwrap());
    }

    #[test]
    fn traversal_names_never_touch_the_filesystem() {
        let tmp = TempDir::new().unwrap();
        let err = save_at(tmp.path(), "../escaped", &sample(&[])).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Registry(vaultpush_core::error::RegistryError::InvalidName { .. })
        ));
        assert!(!tmp.path().join(".vaultpush").join("escaped.json").exists());
        assert!(load_at(tmp.path(), "a/b").is_err());
        assert!(reset_at(tmp.path(), ".hidden").is_err());
    }

    #[test]
    fn next_baseline_applies_uploaded_fingerprints() {
        let previous = sample(&[("a.md", "h1"), ("b.md", "h2"), ("c.md", "h3")]);
        let changes = vec![
            applied(
                LocalChange::Changed {
                    path: "a.md".into(),
                    extension: "md".into(),
                },
                Some("h1x"),
            ),
            applied(LocalChange::Deleted { path: "b.md".into() }, None),
            applied(
                LocalChange::Created {
                    path: "d.md".into(),
                    extension: "md".into(),
                },
                Some("h4"),
            ),
        ];
        let next = next_baseline(
            Some(&previous),
            &changes,
            CommitSha::from("c2"),
            TreeSha::from("t2"),
            Utc::now(),
        );
        let expected: FingerprintMap = [("a.md", "h1x"), ("c.md", "h3"), ("d.md", "h4")]
            .iter()
            .map(|(p, h)| (p.to_string(), h.to_string()))
            .collect();
        assert_eq!(next.local_sha, expected);
        assert_eq!(next.last_fetched_commit_sha, CommitSha::from("c2"));
        assert_eq!(next.last_fetched_remote_sha, TreeSha::from("t2"));
        assert_eq!(previous.local_sha.len(), 3, "previous snapshot is untouched");
    }

    #[test]
    fn failed_save_keeps_pushed_commit() {
        let store = MemoryBaselineStore::read_only(None);
        let baseline = sample(&[]);
        let err = commit_baseline(&store, &baseline).unwrap_err();
        match err {
            SyncError::BaselinePersist { commit, .. } => assert_eq!(commit, CommitSha::from("c1")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.current().is_none());
    }
}

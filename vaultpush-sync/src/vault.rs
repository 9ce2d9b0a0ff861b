//! Local store abstraction: the vault the push protocol reads from.
//!
//! Implementations:
//! - [`DiskVault`]: a directory on disk, read through `tokio::fs`
//! - [`MemoryVault`]: an in-memory map, for tests
//!
//! Paths handed to and returned from a store are vault-relative, use `/` as
//! separator, and never start with one.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use vaultpush_core::types::Vault;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("file not found in vault: {0}")]
    NotFound(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn vault_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> VaultError {
    VaultError::Io {
        path: path.into(),
        source,
    }
}

/// A file in a vault, as seen at the moment it was enumerated or resolved.
///
/// Reading goes back to the store, so the content is whatever the file holds
/// at read time; a file removed in between reports [`VaultError::NotFound`].
#[async_trait]
pub trait FileHandle: Send + Sync {
    /// Vault-relative path.
    fn path(&self) -> &str;

    /// Text after the last `.` of the file name; empty when there is none.
    fn extension(&self) -> &str;

    async fn read(&self) -> Result<Vec<u8>, VaultError>;
}

/// Enumerates and resolves files of a vault.
#[async_trait]
pub trait LocalStore: Send + Sync {
    type Handle: FileHandle;

    /// Every pushable file currently in the vault.
    async fn enumerate_files(&self) -> Result<Vec<Self::Handle>, VaultError>;

    /// Look up a single file; `None` when it does not exist (any more).
    async fn resolve(&self, path: &str) -> Result<Option<Self::Handle>, VaultError>;
}

/// Extension of a vault-relative path, following the vault convention that a
/// leading dot does not start an extension.
pub fn extension_of(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(0) | None => "",
        Some(idx) => &name[idx + 1..],
    }
}

// ---------------------------------------------------------------------------
// DiskVault
// ---------------------------------------------------------------------------

/// A vault rooted at a directory.
///
/// Dot-entries (`.git`, `.obsidian`, `.trash`, dotfiles) are never part of the
/// vault, nor is anything under a configured exclude prefix.
#[derive(Debug, Clone)]
pub struct DiskVault {
    root: PathBuf,
    exclude: Vec<String>,
}

impl DiskVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude: Vec::new(),
        }
    }

    pub fn from_vault(vault: &Vault) -> Self {
        Self::new(&vault.path).with_exclude(vault.exclude.clone())
    }

    pub fn with_exclude(mut self, exclude: Vec<String>) -> Self {
        self.exclude = exclude
            .into_iter()
            .map(|prefix| prefix.trim_matches('/').to_string())
            .filter(|prefix| !prefix.is_empty())
            .collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a vault-relative path is outside the pushable set.
    pub fn is_ignored(&self, rel: &str) -> bool {
        if rel.split('/').any(|segment| segment.starts_with('.')) {
            return true;
        }
        self.exclude
            .iter()
            .any(|prefix| rel == prefix || rel.starts_with(&format!("{prefix}/")))
    }

    fn handle(&self, rel: String) -> DiskFile {
        DiskFile {
            full_path: self.root.join(&rel),
            extension: extension_of(&rel).to_string(),
            path: rel,
        }
    }
}

/// A file of a [`DiskVault`].
#[derive(Debug, Clone)]
pub struct DiskFile {
    full_path: PathBuf,
    path: String,
    extension: String,
}

#[async_trait]
impl FileHandle for DiskFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn extension(&self) -> &str {
        &self.extension
    }

    async fn read(&self) -> Result<Vec<u8>, VaultError> {
        match tokio::fs::read(&self.full_path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(VaultError::NotFound(self.path.clone()))
            }
            Err(err) => Err(vault_io_err(&self.full_path, err)),
        }
    }
}

#[async_trait]
impl LocalStore for DiskVault {
    type Handle = DiskFile;

    async fn enumerate_files(&self) -> Result<Vec<DiskFile>, VaultError> {
        let mut files = Vec::new();
        let mut pending = vec![String::new()];

        while let Some(rel_dir) = pending.pop() {
            let dir = if rel_dir.is_empty() {
                self.root.clone()
            } else {
                self.root.join(&rel_dir)
            };
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // A subdirectory removed mid-walk is simply gone.
                Err(err) if err.kind() == ErrorKind::NotFound && !rel_dir.is_empty() => continue,
                Err(err) => return Err(vault_io_err(&dir, err)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| vault_io_err(&dir, e))?
            {
                let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                    tracing::warn!(
                        "skipping non UTF-8 file name under {}",
                        dir.display()
                    );
                    continue;
                };
                let rel = if rel_dir.is_empty() {
                    name
                } else {
                    format!("{rel_dir}/{name}")
                };
                if self.is_ignored(&rel) {
                    continue;
                }

                let file_type = match entry.file_type().await {
                    Ok(file_type) => file_type,
                    Err(err) if err.kind() == ErrorKind::NotFound => continue,
                    Err(err) => return Err(vault_io_err(entry.path(), err)),
                };
                if file_type.is_dir() {
                    pending.push(rel);
                } else if file_type.is_file() {
                    files.push(self.handle(rel));
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn resolve(&self, path: &str) -> Result<Option<DiskFile>, VaultError> {
        let rel = path.trim_start_matches('/');
        if rel.is_empty() || self.is_ignored(rel) || !is_plain_relative(rel) {
            return Ok(None);
        }
        let full_path = self.root.join(rel);
        match tokio::fs::metadata(&full_path).await {
            Ok(meta) if meta.is_file() => Ok(Some(self.handle(rel.to_string()))),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(vault_io_err(&full_path, err)),
        }
    }
}

fn is_plain_relative(rel: &str) -> bool {
    Path::new(rel)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

// ---------------------------------------------------------------------------
// MemoryVault
// ---------------------------------------------------------------------------

type SharedFiles = Arc<RwLock<BTreeMap<String, Vec<u8>>>>;

/// In-memory vault for tests. Clones share the same contents, so a test can
/// keep one handle to mutate the vault while a push holds another.
#[derive(Debug, Clone, Default)]
pub struct MemoryVault {
    files: SharedFiles,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files<P, C>(files: impl IntoIterator<Item = (P, C)>) -> Self
    where
        P: Into<String>,
        C: Into<Vec<u8>>,
    {
        let vault = Self::new();
        for (path, content) in files {
            vault.insert(path, content);
        }
        vault
    }

    pub fn insert(&self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), content.into());
    }

    pub fn remove(&self, path: &str) -> bool {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .is_some()
    }

    fn handle(&self, path: &str) -> MemoryFile {
        MemoryFile {
            path: path.to_string(),
            extension: extension_of(path).to_string(),
            files: Arc::clone(&self.files),
        }
    }
}

/// A file of a [`MemoryVault`].
#[derive(Debug, Clone)]
pub struct MemoryFile {
    path: String,
    extension: String,
    files: SharedFiles,
}

#[async_trait]
impl FileHandle for MemoryFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn extension(&self) -> &str {
        &self.extension
    }

    async fn read(&self) -> Result<Vec<u8>, VaultError> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.path)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(self.path.clone()))
    }
}

#[async_trait]
impl LocalStore for MemoryVault {
    type Handle = MemoryFile;

    async fn enumerate_files(&self) -> Result<Vec<MemoryFile>, VaultError> {
        let paths: Vec<String> = self
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        Ok(paths.iter().map(|p| self.handle(p)).collect())
    }

    async fn resolve(&self, path: &str) -> Result<Option<MemoryFile>, VaultError> {
        let exists = self
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path);
        Ok(exists.then(|| self.handle(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn extension_rules() {
        assert_eq!(extension_of("a.md"), "md");
        assert_eq!(extension_of("dir.v2/readme"), "");
        assert_eq!(extension_of("img/photo.final.png"), "png");
        assert_eq!(extension_of(".hidden"), "");
    }

    #[tokio::test]
    async fn disk_vault_enumerates_nested_files_and_skips_dot_dirs() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("daily/2024")).unwrap();
        fs::create_dir_all(root.path().join(".obsidian")).unwrap();
        fs::create_dir_all(root.path().join(".git")).unwrap();
        fs::write(root.path().join("a.md"), "a").unwrap();
        fs::write(root.path().join("daily/2024/01.md"), "b").unwrap();
        fs::write(root.path().join(".obsidian/app.json"), "{}").unwrap();
        fs::write(root.path().join(".git/HEAD"), "ref").unwrap();
        fs::write(root.path().join(".DS_Store"), "x").unwrap();

        let vault = DiskVault::new(root.path());
        let files = vault.enumerate_files().await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path()).collect();
        assert_eq!(paths, vec!["a.md", "daily/2024/01.md"]);
        assert_eq!(files[1].extension(), "md");
    }

    #[tokio::test]
    async fn disk_vault_honours_exclude_prefixes() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("attachments/raw")).unwrap();
        fs::write(root.path().join("attachments/raw/big.bin"), "x").unwrap();
        fs::write(root.path().join("attachments/keep.png"), "y").unwrap();

        let vault = DiskVault::new(root.path()).with_exclude(vec!["/attachments/raw/".into()]);
        let files = vault.enumerate_files().await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path()).collect();
        assert_eq!(paths, vec!["attachments/keep.png"]);
        assert!(vault.resolve("attachments/raw/big.bin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disk_vault_resolve_missing_and_traversal() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("dir")).unwrap();
        let vault = DiskVault::new(root.path());
        assert!(vault.resolve("missing.md").await.unwrap().is_none());
        assert!(vault.resolve("dir").await.unwrap().is_none());
        assert!(vault.resolve("../etc/passwd").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disk_file_read_after_removal_is_not_found() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("gone.md"), "bye").unwrap();
        let vault = DiskVault::new(root.path());
        let handle = vault.resolve("gone.md").await.unwrap().expect("resolved");
        fs::remove_file(root.path().join("gone.md")).unwrap();
        let err = handle.read().await.unwrap_err();
        assert!(matches!(err, VaultError::NotFound(p) if p == "gone.md"));
    }

    #[tokio::test]
    async fn memory_vault_handles_see_live_content() {
        let vault = MemoryVault::with_files([("a.md", "v1")]);
        let handle = vault.resolve("a.md").await.unwrap().expect("resolved");
        vault.insert("a.md", "v2");
        assert_eq!(handle.read().await.unwrap(), b"v2");
        vault.remove("a.md");
        assert!(matches!(handle.read().await, Err(VaultError::NotFound(_))));
    }
}

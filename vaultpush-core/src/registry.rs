//! Per-vault YAML registry.
//!
//! # Storage layout
//!
//! ```text
//! ~/.vaultpush/
//!   vaults/
//!     <vault_name>.yaml   (one file per vault: mode 0600, dir mode 0700)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::RegistryError;
use crate::types::{RemoteSpec, Vault, VaultName};

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.vaultpush/`: pure, no I/O.
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".vaultpush")
}

/// `<home>/.vaultpush/vaults/`
///
/// Creates the directory (mode `0700`) if it does not yet exist.
pub fn vaults_dir_at(home: &Path) -> Result<PathBuf, RegistryError> {
    let dir = root_at(home).join("vaults");
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

/// Check that `name` is a plain file stem.
///
/// Vault names become `vaults/<name>.yaml` and `baselines/<name>.json`, so
/// separators, parent segments and hidden names are refused.
pub fn validate_name(name: &str) -> Result<(), RegistryError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.contains(|c: char| matches!(c, '/' | '\\' | '\0')) {
        Some("name contains a path separator")
    } else if name.contains("..") {
        Some("name contains '..'")
    } else if name.starts_with('.') {
        Some("name starts with '.'")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(RegistryError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// `<home>/.vaultpush/vaults/<vault>.yaml`: pure, no I/O.
pub fn vault_path_at(home: &Path, vault: &VaultName) -> PathBuf {
    root_at(home).join("vaults").join(format!("{}.yaml", vault.0))
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load a single vault from `<home>/.vaultpush/vaults/<vault>.yaml`.
///
/// Returns `RegistryError::RegistryNotFound` if absent,
/// `RegistryError::Parse` (with path + line context) if malformed YAML.
pub fn load_vault_at(home: &Path, vault: &VaultName) -> Result<Vault, RegistryError> {
    validate_name(&vault.0)?;
    let path = vault_path_at(home, vault);
    if !path.exists() {
        return Err(RegistryError::RegistryNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| RegistryError::Parse { path, source: e })
}

/// `load_vault_at` convenience wrapper.
pub fn load_vault(vault: &VaultName) -> Result<Vault, RegistryError> {
    load_vault_at(&home()?, vault)
}

/// Read every `<home>/.vaultpush/vaults/*.yaml`, sorted by vault name.
pub fn list_vaults_at(home: &Path) -> Result<Vec<Vault>, RegistryError> {
    let dir = root_at(home).join("vaults");
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut entries: Vec<_> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut vaults = Vec::new();
    for entry in entries {
        let fname = entry.file_name();
        if !fname.to_string_lossy().ends_with(".yaml") {
            continue;
        }
        let contents = std::fs::read_to_string(entry.path())?;
        let vault: Vault = serde_yaml::from_str(&contents).map_err(|e| RegistryError::Parse {
            path: entry.path(),
            source: e,
        })?;
        vaults.push(vault);
    }
    vaults.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(vaults)
}

/// `list_vaults_at` convenience wrapper.
pub fn list_vaults() -> Result<Vec<Vault>, RegistryError> {
    list_vaults_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save a vault to `<home>/.vaultpush/vaults/<vault>.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
/// `.tmp` is always in the same directory as the target (same filesystem: no EXDEV).
pub fn save_vault_at(home: &Path, vault: &Vault) -> Result<(), RegistryError> {
    validate_name(&vault.name.0)?;
    vaults_dir_at(home)?;
    let path = vault_path_at(home, &vault.name);
    let tmp_path = path.with_file_name(format!("{}.yaml.tmp", vault.name.0));

    let yaml = serde_yaml::to_string(vault)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_vault_at` convenience wrapper.
pub fn save_vault(vault: &Vault) -> Result<(), RegistryError> {
    save_vault_at(&home()?, vault)
}

// ---------------------------------------------------------------------------
// 4. Init
// ---------------------------------------------------------------------------

/// Register the vault at `vault_path`, pushing to `remote`.
///
/// The vault name defaults to the directory name. Idempotent: if a config
/// with that name already exists it is loaded and returned unchanged.
pub fn init_at(
    vault_path: PathBuf,
    name: Option<VaultName>,
    remote: RemoteSpec,
    home: &Path,
) -> Result<Vault, RegistryError> {
    let name = name.unwrap_or_else(|| {
        VaultName::from(
            vault_path
                .file_name()
                .unwrap_or_else(|| vault_path.as_os_str())
                .to_string_lossy()
                .into_owned(),
        )
    });
    validate_name(&name.0)?;

    let yaml_path = vault_path_at(home, &name);
    if yaml_path.exists() {
        return load_vault_at(home, &name);
    }

    let now = Utc::now();
    let vault = Vault {
        name,
        path: vault_path,
        remote,
        exclude: vec![],
        created_at: now,
        updated_at: now,
    };

    save_vault_at(home, &vault)?;
    Ok(vault)
}

/// `init_at` convenience wrapper.
pub fn init(
    vault_path: PathBuf,
    name: Option<VaultName>,
    remote: RemoteSpec,
) -> Result<Vault, RegistryError> {
    init_at(vault_path, name, remote, &home()?)
}

// ---------------------------------------------------------------------------
// 5. Remove
// ---------------------------------------------------------------------------

/// Delete a vault config. Returns `RegistryNotFound` if it was never registered.
pub fn remove_vault_at(home: &Path, vault: &VaultName) -> Result<(), RegistryError> {
    validate_name(&vault.0)?;
    let path = vault_path_at(home, vault);
    if !path.exists() {
        return Err(RegistryError::RegistryNotFound { path });
    }
    std::fs::remove_file(&path)?;
    Ok(())
}

/// `remove_vault_at` convenience wrapper.
pub fn remove_vault(vault: &VaultName) -> Result<(), RegistryError> {
    remove_vault_at(&home()?, vault)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, RegistryError> {
    dirs::home_dir().ok_or(RegistryError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_home() -> TempDir {
        TempDir::new().expect("tempdir")
    }

    fn notes() -> VaultName {
        VaultName::from("notes")
    }

    fn remote() -> RemoteSpec {
        RemoteSpec::new("me", "notes-backup")
    }

    #[test]
    fn vault_path_is_correct() {
        let home = make_home();
        let path = vault_path_at(home.path(), &notes());
        assert!(path.ends_with(".vaultpush/vaults/notes.yaml"));
    }

    #[test]
    fn vaults_dir_created_with_perms() {
        let home = make_home();
        let dir = vaults_dir_at(home.path()).expect("vaults_dir_at");
        assert!(dir.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
    }

    #[test]
    fn init_names_vault_after_directory() {
        let home = make_home();
        let vault = init_at(PathBuf::from("/data/notes"), None, remote(), home.path())
            .expect("init");
        assert_eq!(vault.name, notes());
        assert_eq!(vault.remote.repo, "notes-backup");
    }

    #[test]
    fn init_is_idempotent() {
        let home = make_home();
        let first = init_at(PathBuf::from("/data/notes"), None, remote(), home.path())
            .expect("first init");
        let second = init_at(
            PathBuf::from("/elsewhere/notes"),
            None,
            RemoteSpec::new("other", "repo"),
            home.path(),
        )
        .expect("second init");
        assert_eq!(first, second, "existing config must be returned unchanged");
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let home = make_home();
        init_at(PathBuf::from("/data/notes"), None, remote(), home.path()).expect("init");
        let tmp = vault_path_at(home.path(), &notes()).with_file_name("notes.yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn load_missing_vault_returns_not_found() {
        let home = make_home();
        let err = load_vault_at(home.path(), &notes()).unwrap_err();
        assert!(matches!(err, RegistryError::RegistryNotFound { .. }));
    }

    #[test]
    fn list_vaults_empty_when_nothing_registered() {
        let home = make_home();
        let list = list_vaults_at(home.path()).expect("list");
        assert!(list.is_empty());
    }

    #[test]
    fn remove_deletes_config() {
        let home = make_home();
        init_at(PathBuf::from("/data/notes"), None, remote(), home.path()).expect("init");
        remove_vault_at(home.path(), &notes()).expect("remove");
        assert!(!vault_path_at(home.path(), &notes()).exists());
        let err = remove_vault_at(home.path(), &notes()).unwrap_err();
        assert!(matches!(err, RegistryError::RegistryNotFound { .. }));
    }

    #[test]
    fn names_that_escape_the_registry_are_refused() {
        let home = make_home();
        for bad in ["../x", "a/b", "a\\b", "..", ".hidden", "", "x..y"] {
            let err = init_at(
                PathBuf::from("/data/notes"),
                Some(VaultName::from(bad)),
                remote(),
                home.path(),
            )
            .unwrap_err();
            assert!(
                matches!(err, RegistryError::InvalidName { ref name, .. } if name == bad),
                "{bad:?} accepted"
            );
        }
        assert!(!home.path().join(".vaultpush").join("x.yaml").exists());
        assert!(list_vaults_at(home.path()).expect("list").is_empty());
        assert!(matches!(
            load_vault_at(home.path(), &VaultName::from("../x")),
            Err(RegistryError::InvalidName { .. })
        ));
    }

    #[test]
    fn ordinary_names_are_accepted() {
        for good in ["notes", "work-vault", "Vault 2024", "a.b"] {
            validate_name(good).expect(good);
        }
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(RegistryError::HomeNotFound.to_string().contains("home directory"));
    }
}

//! Registry error-message, atomic-write-safety, and init integration tests.
//! Storage: ~/.vaultpush/vaults/<vault>.yaml

use assert_fs::prelude::*;
use chrono::Utc;
use predicates::prelude::predicate;
use std::fs;
use vaultpush_core::{
    registry,
    types::{RemoteSpec, Vault, VaultName},
    RegistryError,
};

fn notes() -> VaultName {
    VaultName::from("notes")
}

fn remote() -> RemoteSpec {
    RemoteSpec::new("me", "notes-backup")
}

fn vaults_dir(home: &std::path::Path) -> std::path::PathBuf {
    home.join(".vaultpush").join("vaults")
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_vault_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = registry::load_vault_at(home.path(), &notes()).unwrap_err();
    assert!(matches!(err, RegistryError::RegistryNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("vault config not found"));
    assert!(err.to_string().contains("notes.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = vaults_dir(home.path());
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("notes.yaml"), b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = registry::load_vault_at(home.path(), &notes()).unwrap_err();
    assert!(matches!(err, RegistryError::Parse { .. }), "got: {err}");
    let msg = err.to_string();
    assert!(msg.contains("notes.yaml"), "must contain file path, got: {msg}");
}

#[test]
fn load_config_missing_remote_returns_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = vaults_dir(home.path());
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(
        dir.join("notes.yaml"),
        "name: notes\npath: /data/notes\ncreated_at: 2024-01-01T00:00:00Z\nupdated_at: 2024-01-01T00:00:00Z\n",
    )
    .expect("write");

    let err = registry::load_vault_at(home.path(), &notes()).unwrap_err();
    assert!(matches!(err, RegistryError::Parse { .. }), "got: {err}");
}

#[test]
fn handwritten_config_gets_remote_defaults() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = vaults_dir(home.path());
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(
        dir.join("notes.yaml"),
        "name: notes\npath: /data/notes\nremote:\n  owner: me\n  repo: backup\ncreated_at: 2024-01-01T00:00:00Z\nupdated_at: 2024-01-01T00:00:00Z\n",
    )
    .expect("write");

    let vault = registry::load_vault_at(home.path(), &notes()).expect("load");
    assert_eq!(vault.remote.branch, "main");
    assert_eq!(vault.remote.token_env, "GITHUB_TOKEN");
    assert!(vault.exclude.is_empty());
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn mid_write_crash_leaves_original_intact() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let now = Utc::now();
    let vault = Vault {
        name: notes(),
        path: std::path::PathBuf::from("/data/notes"),
        remote: remote(),
        exclude: vec![],
        created_at: now,
        updated_at: now,
    };
    registry::save_vault_at(home.path(), &vault).expect("save");

    let yaml_path = registry::vault_path_at(home.path(), &notes());
    let original_bytes = fs::read(&yaml_path).expect("read original");

    // Simulate crash: .tmp written but process died before rename
    let tmp = yaml_path.with_file_name("notes.yaml.tmp");
    fs::write(&tmp, b"CRASH - INCOMPLETE WRITE").expect("write crash tmp");

    let current_bytes = fs::read(&yaml_path).expect("read after crash");
    assert_eq!(original_bytes, current_bytes, "original must be unchanged after crash");

    // A stray .tmp must not break listing.
    let list = registry::list_vaults_at(home.path()).expect("list");
    assert_eq!(list.len(), 1);
}

// ---------------------------------------------------------------------------
// 3. Init integration test
// ---------------------------------------------------------------------------

#[test]
fn init_creates_per_vault_yaml() {
    let home = assert_fs::TempDir::new().expect("home tempdir");
    let vault_dir = assert_fs::TempDir::new().expect("vault tempdir");

    let vault = registry::init_at(vault_dir.path().to_path_buf(), None, remote(), home.path())
        .expect("init");

    let expected_rel = format!(
        ".vaultpush/vaults/{}.yaml",
        vault_dir.path().file_name().unwrap().to_string_lossy()
    );
    home.child(&expected_rel).assert(predicate::path::exists());

    let yaml_path = registry::vault_path_at(home.path(), &vault.name);
    let contents = fs::read_to_string(&yaml_path).expect("read");
    let loaded: Vault = serde_yaml::from_str(&contents).expect("roundtrip");
    assert_eq!(loaded.name, vault.name);
    assert_eq!(loaded.remote, remote());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&yaml_path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "expected 0600, got {mode:o}");
    }
}

#[test]
fn init_with_explicit_name() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let vault_dir = assert_fs::TempDir::new().expect("tempdir");

    registry::init_at(
        vault_dir.path().to_path_buf(),
        Some(VaultName::from("work")),
        remote(),
        home.path(),
    )
    .expect("init");

    home.child(".vaultpush/vaults/work.yaml")
        .assert(predicate::path::exists());
}

// ---------------------------------------------------------------------------
// 4. Multiple vaults and list
// ---------------------------------------------------------------------------

#[test]
fn list_is_sorted_and_deterministic() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let alpha = assert_fs::TempDir::new().expect("tempdir");
    let beta = assert_fs::TempDir::new().expect("tempdir");

    // Register beta before alpha intentionally
    registry::init_at(
        beta.path().to_path_buf(),
        Some(VaultName::from("beta")),
        remote(),
        home.path(),
    )
    .expect("beta");
    registry::init_at(
        alpha.path().to_path_buf(),
        Some(VaultName::from("alpha")),
        remote(),
        home.path(),
    )
    .expect("alpha");

    let list = registry::list_vaults_at(home.path()).expect("list");
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].name, VaultName::from("alpha"));
    assert_eq!(list[1].name, VaultName::from("beta"));
}

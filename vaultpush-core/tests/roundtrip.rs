//! Serialisation tests for the persisted `vaultpush-core` types.
//!
//! Each `#[case]` is isolated: no shared state.

use chrono::Utc;
use rstest::rstest;
use std::path::PathBuf;
use vaultpush_core::types::{
    CommitSha, FingerprintMap, RemoteSpec, SyncBaseline, TreeSha, Vault, VaultName,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn baseline_with(paths: &[(&str, &str)]) -> SyncBaseline {
    SyncBaseline {
        local_sha: paths
            .iter()
            .map(|(p, h)| (p.to_string(), h.to_string()))
            .collect::<FingerprintMap>(),
        last_fetched_commit_sha: CommitSha::from("c0ffee0000000000000000000000000000000000"),
        last_fetched_remote_sha: TreeSha::from("7ree000000000000000000000000000000000000"),
        synced_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Baseline JSON
// ---------------------------------------------------------------------------

#[rstest]
#[case("empty_vault", baseline_with(&[]))]
#[case("nested_paths", baseline_with(&[("daily/2024-01-01.md", "h1"), ("a.md", "h2")]))]
#[case("unicode_paths", baseline_with(&[("日本語/ノート.md", "h1"), ("заметки.md", "h2")]))]
fn baseline_json_roundtrip(#[case] label: &str, #[case] baseline: SyncBaseline) {
    let json = serde_json::to_string(&baseline)
        .unwrap_or_else(|e| panic!("[{label}] serialize failed: {e}"));
    let back: SyncBaseline = serde_json::from_str(&json)
        .unwrap_or_else(|e| panic!("[{label}] deserialize failed: {e}"));
    assert_eq!(baseline, back, "[{label}] baseline");
}

#[test]
fn baseline_json_uses_plain_sha_strings() {
    let baseline = baseline_with(&[("a.md", "h1")]);
    let value = serde_json::to_value(&baseline).expect("to_value");
    assert_eq!(
        value["last_fetched_commit_sha"],
        serde_json::json!("c0ffee0000000000000000000000000000000000")
    );
    assert_eq!(value["local_sha"]["a.md"], serde_json::json!("h1"));
}

// ---------------------------------------------------------------------------
// Vault YAML
// ---------------------------------------------------------------------------

#[test]
fn vault_yaml_keeps_excludes_and_remote() {
    let now = Utc::now();
    let mut remote = RemoteSpec::new("me", "notes-backup");
    remote.branch = "vault".to_string();
    let vault = Vault {
        name: VaultName::from("notes"),
        path: PathBuf::from("/data/notes"),
        remote,
        exclude: vec!["attachments/raw".to_string()],
        created_at: now,
        updated_at: now,
    };
    let yaml = serde_yaml::to_string(&vault).expect("serialize");
    let back: Vault = serde_yaml::from_str(&yaml).expect("deserialize");
    assert_eq!(back, vault);
}

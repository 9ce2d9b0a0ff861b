//! Change detection between a baseline fingerprint map and the live vault.

use std::collections::BTreeSet;

use vaultpush_core::types::{ChangeKind, FingerprintMap, LocalChange};

use crate::error::SyncError;
use crate::vault::{FileHandle, LocalStore};

/// A path and how it differs from the baseline, before extension lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedPath {
    pub path: String,
    pub kind: ChangeKind,
}

/// Three-way diff of two fingerprint maps, sorted by path.
///
/// Without a previous map every current path counts as `Changed`: nothing is
/// known about the remote, so every file must be written.
pub fn classify(previous: Option<&FingerprintMap>, current: &FingerprintMap) -> Vec<ClassifiedPath> {
    let Some(previous) = previous else {
        return current
            .keys()
            .map(|path| ClassifiedPath {
                path: path.clone(),
                kind: ChangeKind::Changed,
            })
            .collect();
    };

    let paths: BTreeSet<&String> = previous.keys().chain(current.keys()).collect();
    paths
        .into_iter()
        .filter_map(|path| {
            let kind = match (previous.get(path), current.get(path)) {
                (None, Some(_)) => ChangeKind::Created,
                (Some(_), None) => ChangeKind::Deleted,
                (Some(old), Some(new)) if old != new => ChangeKind::Changed,
                _ => return None,
            };
            Some(ClassifiedPath {
                path: path.clone(),
                kind,
            })
        })
        .collect()
}

/// Classify and attach file extensions from the live store.
///
/// A created or changed path that no longer resolves is skipped with a
/// warning; the rest of the batch is still reported.
pub async fn detect<S>(
    previous: Option<&FingerprintMap>,
    current: &FingerprintMap,
    store: &S,
) -> Result<Vec<LocalChange>, SyncError>
where
    S: LocalStore + ?Sized,
{
    let mut changes = Vec::new();
    for ClassifiedPath { path, kind } in classify(previous, current) {
        if kind == ChangeKind::Deleted {
            changes.push(LocalChange::Deleted { path });
            continue;
        }
        let Some(handle) = store.resolve(&path).await? else {
            tracing::warn!("{path} included in local changes ({kind}) but not found, skipping");
            continue;
        };
        let extension = handle.extension().to_string();
        changes.push(match kind {
            ChangeKind::Created => LocalChange::Created { path, extension },
            _ => LocalChange::Changed { path, extension },
        });
    }
    Ok(changes)
}

//! Content fingerprints of a vault.

use futures::{stream, StreamExt, TryStreamExt};
use sha2::{Digest, Sha256};

use vaultpush_core::types::FingerprintMap;

use crate::error::SyncError;
use crate::vault::{FileHandle, LocalStore, VaultError};

/// Maximum number of file reads in flight while hashing.
pub const READ_CONCURRENCY: usize = 16;

/// Hex SHA-256 of raw file bytes.
pub fn fingerprint(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Fingerprint every file currently in `store`.
///
/// Only content matters: timestamps and permissions never change a
/// fingerprint. A file removed between enumeration and read is left out.
pub async fn compute_fingerprints<S>(store: &S) -> Result<FingerprintMap, SyncError>
where
    S: LocalStore + ?Sized,
{
    let files = store.enumerate_files().await?;
    let total = files.len();

    let entries: Vec<Option<(String, String)>> = stream::iter(files)
        .map(|file| async move {
            match file.read().await {
                Ok(bytes) => Ok(Some((file.path().to_string(), fingerprint(&bytes)))),
                Err(VaultError::NotFound(path)) => {
                    tracing::debug!("{path} disappeared before it could be hashed");
                    Ok(None)
                }
                Err(err) => Err(err),
            }
        })
        .buffer_unordered(READ_CONCURRENCY)
        .try_collect()
        .await?;

    let map: FingerprintMap = entries.into_iter().flatten().collect();
    tracing::debug!("hashed {} of {} enumerated files", map.len(), total);
    Ok(map)
}

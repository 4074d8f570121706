//! Async wrappers that off-load archive extraction to a blocking thread.

use std::path::{Path, PathBuf};

use crate::{ExtractError, ExtractResult};

/// Extracts a package archive from disk into the destination directory on a
/// blocking worker thread.
pub async fn extract(archive: &Path, destination: &Path) -> Result<ExtractResult, ExtractError> {
    let archive: PathBuf = archive.to_owned();
    let destination: PathBuf = destination.to_owned();
    match ::tokio::task::spawn_blocking(move || crate::fs::extract(&archive, &destination)).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => Err(ExtractError::Cancelled),
    }
}

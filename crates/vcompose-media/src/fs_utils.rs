//! Filesystem helpers for moving encoder outputs into place.
//!
//! Job work directories usually live under `$TMPDIR`, which is often a
//! different filesystem from the requested output path.

use std::path::Path;
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// Tries a rename first and falls back to copy-then-delete on EXDEV. The copy
/// lands in a sibling temp file that is renamed over `dst`, so readers of
/// `dst` never see a partial file.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if !src.is_file() {
        return Err(MediaError::FileNotFound(src.to_path_buf()));
    }

    ensure_parent_dir(dst).await?;

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename detected, falling back to copy+delete: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Size of a file in bytes, or 0 when it does not exist.
pub async fn file_size(path: impl AsRef<Path>) -> u64 {
    fs::metadata(path.as_ref())
        .await
        .map(|m| if m.is_file() { m.len() } else { 0 })
        .unwrap_or(0)
}

/// Create the parent directory of `path` if it is missing.
pub async fn ensure_parent_dir(path: &Path) -> MediaResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// EXDEV is error code 18 on Linux and macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    let tmp_dst = dst.with_extension("partial");

    fs::copy(src, &tmp_dst).await.map_err(|e| {
        tracing::error!(
            "Failed to copy {} -> {}: {}",
            src.display(),
            tmp_dst.display(),
            e
        );
        MediaError::from(e)
    })?;

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        tracing::error!(
            "Failed to rename {} -> {}: {}",
            tmp_dst.display(),
            dst.display(),
            e
        );
        return Err(MediaError::from(e));
    }

    // Source lives in the job work dir, which is removed anyway
    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!("Failed to remove {} after copy: {}", src.display(), e);
    }

    Ok(())
}

//! C6: Storage Promoter.
//!
//! Atomically renames a staging directory into the permanent deposits root
//! (`spec.md` §4.6). On same-filesystem rename this is one POSIX `rename`;
//! on cross-device moves it falls back to copy-then-fsync-then-rename,
//! leaving no partial destination visible.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub(crate) enum PromoteError {
    #[error("destination {0:?} already exists")]
    AlreadyExists(PathBuf),
    #[error("promotion failed: {0}")]
    Io(#[source] io::Error),
}

/// Promote `staging_dir` to `storage_dir`. Precondition: `storage_dir` does
/// not already exist.
pub(crate) async fn promote(staging_dir: &Path, storage_dir: &Path) -> Result<(), PromoteError> {
    if tokio::fs::try_exists(storage_dir)
        .await
        .map_err(PromoteError::Io)?
    {
        return Err(PromoteError::AlreadyExists(storage_dir.to_owned()));
    }

    match tokio::fs::rename(staging_dir, storage_dir).await {
        Ok(()) => {
            debug!(from = %staging_dir.display(), to = %storage_dir.display(), "promoted via rename");
            Ok(())
        }
        Err(err) if is_cross_device(&err) => {
            warn!("cross-device promotion, falling back to copy-then-rename");
            promote_cross_device(staging_dir, storage_dir).await
        }
        Err(err) => Err(PromoteError::Io(err)),
    }
}

#[cfg(unix)]
fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_err: &io::Error) -> bool {
    false
}

/// Copy `staging_dir` into a sibling temp directory under the same parent
/// as `storage_dir`, fsync every file and the directory itself, then
/// perform the final rename from the temp directory into place. The
/// temp-directory rename is same-filesystem by construction, so the
/// destination is never observable half-written.
async fn promote_cross_device(staging_dir: &Path, storage_dir: &Path) -> Result<(), PromoteError> {
    let parent = storage_dir
        .parent()
        .expect("storage dir always has a parent")
        .to_owned();

    let tmp_dir = tempfile::Builder::new()
        .prefix(".promote-")
        .tempdir_in(&parent)
        .map_err(PromoteError::Io)?;
    let tmp_path = tmp_dir.path().to_owned();

    copy_tree_and_fsync(staging_dir, &tmp_path)
        .await
        .map_err(PromoteError::Io)?;

    // Keep the temp dir from being cleaned up by its guard; we are about to
    // rename it into its final place.
    let tmp_path = tmp_dir.into_path();

    tokio::fs::rename(&tmp_path, storage_dir)
        .await
        .map_err(PromoteError::Io)?;

    tokio::fs::remove_dir_all(staging_dir)
        .await
        .map_err(PromoteError::Io)?;

    debug!(from = %staging_dir.display(), to = %storage_dir.display(), "promoted via copy-then-rename");
    Ok(())
}

async fn copy_tree_and_fsync(src: &Path, dest: &Path) -> io::Result<()> {
    let mut stack = vec![(src.to_owned(), dest.to_owned())];

    while let Some((src_dir, dest_dir)) = stack.pop() {
        tokio::fs::create_dir_all(&dest_dir).await?;

        let mut entries = tokio::fs::read_dir(&src_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let dest_path = dest_dir.join(entry.file_name());

            if file_type.is_dir() {
                stack.push((entry.path(), dest_path));
            } else {
                tokio::fs::copy(entry.path(), &dest_path).await?;
                let file = tokio::fs::File::open(&dest_path).await?;
                file.sync_all().await?;
            }
        }

        let dir_handle = tokio::fs::File::open(&dest_dir).await?;
        dir_handle.sync_all().await?;
    }

    Ok(())
}

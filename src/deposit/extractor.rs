//! C3: Archive Extractor Adapter.
//!
//! Unpacks a ZIP-family archive into a destination directory, preserving
//! relative paths and rejecting path-traversal entries (`spec.md` §4.3).

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum ExtractError {
    #[error("archive entry {0:?} escapes the extraction destination")]
    PathTraversal(String),
    #[error("archive is corrupt or truncated: {0}")]
    Corrupt(#[source] zip::result::ZipError),
    #[error("io error during extraction: {0}")]
    Io(#[source] io::Error),
}

/// Seam between the orchestrator and the concrete archive library, mirroring
/// the teacher crate's `RegistryStorage`/`AuthProvider` trait style.
pub(crate) trait ArchiveExtractor: Send + Sync {
    /// Extract `archive_path` into `dest_dir`, which must already exist.
    fn extract(&self, archive_path: &Path, dest_dir: &Path) -> Result<(), ExtractError>;
}

/// Resolve a zip entry's declared path against `dest_dir`, rejecting any
/// entry whose normalized path would escape it.
fn safe_join(dest_dir: &Path, entry_name: &str) -> Result<PathBuf, ExtractError> {
    let mut out = dest_dir.to_path_buf();

    for component in Path::new(entry_name).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ExtractError::PathTraversal(entry_name.to_owned()));
            }
        }
    }

    Ok(out)
}

/// Production implementation backed by the `zip` crate.
pub(crate) struct ZipExtractor;

impl ArchiveExtractor for ZipExtractor {
    fn extract(&self, archive_path: &Path, dest_dir: &Path) -> Result<(), ExtractError> {
        let file = fs::File::open(archive_path).map_err(ExtractError::Io)?;
        let mut archive = zip::ZipArchive::new(file).map_err(ExtractError::Corrupt)?;

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(ExtractError::Corrupt)?;
            let name = entry.name().to_owned();
            let out_path = safe_join(dest_dir, &name)?;

            if entry.is_dir() {
                fs::create_dir_all(&out_path).map_err(ExtractError::Io)?;
                continue;
            }

            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent).map_err(ExtractError::Io)?;
            }

            let mut out_file = fs::File::create(&out_path).map_err(ExtractError::Io)?;
            io::copy(&mut entry, &mut out_file).map_err(ExtractError::Io)?;
        }

        Ok(())
    }
}

//! C2: Chunk Reassembler.
//!
//! Reassembles (and, for chunked uploads, concatenates) the deposit parts
//! found directly under a staging directory into a single archive, then
//! hands it to C3 for extraction (`spec.md` §4.2).

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use md5::{Digest, Md5};
use tracing::debug;

use super::extractor::ArchiveExtractor;
use super::types::{DepositError, MimeType};

const MERGED_ARCHIVE_NAME: &str = "merged.archive";
const PROPERTIES_FILE_NAME: &str = "deposit.properties";

/// Compute the lowercase-hex MD5 of a file's contents. Used at ingress to
/// verify a just-written part against the client-supplied hash.
pub(crate) async fn md5_hex_of_file(path: &Path) -> io::Result<String> {
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || -> io::Result<String> {
        let mut file = fs::File::open(&path)?;
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; 1024 * 1024];
        loop {
            let read = file.read(&mut buf)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .expect("blocking hash task panicked")
}

/// List the deposit part files directly under `staging_dir`, excluding the
/// properties record and any previously merged archive, sorted by file
/// name for deterministic single-part processing.
async fn list_parts(staging_dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(staging_dir).await?;
    let mut parts = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if name == PROPERTIES_FILE_NAME || name == MERGED_ARCHIVE_NAME {
            continue;
        }
        parts.push(entry.path());
    }

    parts.sort();
    Ok(parts)
}

/// Parse the 1-based sequence number from a chunked part's filename, the
/// integer suffix after the last `.`.
fn sequence_number(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let suffix = name.rsplit('.').next()?;
    if suffix == name {
        // No `.` in the filename at all.
        return None;
    }
    suffix.parse().ok()
}

async fn is_regular_file(path: &Path) -> io::Result<bool> {
    Ok(tokio::fs::metadata(path).await?.is_file())
}

/// Reassemble and extract the parts found under `staging_dir` according to
/// `mime`, then delete the consumed part files (and, for chunked uploads,
/// the merged archive).
pub(crate) async fn reassemble(
    staging_dir: &Path,
    mime: MimeType,
    extractor: Arc<dyn ArchiveExtractor>,
) -> Result<(), DepositError> {
    let parts = list_parts(staging_dir)
        .await
        .map_err(|err| DepositError::Failed(format!("could not list staging directory: {err}")))?;

    if parts.is_empty() {
        return Err(DepositError::Invalid("no payload".to_owned()));
    }

    match mime {
        MimeType::Single => reassemble_single(staging_dir, parts, extractor).await,
        MimeType::Chunked => reassemble_chunked(staging_dir, parts, extractor).await,
    }
}

async fn reassemble_single(
    staging_dir: &Path,
    parts: Vec<PathBuf>,
    extractor: Arc<dyn ArchiveExtractor>,
) -> Result<(), DepositError> {
    for part in parts {
        if !is_regular_file(&part)
            .await
            .map_err(|err| DepositError::Failed(format!("could not stat part: {err}")))?
        {
            return Err(DepositError::Failed("inconsistent dataset".to_owned()));
        }

        extract_blocking(extractor.clone(), part.clone(), staging_dir.to_owned()).await?;

        tokio::fs::remove_file(&part)
            .await
            .map_err(|err| DepositError::Failed(format!("could not remove consumed part: {err}")))?;
    }

    Ok(())
}

async fn reassemble_chunked(
    staging_dir: &Path,
    parts: Vec<PathBuf>,
    extractor: Arc<dyn ArchiveExtractor>,
) -> Result<(), DepositError> {
    let mut numbered: Vec<(u64, PathBuf)> = Vec::with_capacity(parts.len());
    for part in &parts {
        let seq = sequence_number(part).ok_or_else(|| {
            DepositError::Invalid("incorrect extension; should be a sequence number".to_owned())
        })?;
        numbered.push((seq, part.clone()));
    }
    numbered.sort_by_key(|(seq, _)| *seq);

    let merged_path = staging_dir.join(MERGED_ARCHIVE_NAME);
    concatenate(&numbered.iter().map(|(_, p)| p.clone()).collect::<Vec<_>>(), &merged_path)
        .await
        .map_err(|err| DepositError::Failed(format!("could not concatenate parts: {err}")))?;

    extract_blocking(extractor, merged_path.clone(), staging_dir.to_owned()).await?;

    for (_, part) in &numbered {
        tokio::fs::remove_file(part)
            .await
            .map_err(|err| DepositError::Failed(format!("could not remove consumed part: {err}")))?;
    }
    tokio::fs::remove_file(&merged_path)
        .await
        .map_err(|err| DepositError::Failed(format!("could not remove merged archive: {err}")))?;

    Ok(())
}

async fn concatenate(parts: &[PathBuf], dest: &Path) -> io::Result<()> {
    let parts = parts.to_vec();
    let dest = dest.to_owned();

    tokio::task::spawn_blocking(move || -> io::Result<()> {
        let mut out = fs::File::create(&dest)?;
        let mut buf = vec![0u8; 1024 * 1024];

        for part in parts {
            let mut src = fs::File::open(&part)?;
            loop {
                let read = src.read(&mut buf)?;
                if read == 0 {
                    break;
                }
                out.write_all(&buf[..read])?;
            }
        }

        out.flush()
    })
    .await
    .expect("blocking concatenation task panicked")
}

async fn extract_blocking(
    extractor: Arc<dyn ArchiveExtractor>,
    archive_path: PathBuf,
    dest_dir: PathBuf,
) -> Result<(), DepositError> {
    debug!(archive = %archive_path.display(), dest = %dest_dir.display(), "extracting archive");

    // `ArchiveExtractor` implementations do blocking filesystem I/O, so run
    // extraction on the blocking pool rather than the async executor.
    tokio::task::spawn_blocking(move || extractor.extract(&archive_path, &dest_dir))
        .await
        .map_err(|err| DepositError::Failed(format!("extraction task panicked: {err}")))?
        .map_err(|err| DepositError::Failed(format!("extraction failed: {err}")))
}

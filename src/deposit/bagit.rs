//! C4: Bag Validator Adapter.
//!
//! Determines whether an extracted directory is a valid BagIt v0.97
//! package: every file declared in the payload manifest exists and matches
//! its declared MD5, and the required tag files are present (`spec.md`
//! §4.4).

use std::fs;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use thiserror::Error;

const MANIFEST_FILE: &str = "manifest-md5.txt";
const TAG_MANIFEST_FILE: &str = "tagmanifest-md5.txt";
const REQUIRED_TAG_FILES: &[&str] = &["bagit.txt", "bag-info.txt"];

#[derive(Debug, Error)]
pub(crate) enum ValidationError {
    /// The directory is not a valid bag: reported to the caller as the
    /// diagnostic text, mapped to terminal state `INVALID`.
    #[error("{0}")]
    Invalid(String),
    /// Library-level failure unrelated to manifest content: I/O, corrupt
    /// metadata. Mapped to terminal state `FAILED`.
    #[error("bag validation failed: {0}")]
    Failed(String),
}

/// Seam between the orchestrator and the concrete validation logic.
pub(crate) trait BagValidator: Send + Sync {
    /// Validate `bag_dir`. `Ok(())` means the bag is valid; `Err` carries
    /// the classified failure.
    fn validate(&self, bag_dir: &Path) -> Result<(), ValidationError>;
}

pub(crate) struct ManifestBagValidator;

impl BagValidator for ManifestBagValidator {
    fn validate(&self, bag_dir: &Path) -> Result<(), ValidationError> {
        for tag_file in REQUIRED_TAG_FILES {
            if !bag_dir.join(tag_file).is_file() {
                return Err(ValidationError::Invalid(format!(
                    "missing required tag file {tag_file}"
                )));
            }
        }

        let manifest_path = bag_dir.join(MANIFEST_FILE);
        let manifest_contents = read_to_string(&manifest_path).map_err(|err| {
            ValidationError::Invalid(format!("missing or unreadable {MANIFEST_FILE}: {err}"))
        })?;

        let entries = parse_manifest(&manifest_contents)?;
        if entries.is_empty() {
            return Err(ValidationError::Invalid(format!(
                "{MANIFEST_FILE} declares no payload files"
            )));
        }

        for (declared_path, declared_digest) in &entries {
            let file_path = bag_dir.join(declared_path);
            check_file_digest(&file_path, declared_path, declared_digest)?;
        }

        // The tag manifest, when present, is checked the same way but only
        // covers tag files, not payload.
        let tag_manifest_path = bag_dir.join(TAG_MANIFEST_FILE);
        if tag_manifest_path.is_file() {
            let tag_manifest_contents = read_to_string(&tag_manifest_path)
                .map_err(|err| ValidationError::Failed(format!("could not read {TAG_MANIFEST_FILE}: {err}")))?;
            let tag_entries = parse_manifest(&tag_manifest_contents)?;
            for (declared_path, declared_digest) in &tag_entries {
                let file_path = bag_dir.join(declared_path);
                check_file_digest(&file_path, declared_path, declared_digest)?;
            }
        }

        Ok(())
    }
}

fn read_to_string(path: &Path) -> std::io::Result<String> {
    fs::read_to_string(path)
}

/// Parse a `manifest-md5.txt`-style file: lines of `<hex digest>  <path>`.
fn parse_manifest(contents: &str) -> Result<Vec<(PathBuf, String)>, ValidationError> {
    let mut entries = Vec::new();

    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.splitn(2, char::is_whitespace);
        let digest = fields.next().unwrap_or_default();
        let path = fields.next().map(str::trim).unwrap_or_default();

        if digest.is_empty() || path.is_empty() || digest.len() != 32 {
            return Err(ValidationError::Invalid(format!(
                "malformed manifest line {}: {line:?}",
                line_no + 1
            )));
        }

        entries.push((PathBuf::from(path), digest.to_lowercase()));
    }

    Ok(entries)
}

fn check_file_digest(
    file_path: &Path,
    declared_path: &Path,
    declared_digest: &str,
) -> Result<(), ValidationError> {
    let bytes = fs::read(file_path).map_err(|_| {
        ValidationError::Invalid(format!(
            "manifest declares {} but it is missing from the bag",
            declared_path.display()
        ))
    })?;

    let mut hasher = Md5::new();
    hasher.update(&bytes);
    let actual = hex::encode(hasher.finalize());

    if actual != declared_digest {
        return Err(ValidationError::Invalid(format!(
            "checksum mismatch for {}: manifest says {declared_digest}, actual {actual}",
            declared_path.display()
        )));
    }

    Ok(())
}

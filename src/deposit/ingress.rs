//! C8: Deposit Ingress Front.
//!
//! The synchronous entry point: receive one part, verify its hash, persist
//! state, and — once the upload is complete — enqueue the deposit onto the
//! finalization queue (`spec.md` §4.8). This module contains only the pure
//! logic; the HTTP framing that delivers a [`PartRequest`] lives in
//! [`super::http`], mirroring the external-collaborator boundary drawn in
//! `spec.md` §1.

use std::path::Path;

use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{info, warn};

use super::orchestrator::{FinalizationJob, FinalizationQueue};
use super::properties;
use super::reassembler::md5_hex_of_file;
use super::types::{DepositError, DepositId, DepositPaths, DepositState, MimeType};

/// The wire-interface object the SWORDv2 binding delivers to C8
/// (`spec.md` §6), minus the actual byte stream, which callers pass
/// separately so this module stays transport-agnostic.
#[derive(Clone, Debug)]
pub(crate) struct PartRequest {
    pub(crate) filename: String,
    pub(crate) md5: String,
    pub(crate) mime_type: MimeType,
    pub(crate) in_progress: bool,
}

/// The receipt fields from `spec.md` §6, returned for both continuation
/// and completing requests.
#[derive(Clone, Debug, serde::Serialize)]
pub(crate) struct Receipt {
    #[serde(rename = "editIRI")]
    pub(crate) edit_iri: String,
    #[serde(rename = "editMediaIRI")]
    pub(crate) edit_media_iri: String,
    #[serde(rename = "statementURI")]
    pub(crate) statement_uri: String,
    pub(crate) packaging: Vec<String>,
    pub(crate) treatment: String,
    pub(crate) verbose_description: String,
}

impl Receipt {
    fn for_deposit(base_url: &str, id: &DepositId, filename: &str, md5: &str) -> Self {
        Receipt {
            edit_iri: format!("{base_url}/container/{id}"),
            edit_media_iri: format!("{base_url}/media/{id}"),
            statement_uri: format!("{base_url}/statement/{id}"),
            packaging: vec!["http://purl.org/net/sword/package/BagIt".to_owned()],
            treatment: "[1] unpacking [2] verifying integrity [3] storing persistently".to_owned(),
            verbose_description: format!("received successfully: {filename}; MD5: {md5}"),
        }
    }
}

/// Sanitize a client-supplied filename down to its final path component, so
/// it can never be used to escape the staging directory.
fn part_basename(filename: &str) -> Result<&str, DepositError> {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DepositError::BadRequest("missing or invalid filename".to_owned()))?;

    if name.is_empty() {
        return Err(DepositError::BadRequest("missing or invalid filename".to_owned()));
    }

    Ok(name)
}

/// Write `body` into `staging_dir/<basename(filename)>`, returning the
/// written path.
async fn write_part(
    staging_dir: &Path,
    filename: &str,
    mut body: impl AsyncRead + Unpin,
) -> Result<std::path::PathBuf, DepositError> {
    let basename = part_basename(filename)?;

    if !tokio::fs::try_exists(staging_dir)
        .await
        .map_err(|err| DepositError::BadRequest(format!("could not access staging directory: {err}")))?
    {
        tokio::fs::create_dir_all(staging_dir)
            .await
            .map_err(|err| DepositError::BadRequest(format!("could not create staging directory: {err}")))?;
    }

    let part_path = staging_dir.join(basename);

    let mut file = tokio::fs::File::create(&part_path)
        .await
        .map_err(|err| DepositError::BadRequest(format!("could not write part: {err}")))?;

    tokio::io::copy(&mut body, &mut file)
        .await
        .map_err(|err| DepositError::BadRequest(format!("could not write part: {err}")))?;

    file.flush()
        .await
        .map_err(|err| DepositError::BadRequest(format!("could not write part: {err}")))?;

    Ok(part_path)
}

/// Handle one incoming part for `id`, writing it into `paths.staging_dir`,
/// verifying its hash, and — if this is the final part — recording
/// `FINALIZING` and enqueuing the deposit.
pub(crate) async fn handle_part(
    paths: &DepositPaths,
    queue: &FinalizationQueue,
    base_url: &str,
    id: &DepositId,
    req: PartRequest,
    body: impl AsyncRead + Unpin,
) -> Result<Receipt, DepositError> {
    match properties::get_state(paths).await {
        Ok(DepositState::Draft) => {}
        Ok(_other) => return Err(DepositError::MethodNotAllowed),
        Err(DepositError::NotFound) => {}
        Err(err) => return Err(err),
    }

    let part_path = write_part(&paths.staging_dir, &req.filename, body).await?;

    let actual_md5 = md5_hex_of_file(&part_path)
        .await
        .map_err(|err| DepositError::BadRequest(format!("could not verify checksum: {err}")))?;

    if actual_md5 != req.md5.to_lowercase() {
        warn!(deposit_id = %id, "checksum mismatch, discarding part");
        let _ = tokio::fs::remove_file(&part_path).await;
        return Err(DepositError::ChecksumMismatch);
    }

    if req.in_progress {
        properties::set(
            paths,
            DepositState::Draft,
            &format!("received part {}", req.filename),
            true,
        )
        .await
        .map_err(|err| DepositError::BadRequest(format!("could not record deposit state: {err}")))?;

        info!(deposit_id = %id, filename = %req.filename, "received part, awaiting continuation");
        return Ok(Receipt::for_deposit(base_url, id, &req.filename, &req.md5));
    }

    properties::set(paths, DepositState::Finalizing, "queued for finalization", true)
        .await
        .map_err(|err| DepositError::BadRequest(format!("could not record deposit state: {err}")))?;

    queue
        .enqueue(FinalizationJob {
            id: id.clone(),
            mime: req.mime_type,
        })
        .await
        .map_err(|_| DepositError::Failed("finalization queue is closed".to_owned()))?;

    info!(deposit_id = %id, "deposit complete, enqueued for finalization");
    Ok(Receipt::for_deposit(base_url, id, &req.filename, &req.md5))
}

//! Shared data model for the deposit finalization pipeline.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque, URL-safe identifier for a deposit, unique across the process's
/// lifetime. Charset is restricted so the id can be used directly as a path
/// component without risking traversal.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub(crate) struct DepositId(String);

#[derive(Debug, Error)]
#[error("deposit id contains characters outside [A-Za-z0-9_-]")]
pub(crate) struct InvalidDepositId;

impl DepositId {
    pub(crate) fn new(raw: impl Into<String>) -> Result<Self, InvalidDepositId> {
        let raw = raw.into();
        if raw.is_empty()
            || !raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(InvalidDepositId);
        }
        Ok(Self(raw))
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DepositId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The five states a deposit can occupy. See `spec.md` §3.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum DepositState {
    Draft,
    Finalizing,
    Invalid,
    Failed,
    Submitted,
}

impl DepositState {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            DepositState::Draft => "DRAFT",
            DepositState::Finalizing => "FINALIZING",
            DepositState::Invalid => "INVALID",
            DepositState::Failed => "FAILED",
            DepositState::Submitted => "SUBMITTED",
        }
    }
}

impl fmt::Display for DepositState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unrecognized deposit state {0:?}")]
pub(crate) struct InvalidDepositState(String);

impl FromStr for DepositState {
    type Err = InvalidDepositState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(DepositState::Draft),
            "FINALIZING" => Ok(DepositState::Finalizing),
            "INVALID" => Ok(DepositState::Invalid),
            "FAILED" => Ok(DepositState::Failed),
            "SUBMITTED" => Ok(DepositState::Submitted),
            other => Err(InvalidDepositState(other.to_owned())),
        }
    }
}

/// Archive content type, set at finalization time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum MimeType {
    Single,
    Chunked,
}

impl MimeType {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            MimeType::Single => "archive/single",
            MimeType::Chunked => "archive/chunked",
        }
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unrecognized mime type {0:?}, expected archive/single or archive/chunked")]
pub(crate) struct InvalidMimeType(String);

impl FromStr for MimeType {
    type Err = InvalidMimeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "archive/single" => Ok(MimeType::Single),
            "archive/chunked" => Ok(MimeType::Chunked),
            other => Err(InvalidMimeType(other.to_owned())),
        }
    }
}

/// The error taxonomy from `spec.md` §7, shared between the synchronous
/// ingress path and the asynchronous orchestrator.
#[derive(Debug, Error)]
pub(crate) enum DepositError {
    /// Client supplied malformed content: bad bag, bad sequence suffix,
    /// wrong mimetype. Maps to terminal state `INVALID`.
    #[error("{0}")]
    Invalid(String),

    /// Operator-side or transient fault: I/O, versioning, promotion. Maps
    /// to terminal state `FAILED`.
    #[error("{0}")]
    Failed(String),

    /// Per-part hash disagreement. Surfaced synchronously, no state
    /// transition.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Ingress I/O failure. Surfaced synchronously, no state transition.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// State-machine precondition failed (continuation against a deposit
    /// not in `DRAFT`).
    #[error("method not allowed in current state")]
    MethodNotAllowed,

    /// Requested deposit has no record in either location.
    #[error("deposit not found")]
    NotFound,
}

impl DepositError {
    /// SWORD error IRI for the synchronous error responses in `spec.md` §6.
    pub(crate) fn error_iri(&self) -> Option<&'static str> {
        match self {
            DepositError::BadRequest(_) => {
                Some("http://purl.org/net/sword/error/ErrorBadRequest")
            }
            DepositError::ChecksumMismatch => {
                Some("http://purl.org/net/sword/error/ErrorChecksumMismatch")
            }
            DepositError::MethodNotAllowed => {
                Some("http://purl.org/net/sword/error/MethodNotAllowed")
            }
            _ => None,
        }
    }
}

impl IntoResponse for DepositError {
    fn into_response(self) -> Response {
        let status = match self {
            DepositError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DepositError::ChecksumMismatch => StatusCode::BAD_REQUEST,
            DepositError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            DepositError::NotFound => StatusCode::NOT_FOUND,
            DepositError::Invalid(_) | DepositError::Failed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = serde_json::json!({
            "error": self.error_iri(),
            "message": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Filesystem paths owned by a deposit's lifecycle. Neither path is
/// guaranteed to exist; callers check before use.
#[derive(Clone, Debug)]
pub(crate) struct DepositPaths {
    pub(crate) staging_dir: PathBuf,
    pub(crate) storage_dir: PathBuf,
}

impl DepositPaths {
    pub(crate) fn new(temp_root: &Path, deposits_root: &Path, id: &DepositId) -> Self {
        Self {
            staging_dir: temp_root.join(id.as_str()),
            storage_dir: deposits_root.join(id.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_unsafe_ids() {
        assert!(DepositId::new("").is_err());
        assert!(DepositId::new("../etc/passwd").is_err());
        assert!(DepositId::new("has space").is_err());
        assert!(DepositId::new("sword-ABC_123").is_ok());
    }

    #[test]
    fn state_round_trips_through_display_and_from_str() {
        for state in [
            DepositState::Draft,
            DepositState::Finalizing,
            DepositState::Invalid,
            DepositState::Failed,
            DepositState::Submitted,
        ] {
            let parsed: DepositState = state.to_string().parse().expect("should parse back");
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn mime_type_rejects_unknown_values() {
        assert!("archive/single".parse::<MimeType>().is_ok());
        assert!("archive/chunked".parse::<MimeType>().is_ok());
        assert!("application/zip".parse::<MimeType>().is_err());
    }
}

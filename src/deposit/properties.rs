//! C1: Deposit Properties Store.
//!
//! Persists per-deposit state and message as a small keyed record on disk,
//! written atomically via temp-file + rename (`spec.md` §4.1, §6).

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::types::{DepositError, DepositPaths, DepositState};
use crate::propfile;

const FILE_NAME: &str = "deposit.properties";
const KEY_STATE: &str = "state";
const KEY_DESCRIPTION: &str = "state.description";

fn record_path(dir: &Path) -> PathBuf {
    dir.join(FILE_NAME)
}

/// The full contents of a deposit's properties record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct DepositRecord {
    pub(crate) state: DepositState,
    pub(crate) message: String,
}

/// Write `(state, message)` for `paths`. If `prefer_staging` and a staging
/// record already exists, the staging record is updated; otherwise the
/// storage record is updated if present; if neither exists yet, the record
/// is created under staging (creating the staging directory if needed).
pub(crate) async fn set(
    paths: &DepositPaths,
    state: DepositState,
    message: &str,
    prefer_staging: bool,
) -> io::Result<()> {
    let staging_path = record_path(&paths.staging_dir);
    let storage_path = record_path(&paths.storage_dir);

    let staging_exists = tokio::fs::try_exists(&staging_path).await?;
    let storage_exists = tokio::fs::try_exists(&storage_path).await?;

    let target = if prefer_staging && staging_exists {
        staging_path
    } else if storage_exists {
        storage_path
    } else if staging_exists {
        staging_path
    } else {
        if !tokio::fs::try_exists(&paths.staging_dir).await? {
            tokio::fs::create_dir_all(&paths.staging_dir).await?;
        }
        staging_path
    };

    let contents = propfile::serialize([(KEY_STATE, state.as_str()), (KEY_DESCRIPTION, message)]);

    write_atomic(&target, &contents).await?;

    debug!(path = %target.display(), %state, "wrote deposit properties record");
    Ok(())
}

/// Read the current state, consulting the staging record first, then the
/// storage record. Fails with `DepositError::NotFound` if neither exists.
pub(crate) async fn get_state(paths: &DepositPaths) -> Result<DepositState, DepositError> {
    Ok(get(paths).await?.state)
}

/// Read the full record (state + message), staging-first.
pub(crate) async fn get(paths: &DepositPaths) -> Result<DepositRecord, DepositError> {
    let staging_path = record_path(&paths.staging_dir);
    let storage_path = record_path(&paths.storage_dir);

    for candidate in [&staging_path, &storage_path] {
        match tokio::fs::read_to_string(candidate).await {
            Ok(contents) => return parse_record(&contents),
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(DepositError::Failed(format!(
                    "could not read deposit properties: {err}"
                )))
            }
        }
    }

    Err(DepositError::NotFound)
}

fn parse_record(contents: &str) -> Result<DepositRecord, DepositError> {
    let entries = propfile::parse(contents)
        .map_err(|err| DepositError::Failed(format!("corrupt deposit properties: {err}")))?;

    let mut state = None;
    let mut message = String::new();

    for (key, value) in entries {
        match key.as_str() {
            KEY_STATE => state = Some(value),
            KEY_DESCRIPTION => message = value,
            _ => {}
        }
    }

    let state = state.ok_or_else(|| {
        DepositError::Failed("deposit properties record missing `state` key".to_owned())
    })?;
    let state: DepositState = state
        .parse()
        .map_err(|err| DepositError::Failed(format!("{err}")))?;

    Ok(DepositRecord { state, message })
}

async fn write_atomic(target: &Path, contents: &str) -> io::Result<()> {
    let parent = target
        .parent()
        .expect("record path always has a parent directory");

    let parent = parent.to_owned();
    let contents = contents.to_owned();
    let target = target.to_owned();

    tokio::task::spawn_blocking(move || -> io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        use std::io::Write;
        tmp.write_all(contents.as_bytes())?;
        tmp.flush()?;
        tmp.persist(target).map_err(|err| err.error)?;
        Ok(())
    })
    .await
    .expect("blocking write task panicked")
}

//! C7: Finalization Orchestrator.
//!
//! The per-deposit state machine driving C2→C3→C4→C1→C5→C6, and the
//! bounded single-consumer queue that feeds it (`spec.md` §4.7, §5).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, instrument};

use super::bagit::{BagValidator, ValidationError};
use super::extractor::ArchiveExtractor;
use super::properties;
use super::reassembler;
use super::promoter;
use super::types::{DepositError, DepositId, DepositPaths, DepositState, MimeType};
use super::versioning::VersioningAdapter;

/// Adapters and roots shared by every finalization run. Constructed once at
/// startup and held behind an `Arc`, matching the teacher's
/// process-lifecycle-service pattern (`spec.md` §9).
pub(crate) struct Pipeline {
    pub(crate) extractor: Arc<dyn ArchiveExtractor>,
    pub(crate) validator: Arc<dyn BagValidator>,
    pub(crate) versioning: Arc<dyn VersioningAdapter>,
    pub(crate) temp_root: PathBuf,
    pub(crate) deposits_root: PathBuf,
}

impl Pipeline {
    pub(crate) fn paths(&self, id: &DepositId) -> DepositPaths {
        DepositPaths::new(&self.temp_root, &self.deposits_root, id)
    }
}

/// One item on the finalization queue.
#[derive(Clone, Debug)]
pub(crate) struct FinalizationJob {
    pub(crate) id: DepositId,
    pub(crate) mime: MimeType,
}

#[derive(Debug, Error)]
#[error("finalization queue is closed")]
pub(crate) struct QueueClosed;

/// Handle held by ingress handlers to submit completed deposits. Cloning is
/// cheap; every clone shares the same bounded channel, so a full queue
/// applies backpressure to every producer (`spec.md` §5).
#[derive(Clone)]
pub(crate) struct FinalizationQueue {
    tx: mpsc::Sender<FinalizationJob>,
}

impl FinalizationQueue {
    /// Spawn the single-consumer worker and return a handle producers can
    /// enqueue onto.
    pub(crate) fn spawn(capacity: usize, pipeline: Arc<Pipeline>) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(worker_loop(rx, pipeline));
        Self { tx }
    }

    /// Enqueue a completed deposit. Suspends the caller when the queue is
    /// full, providing backpressure on the ingress path.
    pub(crate) async fn enqueue(&self, job: FinalizationJob) -> Result<(), QueueClosed> {
        self.tx.send(job).await.map_err(|_| QueueClosed)
    }
}

async fn worker_loop(mut rx: mpsc::Receiver<FinalizationJob>, pipeline: Arc<Pipeline>) {
    info!("finalization worker started");

    while let Some(job) = rx.recv().await {
        if let Err(err) = run_one(&pipeline, job.id.clone(), job.mime).await {
            error!(deposit_id = %job.id, %err, "finalization run ended in a terminal failure");
        }
        // The worker never exits because one deposit failed; it simply
        // moves on to the next queue item (`spec.md` §7).
    }

    info!("finalization queue closed, worker exiting");
}

/// Run the full pipeline for one deposit, writing the terminal state via
/// C1 on every exit path. Returns the classified error for logging; the
/// caller does not need to act on it further.
#[instrument(skip(pipeline), fields(%id))]
pub(crate) async fn run_one(
    pipeline: &Pipeline,
    id: DepositId,
    mime: MimeType,
) -> Result<(), DepositError> {
    let paths = pipeline.paths(&id);

    match run_steps(pipeline, &paths, mime).await {
        Ok(()) => {
            info!("deposit submitted");
            Ok(())
        }
        Err(err) => {
            let (state, message) = classify(&err);
            if let Err(io_err) = properties::set(&paths, state, &message, true).await {
                error!(%io_err, "could not record terminal state after failure");
            }
            Err(err)
        }
    }
}

fn classify(err: &DepositError) -> (DepositState, String) {
    match err {
        DepositError::Invalid(msg) => (DepositState::Invalid, msg.clone()),
        DepositError::Failed(msg) => (DepositState::Failed, msg.clone()),
        other => (
            DepositState::Failed,
            format!("Unexpected failure in deposit: {other}"),
        ),
    }
}

async fn run_steps(
    pipeline: &Pipeline,
    paths: &DepositPaths,
    mime: MimeType,
) -> Result<(), DepositError> {
    // Step 1: initialize the repository before reassembly, so the eventual
    // commit captures everything extraction produces.
    run_versioning(pipeline.versioning.clone(), paths.staging_dir.clone(), VersioningStep::Init).await?;

    // Step 2: reassemble + extract.
    reassembler::reassemble(&paths.staging_dir, mime, pipeline.extractor.clone()).await?;

    // Step 3: locate the single bag directory.
    let bag_dir = locate_bag_dir(&paths.staging_dir).await?;

    // Step 4: validate the bag.
    validate_bag(pipeline.validator.clone(), bag_dir).await?;

    // Step 5: record SUBMITTED to the staging record before promotion, so
    // a crash between here and step 7 still leaves a recoverable trail
    // (`spec.md` §4.7, §5, §9).
    properties::set(paths, DepositState::Submitted, "bag validated and accepted", true)
        .await
        .map_err(|err| DepositError::Failed(format!("could not record submitted state: {err}")))?;

    // Step 6: commit and tag.
    run_versioning(
        pipeline.versioning.clone(),
        paths.staging_dir.clone(),
        VersioningStep::CommitSubmitted,
    )
    .await?;

    // Step 7: promote.
    promoter::promote(&paths.staging_dir, &paths.storage_dir)
        .await
        .map_err(|err| DepositError::Failed(err.to_string()))?;

    Ok(())
}

enum VersioningStep {
    Init,
    CommitSubmitted,
}

async fn run_versioning(
    versioning: Arc<dyn VersioningAdapter>,
    staging_dir: PathBuf,
    step: VersioningStep,
) -> Result<(), DepositError> {
    tokio::task::spawn_blocking(move || match step {
        VersioningStep::Init => versioning.init(&staging_dir),
        VersioningStep::CommitSubmitted => versioning.commit_submitted(&staging_dir),
    })
    .await
    .map_err(|err| DepositError::Failed(format!("versioning task panicked: {err}")))?
    .map_err(|err| DepositError::Failed(err.to_string()))
}

async fn validate_bag(validator: Arc<dyn BagValidator>, bag_dir: PathBuf) -> Result<(), DepositError> {
    tokio::task::spawn_blocking(move || validator.validate(&bag_dir))
        .await
        .map_err(|err| DepositError::Failed(format!("validation task panicked: {err}")))?
        .map_err(|err| match err {
            ValidationError::Invalid(msg) => DepositError::Invalid(msg),
            ValidationError::Failed(msg) => DepositError::Failed(msg),
        })
}

/// Top-level directories that are never the bag directory, even though
/// they live alongside it in `staging_dir` (e.g. versioning metadata
/// created by C5's `init` step, which runs before this scan).
const NON_BAG_DIRS: &[&str] = &[".git"];

/// Locate the single top-level directory under `staging_dir` that belongs
/// to the deposit. Zero or more than one candidate is `Failed`
/// (`spec.md` §4.7 step 3, §9 "getBagDir" open question).
async fn locate_bag_dir(staging_dir: &Path) -> Result<PathBuf, DepositError> {
    let mut entries = tokio::fs::read_dir(staging_dir)
        .await
        .map_err(|err| DepositError::Failed(format!("could not list staging directory: {err}")))?;

    let mut candidates = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| DepositError::Failed(format!("could not list staging directory: {err}")))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|err| DepositError::Failed(format!("could not stat staging entry: {err}")))?;
        if !file_type.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if NON_BAG_DIRS.contains(&name) {
                continue;
            }
        }
        candidates.push(entry.path());
    }

    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        0 => Err(DepositError::Failed(
            "no bag directory found under staging directory".to_owned(),
        )),
        _ => Err(DepositError::Failed(
            "multiple candidate bag directories found under staging directory".to_owned(),
        )),
    }
}

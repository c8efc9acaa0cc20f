//! C5: Versioning Adapter.
//!
//! Optionally initializes a repository on the staging directory and tags
//! the submitted state (`spec.md` §4.5). A no-op implementation is used
//! when `git.enabled=false`.

use std::path::Path;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
#[error("versioning failed: {0}")]
pub(crate) struct VersioningError(String);

impl VersioningError {
    fn wrap(context: &str, err: impl std::fmt::Display) -> Self {
        VersioningError(format!("{context}: {err}"))
    }
}

/// Commit identity used for the "initial commit" and tag.
#[derive(Clone, Debug)]
pub(crate) struct Identity {
    pub(crate) user: String,
    pub(crate) email: String,
}

/// Seam between the orchestrator and the concrete versioning library,
/// mirroring the teacher's `AuthProvider`/`RegistryStorage` trait style.
/// [`NoopVersioning`] stands in for "disabled" so callers never need to
/// branch on an `Option<dyn VersioningAdapter>`.
pub(crate) trait VersioningAdapter: Send + Sync {
    /// Initialize a repository rooted at `staging_dir`. Called once, before
    /// reassembly, so the committed tree includes everything extraction
    /// produces.
    fn init(&self, staging_dir: &Path) -> Result<(), VersioningError>;

    /// Stage every file, commit as "initial commit", and tag
    /// `state=SUBMITTED`.
    fn commit_submitted(&self, staging_dir: &Path) -> Result<(), VersioningError>;
}

/// Used when `git.enabled=false`.
pub(crate) struct NoopVersioning;

impl VersioningAdapter for NoopVersioning {
    fn init(&self, _staging_dir: &Path) -> Result<(), VersioningError> {
        Ok(())
    }

    fn commit_submitted(&self, _staging_dir: &Path) -> Result<(), VersioningError> {
        Ok(())
    }
}

pub(crate) struct GitVersioning {
    identity: Identity,
}

impl GitVersioning {
    pub(crate) fn new(identity: Identity) -> Self {
        Self { identity }
    }
}

impl VersioningAdapter for GitVersioning {
    fn init(&self, staging_dir: &Path) -> Result<(), VersioningError> {
        git2::Repository::init(staging_dir)
            .map_err(|err| VersioningError::wrap("could not initialize repository", err))?;
        debug!(dir = %staging_dir.display(), "initialized repository");
        Ok(())
    }

    fn commit_submitted(&self, staging_dir: &Path) -> Result<(), VersioningError> {
        let repo = git2::Repository::open(staging_dir)
            .map_err(|err| VersioningError::wrap("could not open repository", err))?;

        let mut index = repo
            .index()
            .map_err(|err| VersioningError::wrap("could not open index", err))?;
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .map_err(|err| VersioningError::wrap("could not stage files", err))?;
        index
            .write()
            .map_err(|err| VersioningError::wrap("could not write index", err))?;

        let tree_oid = index
            .write_tree()
            .map_err(|err| VersioningError::wrap("could not write tree", err))?;
        let tree = repo
            .find_tree(tree_oid)
            .map_err(|err| VersioningError::wrap("could not find written tree", err))?;

        let signature = git2::Signature::now(&self.identity.user, &self.identity.email)
            .map_err(|err| VersioningError::wrap("invalid commit identity", err))?;

        let commit_oid = repo
            .commit(
                Some("HEAD"),
                &signature,
                &signature,
                "initial commit",
                &tree,
                &[],
            )
            .map_err(|err| VersioningError::wrap("could not create commit", err))?;

        let commit = repo
            .find_commit(commit_oid)
            .map_err(|err| VersioningError::wrap("could not find written commit", err))?;

        repo.tag(
            "state=SUBMITTED",
            commit.as_object(),
            &signature,
            "initial commit",
            false,
        )
        .map_err(|err| VersioningError::wrap("could not create tag", err))?;

        debug!(dir = %staging_dir.display(), commit = %commit_oid, "committed and tagged submitted state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            user: "Deposit Finalizer".to_owned(),
            email: "deposit-finalizer@example.org".to_owned(),
        }
    }

    #[test]
    fn noop_versioning_never_touches_the_filesystem() {
        let tmp = tempdir::TempDir::new("versioning").unwrap();
        NoopVersioning.init(tmp.path()).unwrap();
        NoopVersioning.commit_submitted(tmp.path()).unwrap();
        assert!(!tmp.path().join(".git").exists());
    }

    #[test]
    fn git_versioning_commits_and_tags() {
        let tmp = tempdir::TempDir::new("versioning").unwrap();
        std::fs::write(tmp.path().join("data.txt"), b"payload").unwrap();

        let adapter = GitVersioning::new(identity());
        adapter.init(tmp.path()).unwrap();
        adapter.commit_submitted(tmp.path()).unwrap();

        let repo = git2::Repository::open(tmp.path()).unwrap();
        let tag_ref = repo.find_reference("refs/tags/state=SUBMITTED").unwrap();
        let tag_commit = tag_ref.peel_to_commit().unwrap();
        assert_eq!(tag_commit.message(), Some("initial commit"));

        let tree = tag_commit.tree().unwrap();
        assert!(tree.get_name("data.txt").is_some());
    }
}

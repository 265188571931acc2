//! Repository drivers.
//!
//! A [`RepositoryDriver`] owns the on-disk package-repository state: the
//! index database, key material, and the include/export operations that
//! publish built packages and regenerate distribution metadata. It is the
//! only writer of the repository tree; everything else funnels through it.
//!
//! The concrete driver is chosen at startup and injected into the
//! application context — there is no runtime name-to-type lookup.

mod reprepro;

pub use reprepro::RepreproDriver;

use std::path::Path;

use thiserror::Error;

use crate::process::{ProcessError, SharedLog};
use crate::sign::SignError;
use crate::store::StoreError;
use crate::types::{Repository, RepositoryId};

/// Errors from repository-driver operations.
///
/// These propagate to the invoking job uncaught: a failed export or include
/// must be visible to the job's retry and alerting machinery, never
/// swallowed. A lock-wait timeout surfaces as a command failure and is
/// retryable.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Sign(#[from] SignError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepoError>;

/// Publishes build artifacts and maintains repository metadata.
pub trait RepositoryDriver: Send + Sync {
    /// Regenerates the published Packages/Sources/Release metadata.
    ///
    /// Ensures the default series, signing key, on-disk scaffold, and
    /// exported public key exist first, so export is safe to call on a
    /// freshly created repository.
    fn export(&self, repository: RepositoryId, log: &SharedLog) -> Result<()>;

    /// Publishes the artifacts listed in a changes file into a series, then
    /// re-exports.
    fn process_changes(
        &self,
        repository: RepositoryId,
        series: &str,
        changes_path: &Path,
        log: &SharedLog,
    ) -> Result<()>;

    /// Best-effort removal of a source package and its binaries, used when
    /// a package source is deleted.
    fn remove_source_package(
        &self,
        repository: RepositoryId,
        series: &str,
        package: &str,
        log: &SharedLog,
    ) -> Result<()>;

    /// Reconciles on-disk state when a repository record is deleted.
    fn delete_repository_trees(&self, repository: &Repository) -> Result<()>;
}

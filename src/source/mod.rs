//! Package source polling and building.
//!
//! [`poll`] is the change-detection half: one `git ls-remote` per source,
//! with failures disabling the source until a human re-enables it.
//! [`build`](build::run) is the pipeline half: checkout, builder selection,
//! version computation, packaging, and publication, tracked by a [`Build`]
//! record that is guaranteed to reach a terminal state.
//!
//! [`Build`]: crate::types::Build

pub mod build;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::builder::BuildError;
use crate::executor::ExecutorError;
use crate::gitcli;
use crate::process::{NullLog, ProcessError, SharedLog, shared_log};
use crate::repodrv::RepoError;
use crate::store::{Store, StoreError};
use crate::types::{PollOutcome, SourceId};

/// Errors from source operations.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The source has never been polled successfully, so there is no
    /// revision to build.
    #[error("source {0} has no polled revision")]
    NoRevision(SourceId),
}

/// Result type for source operations.
pub type Result<T> = std::result::Result<T, SourceError>;

/// Polls a source's git remote for a new branch head.
///
/// A disabled source is never contacted. A failed `ls-remote` (or a
/// reachable remote without the tracked branch) records the failure text
/// with a timestamp and disables the source; it reports
/// [`PollOutcome::NoChange`] rather than an error because a broken remote
/// is an expected steady state, not a pipeline fault. On success the seen
/// SHA is persisted before the outcome is reported, so a crash between
/// poll and build re-detects nothing and loses nothing.
#[instrument(skip(store), fields(source = %id))]
pub fn poll(store: &Arc<Store>, id: SourceId) -> Result<PollOutcome> {
    let source = store.source(id)?;
    if source.disabled {
        debug!(target: "aptforge::source", source = %id, "disabled, skipping poll");
        return Ok(PollOutcome::NoChange);
    }

    let log: SharedLog = shared_log(NullLog);
    match gitcli::ls_remote(&source.url, &source.branch, &log) {
        Err(e) => {
            warn!(target: "aptforge::source", source = %id, url = %source.url, error = %e, "poll failed, disabling source");
            store.update_source(id, |s| s.record_poll_failure(e.to_string()))?;
            Ok(PollOutcome::NoChange)
        }
        Ok(None) => {
            let failure = format!("branch {:?} not found on {}", source.branch, source.url);
            warn!(target: "aptforge::source", source = %id, "{}", failure);
            store.update_source(id, |s| s.record_poll_failure(failure))?;
            Ok(PollOutcome::NoChange)
        }
        Ok(Some(sha)) => {
            if source.last_seen_sha.as_ref() == Some(&sha) {
                debug!(target: "aptforge::source", source = %id, sha = %sha.short(), "no change");
                return Ok(PollOutcome::NoChange);
            }
            info!(target: "aptforge::source", source = %id, sha = %sha.short(), "new revision");
            store.update_source(id, |s| s.record_seen(sha.clone()))?;
            Ok(PollOutcome::Changed { sha })
        }
    }
}

#[cfg(test)]
mod tests;

//! Job handlers.
//!
//! Each handler re-fetches the entity it names from the store; an entity
//! deleted between enqueue and execution is a normal outcome of id-only
//! payloads and is dropped quietly rather than reported as a failure.

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::context::AppContext;
use crate::mirror::{self, MirrorError, snapshot};
use crate::repodrv::RepoError;
use crate::source::{self, SourceError};
use crate::store::StoreError;

use super::Job;

/// Errors surfaced by a job handler.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl JobError {
    /// Whether the failure is just the named entity having been deleted.
    fn is_missing_entity(&self) -> bool {
        matches!(
            self,
            JobError::Store(StoreError::NotFound { .. })
                | JobError::Source(SourceError::Store(StoreError::NotFound { .. }))
                | JobError::Mirror(MirrorError::Store(StoreError::NotFound { .. }))
                | JobError::Repo(RepoError::Store(StoreError::NotFound { .. }))
        )
    }
}

/// Runs one job to completion.
#[instrument(skip(ctx, job), fields(job = ?job))]
pub fn handle(ctx: &AppContext, job: Job) -> Result<(), JobError> {
    match dispatch(ctx, job) {
        Err(e) if e.is_missing_entity() => {
            debug!(target: "aptforge::jobs", "entity deleted before job ran: {e}");
            Ok(())
        }
        other => other,
    }
}

fn dispatch(ctx: &AppContext, job: Job) -> Result<(), JobError> {
    match job {
        Job::PollAll => {
            for source in ctx.store.sources() {
                if !source.disabled {
                    ctx.queue.enqueue(Job::Poll(source.id));
                }
            }
            Ok(())
        }

        Job::Poll(id) => {
            if source::poll(&ctx.store, id)?.is_changed() {
                ctx.queue.enqueue(Job::Build(id));
            }
            Ok(())
        }

        Job::Build(id) => {
            source::build::run(ctx, id)?;
            Ok(())
        }

        Job::RefreshMirror(id) => {
            let log = ctx.op_log(format!("mirror-{id}"));
            mirror::refresh(ctx, id, &log)?;
            Ok(())
        }

        Job::PerformSnapshot(id) => {
            let log = ctx.op_log(format!("snapshot-{id}"));
            snapshot::perform(&ctx.store, &ctx.config.mirror_base_path, id, &log)?;
            Ok(())
        }

        Job::ExportRepository(id) => {
            let log = ctx.op_log(format!("export-{id}"));
            ctx.driver.export(id, &log)?;
            Ok(())
        }

        Job::RemoveSourcePackage {
            repository,
            series,
            package,
        } => {
            info!(target: "aptforge::jobs", repository = %repository, package, "purging package of deleted source");
            let log = ctx.op_log(format!("removesrc-{package}"));
            ctx.driver
                .remove_source_package(repository, &series, &package, &log)?;
            Ok(())
        }
    }
}

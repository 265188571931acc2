//! Shared application context.
//!
//! One [`AppContext`] is built at startup and handed to every worker. The
//! repository driver is injected here as a trait object; job handlers and
//! service operations never construct or look up a driver themselves.

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::executor::ExecutorProvider;
use crate::jobs::{Job, JobQueue};
use crate::process::{SharedLog, TracingLog, shared_log};
use crate::repodrv::{RepoError, RepositoryDriver};
use crate::store::{Store, StoreError};
use crate::types::{PackageSource, Repository, RepositoryId, SourceId};

pub struct AppContext {
    pub config: Config,
    pub store: Arc<Store>,
    pub driver: Arc<dyn RepositoryDriver>,
    pub executors: ExecutorProvider,
    pub queue: JobQueue,
}

impl AppContext {
    pub fn new(
        config: Config,
        store: Arc<Store>,
        driver: Arc<dyn RepositoryDriver>,
        queue: JobQueue,
    ) -> Self {
        AppContext {
            executors: ExecutorProvider::new(&config),
            config,
            store,
            driver,
            queue,
        }
    }

    /// A tracing-backed log sink for operations without a build log file.
    pub(crate) fn op_log(&self, label: impl Into<String>) -> SharedLog {
        shared_log(TracingLog::new(label))
    }

    /// Creates a repository and schedules its first export, which lazily
    /// creates the default series, signing key, and on-disk trees.
    pub fn create_repository(&self, owner: &str, name: &str) -> Result<Repository, StoreError> {
        let repo = self.store.create_repository(owner, name)?;
        self.queue.enqueue(Job::ExportRepository(repo.id));
        Ok(repo)
    }

    /// Deletes a repository record and reconciles its on-disk trees.
    ///
    /// Tree removal runs synchronously: once this returns, the published
    /// repository is gone, not merely scheduled for removal.
    pub fn delete_repository(&self, id: RepositoryId) -> Result<Repository, RepoError> {
        let repo = self.store.delete_repository(id)?;
        self.driver.delete_repository_trees(&repo)?;
        info!(target: "aptforge::context", repository = %id, owner = %repo.owner, name = %repo.name, "repository deleted");
        Ok(repo)
    }

    /// Registers a package source and schedules an immediate first poll.
    pub fn create_source(
        &self,
        repository: RepositoryId,
        series: &str,
        url: &str,
        branch: &str,
    ) -> Result<PackageSource, StoreError> {
        let source = self.store.create_source(repository, series, url, branch)?;
        self.queue.enqueue(Job::Poll(source.id));
        Ok(source)
    }

    /// Deletes a package source, scheduling a best-effort purge of its last
    /// built package from the repository.
    pub fn delete_source(&self, id: SourceId) -> Result<PackageSource, StoreError> {
        let source = self.store.delete_source(id)?;
        if let Some(package) = &source.last_built_name {
            self.queue.enqueue(Job::RemoveSourcePackage {
                repository: source.repository,
                series: source.series.clone(),
                package: package.clone(),
            });
        }
        Ok(source)
    }

    /// Re-enables a source disabled by a poll failure and polls it again.
    pub fn clear_source_failure(&self, id: SourceId) -> Result<PackageSource, StoreError> {
        let source = self.store.update_source(id, |s| s.clear_failure())?;
        self.queue.enqueue(Job::Poll(id));
        Ok(source)
    }
}

//! Shared fixtures for unit tests.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::context::AppContext;
use crate::jobs::{JobQueue, JobReceiver};
use crate::process::SharedLog;
use crate::repodrv::{RepositoryDriver, Result as RepoResult};
use crate::store::Store;
use crate::types::{Repository, RepositoryId};

/// A repository driver that records nothing and always succeeds.
pub(crate) struct NoopDriver;

impl RepositoryDriver for NoopDriver {
    fn export(&self, _repository: RepositoryId, _log: &SharedLog) -> RepoResult<()> {
        Ok(())
    }

    fn process_changes(
        &self,
        _repository: RepositoryId,
        _series: &str,
        _changes_path: &Path,
        _log: &SharedLog,
    ) -> RepoResult<()> {
        Ok(())
    }

    fn remove_source_package(
        &self,
        _repository: RepositoryId,
        _series: &str,
        _package: &str,
        _log: &SharedLog,
    ) -> RepoResult<()> {
        Ok(())
    }

    fn delete_repository_trees(&self, _repository: &Repository) -> RepoResult<()> {
        Ok(())
    }
}

/// An application context rooted under `base`, with a noop driver and the
/// queue's receiving end handed back for job assertions.
pub(crate) fn test_context(base: &Path) -> (Arc<AppContext>, JobReceiver) {
    let config = Config::rooted_at(base);
    let store = Arc::new(Store::open(&config.state_file).unwrap());
    let (queue, receiver) = JobQueue::new();
    let ctx = Arc::new(AppContext::new(config, store, Arc::new(NoopDriver), queue));
    (ctx, receiver)
}

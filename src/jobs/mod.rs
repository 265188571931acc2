//! Asynchronous job dispatch.
//!
//! Jobs are fire-and-forget messages identified by entity id, never by
//! value: a handler re-fetches current persisted state before acting, so
//! state changes between enqueue and execution are always observed.
//! Delivery is at-least-once from the pipeline's point of view — handlers
//! are written to tolerate replays (publishes are idempotent, snapshot
//! population checks for an existing populated directory).
//!
//! A fixed pool of worker tasks drains one shared queue. Handlers block on
//! external processes for their whole duration; concurrency comes purely
//! from running many jobs across the pool, so each job runs on a blocking
//! thread.

pub mod dispatch;
mod scheduler;

pub use scheduler::run_scheduler;

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::types::{MirrorId, RepositoryId, SnapshotId, SourceId};

/// A unit of asynchronous work. Payloads are ids, not snapshots of state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Fan out a poll job per enabled package source.
    PollAll,

    /// Poll one source's git remote.
    Poll(SourceId),

    /// Build one source at its last seen revision.
    Build(SourceId),

    /// Run the mirroring tool for one mirror.
    RefreshMirror(MirrorId),

    /// Populate a snapshot's on-disk tree.
    PerformSnapshot(SnapshotId),

    /// Regenerate a repository's published metadata.
    ExportRepository(RepositoryId),

    /// Best-effort removal of a deleted source's last-built package.
    RemoveSourcePackage {
        repository: RepositoryId,
        series: String,
        package: String,
    },
}

/// Sending half of the job queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl JobQueue {
    /// Creates a queue, returning the sender and the receiving end for the
    /// worker pool.
    pub fn new() -> (JobQueue, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (JobQueue { tx }, JobReceiver { rx })
    }

    /// Enqueues a job. Fire-and-forget: a closed queue (shutdown in
    /// progress) drops the job silently.
    pub fn enqueue(&self, job: Job) {
        debug!(target: "aptforge::jobs", ?job, "enqueue");
        let _ = self.tx.send(job);
    }
}

/// Receiving half of the job queue, consumed by [`WorkerPool::start`].
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<Job>,
}

#[cfg(test)]
impl JobReceiver {
    /// Pops the next queued job without blocking.
    pub(crate) fn try_recv(&mut self) -> Option<Job> {
        self.rx.try_recv().ok()
    }
}

/// A pool of worker tasks draining the shared queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `count` workers processing jobs against `ctx`.
    pub fn start(
        ctx: Arc<crate::context::AppContext>,
        receiver: JobReceiver,
        count: usize,
        cancel: CancellationToken,
    ) -> WorkerPool {
        // tokio's mpsc receiver is single-consumer; the pool shares it
        // behind an async mutex, which also keeps dequeue order FIFO.
        let rx = Arc::new(Mutex::new(receiver.rx));

        let handles = (0..count.max(1))
            .map(|worker_id| {
                let ctx = Arc::clone(&ctx);
                let rx = Arc::clone(&rx);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, ctx, rx, cancel).await;
                })
            })
            .collect();

        WorkerPool { handles }
    }

    /// Waits for every worker to exit. Call after cancelling the token.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<crate::context::AppContext>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    cancel: CancellationToken,
) {
    info!(target: "aptforge::jobs", worker_id, "worker started");
    loop {
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            }
        };

        // Handlers block on external commands; keep them off the async
        // runtime's core threads.
        let handler_ctx = Arc::clone(&ctx);
        let job_for_log = job.clone();
        let result =
            tokio::task::spawn_blocking(move || dispatch::handle(&handler_ctx, job)).await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                // One job's failure never takes down the worker; the
                // failure is visible in entity state and logs.
                error!(target: "aptforge::jobs", worker_id, job = ?job_for_log, error = %e, "job failed");
            }
            Err(e) => {
                error!(target: "aptforge::jobs", worker_id, job = ?job_for_log, error = %e, "job panicked");
            }
        }
    }
    info!(target: "aptforge::jobs", worker_id, "worker stopped");
}

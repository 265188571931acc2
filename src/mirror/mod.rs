//! Mirror refresh orchestration.
//!
//! A mirror is refreshed by rendering a config file for the external
//! mirroring tool and running it against the mirror's directory. At most
//! one refresh per mirror runs at a time, guarded by the store's
//! conditional `refresh_in_progress` flip; the flag is cleared by a scoped
//! guard whether the tool succeeds or not, so a failed refresh never wedges
//! a mirror.
//!
//! The tool is configured to never delete old pool members: snapshots link
//! into the live pool, so pool files must only ever accumulate.

pub mod snapshot;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::context::AppContext;
use crate::jobs::Job;
use crate::process::{self, ProcessError, RunRequest, SharedLog};
use crate::store::{Store, StoreError};
use crate::types::{Mirror, MirrorId};

/// Errors from mirror and snapshot operations.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The mirror's upstream URL cannot be split into host and root path.
    #[error("unusable mirror url {url:?}")]
    BadUrl { url: String },
}

/// Result type for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Outcome of asking for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// This call won the flag flip; a refresh job was enqueued.
    Scheduled,

    /// A refresh was already in flight; nothing was enqueued.
    AlreadyScheduled,
}

/// Requests a refresh of one mirror.
///
/// The conditional flag flip and the job enqueue happen on the caller's
/// side of the queue, so two concurrent requests resolve here and at most
/// one refresh job ever exists per mirror.
pub fn schedule_refresh(ctx: &AppContext, id: MirrorId) -> Result<ScheduleOutcome> {
    if ctx.store.try_begin_refresh(id)? {
        ctx.queue.enqueue(Job::RefreshMirror(id));
        Ok(ScheduleOutcome::Scheduled)
    } else {
        info!(target: "aptforge::mirror", mirror = %id, "refresh already in flight");
        Ok(ScheduleOutcome::AlreadyScheduled)
    }
}

/// Clears a mirror's refresh flag when dropped.
struct RefreshGuard {
    store: Arc<Store>,
    id: MirrorId,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        if let Err(e) = self.store.end_refresh(self.id) {
            warn!(target: "aptforge::mirror", mirror = %self.id, error = %e, "cannot clear refresh flag");
        }
    }
}

/// Runs the mirroring tool for one mirror.
///
/// Only ever called from the refresh job enqueued by [`schedule_refresh`],
/// which holds the `refresh_in_progress` flag for us until the guard here
/// releases it.
#[instrument(skip(ctx, log), fields(mirror = %id))]
pub fn refresh(ctx: &AppContext, id: MirrorId, log: &SharedLog) -> Result<()> {
    let mirror = ctx.store.mirror(id)?;
    let _guard = RefreshGuard {
        store: Arc::clone(&ctx.store),
        id,
    };

    let dir = mirror.mirror_dir(&ctx.config.mirror_base_path);
    std::fs::create_dir_all(&dir)?;

    let config_path = dir.join("debmirror.conf");
    std::fs::write(&config_path, render_debmirror_config(&mirror, &dir)?)?;

    info!(target: "aptforge::mirror", mirror = %id, url = %mirror.url, "refresh started");
    let req = RunRequest::new([
        "debmirror".to_string(),
        format!("--config-file={}", config_path.display()),
    ]);
    process::run(&req, log)?;
    info!(target: "aptforge::mirror", mirror = %id, "refresh finished");
    Ok(())
}

/// Renders the mirroring tool's config from the mirror record.
///
/// `cleanup` stays off permanently: snapshots symlink into this mirror's
/// pool, so removing superseded pool files would corrupt every snapshot
/// taken since they were current.
fn render_debmirror_config(mirror: &Mirror, dest: &Path) -> Result<String> {
    let (method, host, root) = split_mirror_url(&mirror.url).ok_or_else(|| {
        MirrorError::BadUrl {
            url: mirror.url.clone(),
        }
    })?;

    Ok(format!(
        "# generated; edits are overwritten on every refresh\n\
         $host = \"{host}\";\n\
         $root = \"{root}\";\n\
         $method = \"{method}\";\n\
         $dist = \"{dist}\";\n\
         $section = \"{section}\";\n\
         $arch = \"amd64\";\n\
         $dest = \"{dest}\";\n\
         $source = 0;\n\
         $ignore_release_gpg = 1;\n\
         $cleanup = 0;\n\
         1;\n",
        dist = mirror.series.split_whitespace().collect::<Vec<_>>().join(","),
        section = mirror
            .components
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(","),
        dest = dest.display(),
    ))
}

/// Splits an upstream URL into (method, host, root path).
fn split_mirror_url(url: &str) -> Option<(String, String, String)> {
    let (method, rest) = url.split_once("://")?;
    if !matches!(method, "http" | "https" | "ftp") {
        return None;
    }
    let rest = rest.trim_end_matches('/');
    let (host, root) = match rest.split_once('/') {
        Some((host, root)) => (host, root),
        None => (rest, ""),
    };
    if host.is_empty() {
        return None;
    }
    Some((method.to_string(), host.to_string(), root.to_string()))
}

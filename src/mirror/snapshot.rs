//! Snapshot population.
//!
//! A snapshot captures a mirror set's contents at a point in time without
//! duplicating pool data: per member mirror, the `dists/` metadata tree is
//! copied (that is what changes between refreshes) and `pool/` is a symlink
//! into the live mirror. Sharing the pool is safe because mirrors never
//! delete old pool members (see the mirror refresh config).
//!
//! Population is staged: everything is assembled under a `.staging`
//! directory and renamed into place in one step, so readers only ever see
//! absent or complete snapshots. A populated snapshot is immutable; replays
//! of the population job detect the final directory and do nothing.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::context::AppContext;
use crate::jobs::Job;
use crate::process::{self, RunRequest, SharedLog};
use crate::store::Store;
use crate::types::{MirrorSetId, Snapshot, SnapshotId};

use super::Result;

/// Creates a snapshot record and schedules its population.
///
/// The record insert is the trigger: exactly one population job is enqueued
/// for it here, and nothing else ever enqueues one for an existing
/// snapshot.
pub fn create(ctx: &AppContext, mirror_set: MirrorSetId) -> Result<Snapshot> {
    let snapshot = ctx.store.create_snapshot(mirror_set)?;
    ctx.queue.enqueue(Job::PerformSnapshot(snapshot.id));
    Ok(snapshot)
}

/// Populates a snapshot's on-disk tree.
#[instrument(skip(store, mirror_base, log), fields(snapshot = %id))]
pub fn perform(
    store: &Arc<Store>,
    mirror_base: &Path,
    id: SnapshotId,
    log: &SharedLog,
) -> Result<()> {
    let snapshot = store.snapshot(id)?;
    let set = store.mirror_set(snapshot.mirror_set)?;

    let final_dir = snapshot.snapshot_dir(mirror_base);
    if final_dir.exists() {
        debug!(target: "aptforge::mirror", snapshot = %id, "already populated");
        return Ok(());
    }

    let staging = snapshot.staging_dir(mirror_base);
    if staging.exists() {
        // Leftover from a crashed attempt; start over.
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;

    for member in &set.members {
        let mirror = store.mirror(*member)?;
        populate_member(
            &mirror.mirror_dir(mirror_base),
            &staging.join(member.to_string()),
            log,
        )?;
    }

    std::fs::rename(&staging, &final_dir)?;
    info!(target: "aptforge::mirror", snapshot = %id, mirror_set = %set.id, members = set.members.len(), "snapshot populated");
    Ok(())
}

/// Captures one mirror into `target`: copied dists, linked pool.
fn populate_member(mirror_dir: &Path, target: &Path, log: &SharedLog) -> Result<()> {
    std::fs::create_dir_all(target)?;

    let dists = mirror_dir.join("dists");
    if dists.is_dir() {
        let req = RunRequest::new([
            "rsync".to_string(),
            "-a".to_string(),
            format!("{}/", dists.display()),
            format!("{}/", target.join("dists").display()),
        ]);
        process::run(&req, log)?;
    }

    let pool = mirror_dir.join("pool");
    if pool.is_dir() {
        link_pool(&pool, &target.join("pool"))?;
    }
    Ok(())
}

#[cfg(unix)]
fn link_pool(pool: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(pool, link)
}

#[cfg(not(unix))]
fn link_pool(_pool: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::other("pool links need a unix filesystem"))
}

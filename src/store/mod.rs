//! Durable entity state.
//!
//! All records live in one in-memory [`AppState`] behind a mutex, persisted
//! to a single JSON file after every mutation (atomic write, see
//! [`atomic`]). Holding the lock across a read-modify-write makes the
//! conditional updates the pipeline's invariants depend on atomic with
//! respect to concurrent jobs:
//!
//! - the build counter only ever increases ([`Store::next_build_counter`]);
//! - at most one refresh per mirror is in flight
//!   ([`Store::try_begin_refresh`]);
//! - creating a snapshot record is a one-shot trigger edge
//!   ([`Store::create_snapshot`]) — later tag edits go through
//!   [`Store::update_snapshot`] and never re-trigger;
//! - `(owner, name)` is unique per repository.
//!
//! Workers always re-fetch current state by id before acting, so jobs can be
//! fire-and-forget id payloads.

pub mod atomic;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::types::{
    Build, BuildId, Mirror, MirrorId, MirrorSet, MirrorSetId, PackageSource, Repository,
    RepositoryId, Series, Snapshot, SnapshotId, SourceId,
};

use atomic::{load_json, save_json_atomic};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    #[error("repository {owner}/{name} already exists")]
    DuplicateRepository { owner: String, name: String },
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The persisted application state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppState {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,

    /// Next id to assign, shared by all entity kinds.
    pub next_id: u64,

    pub repositories: BTreeMap<RepositoryId, Repository>,
    /// Series keyed by repository; ordered, so the first is the default.
    pub series: BTreeMap<RepositoryId, Vec<Series>>,
    pub sources: BTreeMap<SourceId, PackageSource>,
    pub builds: BTreeMap<BuildId, Build>,
    pub mirrors: BTreeMap<MirrorId, Mirror>,
    pub mirror_sets: BTreeMap<MirrorSetId, MirrorSet>,
    pub snapshots: BTreeMap<SnapshotId, Snapshot>,
}

impl AppState {
    fn new() -> Self {
        AppState {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            next_id: 1,
            repositories: BTreeMap::new(),
            series: BTreeMap::new(),
            sources: BTreeMap::new(),
            builds: BTreeMap::new(),
            mirrors: BTreeMap::new(),
            mirror_sets: BTreeMap::new(),
            snapshots: BTreeMap::new(),
        }
    }
}

/// Mutex-guarded state with write-through persistence.
pub struct Store {
    path: PathBuf,
    state: Mutex<AppState>,
}

impl Store {
    /// Opens (or initializes) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match load_json::<AppState>(&path)? {
            Some(state) => {
                if state.schema_version != SCHEMA_VERSION {
                    return Err(StoreError::SchemaMismatch {
                        expected: SCHEMA_VERSION,
                        got: state.schema_version,
                    });
                }
                state
            }
            None => AppState::new(),
        };
        Ok(Store {
            path,
            state: Mutex::new(state),
        })
    }

    /// Runs `f` against the state under the lock, persisting afterwards.
    ///
    /// This is the single mutation path; everything below goes through it,
    /// so every mutation is atomic and durable before its result is
    /// observable by another job.
    fn mutate<T>(&self, f: impl FnOnce(&mut AppState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let value = f(&mut state)?;
        state.saved_at = Utc::now();
        save_json_atomic(&self.path, &*state)?;
        Ok(value)
    }

    fn read<T>(&self, f: impl FnOnce(&AppState) -> T) -> T {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&state)
    }

    fn take_id(state: &mut AppState) -> u64 {
        let id = state.next_id;
        state.next_id += 1;
        id
    }

    // ─── Repositories / series ───

    /// Creates a repository, enforcing `(owner, name)` uniqueness.
    pub fn create_repository(&self, owner: &str, name: &str) -> Result<Repository> {
        self.mutate(|state| {
            if state
                .repositories
                .values()
                .any(|r| r.owner == owner && r.name == name)
            {
                return Err(StoreError::DuplicateRepository {
                    owner: owner.to_string(),
                    name: name.to_string(),
                });
            }
            let id = RepositoryId(Self::take_id(state));
            let repo = Repository::new(id, owner, name);
            state.repositories.insert(id, repo.clone());
            debug!(target: "aptforge::store", %id, owner, name, "repository created");
            Ok(repo)
        })
    }

    pub fn repository(&self, id: RepositoryId) -> Result<Repository> {
        self.read(|s| s.repositories.get(&id).cloned())
            .ok_or(StoreError::NotFound { kind: "repository", id: id.0 })
    }

    pub fn repositories(&self) -> Vec<Repository> {
        self.read(|s| s.repositories.values().cloned().collect())
    }

    pub fn update_repository(
        &self,
        id: RepositoryId,
        f: impl FnOnce(&mut Repository),
    ) -> Result<Repository> {
        self.mutate(|state| {
            let repo = state
                .repositories
                .get_mut(&id)
                .ok_or(StoreError::NotFound { kind: "repository", id: id.0 })?;
            f(repo);
            Ok(repo.clone())
        })
    }

    /// Deletes a repository record. On-disk reconciliation is the caller's
    /// job (see `repodrv`).
    pub fn delete_repository(&self, id: RepositoryId) -> Result<Repository> {
        self.mutate(|state| {
            let repo = state
                .repositories
                .remove(&id)
                .ok_or(StoreError::NotFound { kind: "repository", id: id.0 })?;
            state.series.remove(&id);
            state.sources.retain(|_, s| s.repository != id);
            Ok(repo)
        })
    }

    /// Returns the repository's default series, creating `default_name`
    /// lazily when the repository has none yet.
    pub fn ensure_default_series(&self, id: RepositoryId, default_name: &str) -> Result<Series> {
        self.mutate(|state| {
            if !state.repositories.contains_key(&id) {
                return Err(StoreError::NotFound { kind: "repository", id: id.0 });
            }
            let series = state.series.entry(id).or_default();
            if series.is_empty() {
                debug!(target: "aptforge::store", repository = %id, name = default_name, "default series created");
                series.push(Series::new(id, default_name));
            }
            Ok(series[0].clone())
        })
    }

    pub fn series_for(&self, id: RepositoryId) -> Vec<Series> {
        self.read(|s| s.series.get(&id).cloned().unwrap_or_default())
    }

    pub fn update_series(
        &self,
        id: RepositoryId,
        name: &str,
        f: impl FnOnce(&mut Series),
    ) -> Result<Series> {
        self.mutate(|state| {
            let series = state
                .series
                .get_mut(&id)
                .and_then(|v| v.iter_mut().find(|s| s.name == name))
                .ok_or(StoreError::NotFound { kind: "series", id: id.0 })?;
            f(series);
            Ok(series.clone())
        })
    }

    // ─── Package sources ───

    pub fn create_source(
        &self,
        repository: RepositoryId,
        series: &str,
        url: &str,
        branch: &str,
    ) -> Result<PackageSource> {
        self.mutate(|state| {
            if !state.repositories.contains_key(&repository) {
                return Err(StoreError::NotFound { kind: "repository", id: repository.0 });
            }
            let id = SourceId(Self::take_id(state));
            let source = PackageSource::new(id, repository, series, url, branch);
            state.sources.insert(id, source.clone());
            Ok(source)
        })
    }

    pub fn source(&self, id: SourceId) -> Result<PackageSource> {
        self.read(|s| s.sources.get(&id).cloned())
            .ok_or(StoreError::NotFound { kind: "source", id: id.0 })
    }

    pub fn sources(&self) -> Vec<PackageSource> {
        self.read(|s| s.sources.values().cloned().collect())
    }

    pub fn update_source(
        &self,
        id: SourceId,
        f: impl FnOnce(&mut PackageSource),
    ) -> Result<PackageSource> {
        self.mutate(|state| {
            let source = state
                .sources
                .get_mut(&id)
                .ok_or(StoreError::NotFound { kind: "source", id: id.0 })?;
            f(source);
            Ok(source.clone())
        })
    }

    /// Deletes a source record, returning it so the caller can enqueue the
    /// best-effort artifact purge.
    pub fn delete_source(&self, id: SourceId) -> Result<PackageSource> {
        self.mutate(|state| {
            state
                .sources
                .remove(&id)
                .ok_or(StoreError::NotFound { kind: "source", id: id.0 })
        })
    }

    /// Atomically increments and returns the source's build counter.
    ///
    /// The read-modify-write runs under the store lock, so two overlapping
    /// builds of the same source always observe distinct counters.
    pub fn next_build_counter(&self, id: SourceId) -> Result<u64> {
        self.mutate(|state| {
            let source = state
                .sources
                .get_mut(&id)
                .ok_or(StoreError::NotFound { kind: "source", id: id.0 })?;
            source.build_counter += 1;
            Ok(source.build_counter)
        })
    }

    // ─── Builds ───

    pub fn create_build(
        &self,
        source: SourceId,
        build_counter: u64,
        sha: crate::types::Sha,
        handled_by: &str,
    ) -> Result<Build> {
        self.mutate(|state| {
            let id = BuildId(Self::take_id(state));
            let build = Build::new(id, source, build_counter, sha, handled_by);
            state.builds.insert(id, build.clone());
            Ok(build)
        })
    }

    pub fn build(&self, id: BuildId) -> Result<Build> {
        self.read(|s| s.builds.get(&id).cloned())
            .ok_or(StoreError::NotFound { kind: "build", id: id.0 })
    }

    /// Builds of one source, ordered by start time.
    pub fn builds_for(&self, source: SourceId) -> Vec<Build> {
        let mut builds: Vec<Build> = self.read(|s| {
            s.builds
                .values()
                .filter(|b| b.source == source)
                .cloned()
                .collect()
        });
        builds.sort_by_key(|b| b.started_at);
        builds
    }

    pub fn update_build(&self, id: BuildId, f: impl FnOnce(&mut Build)) -> Result<Build> {
        self.mutate(|state| {
            let build = state
                .builds
                .get_mut(&id)
                .ok_or(StoreError::NotFound { kind: "build", id: id.0 })?;
            f(build);
            Ok(build.clone())
        })
    }

    // ─── Mirrors / snapshots ───

    pub fn create_mirror(
        &self,
        owner: &str,
        url: &str,
        series: &str,
        components: &str,
    ) -> Result<Mirror> {
        self.mutate(|state| {
            let id = MirrorId(Self::take_id(state));
            let mirror = Mirror::new(id, owner, url, series, components);
            state.mirrors.insert(id, mirror.clone());
            Ok(mirror)
        })
    }

    pub fn mirror(&self, id: MirrorId) -> Result<Mirror> {
        self.read(|s| s.mirrors.get(&id).cloned())
            .ok_or(StoreError::NotFound { kind: "mirror", id: id.0 })
    }

    /// Conditionally flips `refresh_in_progress` false→true.
    ///
    /// Returns true only for the caller that performed the flip; a
    /// concurrent caller observes the flag already set and gets false. This
    /// is the single concurrency guard for the mirroring tool, which cannot
    /// run twice against the same destination directory.
    pub fn try_begin_refresh(&self, id: MirrorId) -> Result<bool> {
        self.mutate(|state| {
            let mirror = state
                .mirrors
                .get_mut(&id)
                .ok_or(StoreError::NotFound { kind: "mirror", id: id.0 })?;
            if mirror.refresh_in_progress {
                return Ok(false);
            }
            mirror.refresh_in_progress = true;
            Ok(true)
        })
    }

    /// Clears `refresh_in_progress` unconditionally.
    pub fn end_refresh(&self, id: MirrorId) -> Result<()> {
        self.mutate(|state| {
            let mirror = state
                .mirrors
                .get_mut(&id)
                .ok_or(StoreError::NotFound { kind: "mirror", id: id.0 })?;
            mirror.refresh_in_progress = false;
            Ok(())
        })
    }

    pub fn create_mirror_set(&self, owner: &str, name: &str) -> Result<MirrorSet> {
        self.mutate(|state| {
            let id = MirrorSetId(Self::take_id(state));
            let set = MirrorSet::new(id, owner, name);
            state.mirror_sets.insert(id, set.clone());
            Ok(set)
        })
    }

    pub fn mirror_set(&self, id: MirrorSetId) -> Result<MirrorSet> {
        self.read(|s| s.mirror_sets.get(&id).cloned())
            .ok_or(StoreError::NotFound { kind: "mirror set", id: id.0 })
    }

    pub fn update_mirror_set(
        &self,
        id: MirrorSetId,
        f: impl FnOnce(&mut MirrorSet),
    ) -> Result<MirrorSet> {
        self.mutate(|state| {
            let set = state
                .mirror_sets
                .get_mut(&id)
                .ok_or(StoreError::NotFound { kind: "mirror set", id: id.0 })?;
            f(set);
            Ok(set.clone())
        })
    }

    /// Creates a snapshot placeholder record.
    ///
    /// This insert is the population trigger edge: the caller enqueues
    /// exactly one population job for the returned snapshot. Tag edits go
    /// through [`update_snapshot`](Self::update_snapshot) and never
    /// re-trigger.
    pub fn create_snapshot(&self, mirror_set: MirrorSetId) -> Result<Snapshot> {
        self.mutate(|state| {
            if !state.mirror_sets.contains_key(&mirror_set) {
                return Err(StoreError::NotFound { kind: "mirror set", id: mirror_set.0 });
            }
            let id = SnapshotId(Self::take_id(state));
            let snapshot = Snapshot::new(id, mirror_set);
            state.snapshots.insert(id, snapshot.clone());
            Ok(snapshot)
        })
    }

    pub fn snapshot(&self, id: SnapshotId) -> Result<Snapshot> {
        self.read(|s| s.snapshots.get(&id).cloned())
            .ok_or(StoreError::NotFound { kind: "snapshot", id: id.0 })
    }

    /// Updates snapshot tags. The snapshot's captured contents are immutable;
    /// only the tag set may change.
    pub fn update_snapshot(
        &self,
        id: SnapshotId,
        f: impl FnOnce(&mut std::collections::BTreeSet<String>),
    ) -> Result<Snapshot> {
        self.mutate(|state| {
            let snapshot = state
                .snapshots
                .get_mut(&id)
                .ok_or(StoreError::NotFound { kind: "snapshot", id: id.0 })?;
            f(&mut snapshot.tags);
            Ok(snapshot.clone())
        })
    }
}

#[cfg(test)]
mod tests;

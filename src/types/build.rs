//! Build records and the build state machine.
//!
//! One [`Build`] is created per build attempt. Builds are append-only: they
//! are never deleted, forming an audit trail per source, ordered by start
//! time. State moves strictly from [`BuildState::NeedsBuilding`] through
//! [`BuildState::Building`] to exactly one terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{BuildId, Sha, SourceId};

/// State of a build attempt.
///
/// Terminal states are those for which [`is_terminal`](Self::is_terminal)
/// returns true; once a build reaches one, its `finished_at` timestamp is set
/// and never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    /// Created, not yet picked up.
    NeedsBuilding,

    /// A worker is running the build.
    Building,

    /// Built and published.
    SuccessfullyBuilt,

    /// The build itself failed (checkout, packaging, or compilation).
    FailedToBuild,

    /// The isolated build environment could not be provisioned.
    ChrootProblem,

    /// The source changed again before this build finished; its output was
    /// discarded.
    BuildForSupersededSource,

    /// Build dependencies were not installable yet.
    DependencyWait,

    /// Built, but publishing into the repository failed.
    FailedToUpload,

    /// Legacy records predating state tracking.
    Unknown,
}

impl BuildState {
    /// Whether this state ends the build's lifecycle.
    pub fn is_terminal(self) -> bool {
        !matches!(self, BuildState::NeedsBuilding | BuildState::Building)
    }
}

/// What a fetched build artifact contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A source package (`.dsc`).
    Source,

    /// A binary package (`.deb` / `.ddeb`).
    Binary,
}

/// Metadata record for one artifact a build produced.
///
/// The files themselves live in the repository pool once published; the
/// record ties them back to the build that made them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub file_name: String,
    pub kind: ArtifactKind,
}

/// One build attempt of a [`PackageSource`](super::PackageSource).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,

    /// The source being built.
    pub source: SourceId,

    /// Version string, unset until the builder determines it.
    pub version: Option<String>,

    /// Snapshot of the source's build counter at dispatch time.
    pub build_counter: u64,

    /// The commit being built.
    pub sha: Sha,

    pub state: BuildState,

    pub started_at: DateTime<Utc>,

    /// Set exactly once, when the build reaches a terminal state.
    pub finished_at: Option<DateTime<Utc>>,

    /// Hostname of the worker that handled this build.
    pub handled_by: String,

    /// Source and binary packages this build produced, recorded when the
    /// artifacts are classified for publication.
    #[serde(default)]
    pub artifacts: Vec<BuildArtifact>,
}

impl Build {
    pub fn new(id: BuildId, source: SourceId, build_counter: u64, sha: Sha, handled_by: impl Into<String>) -> Self {
        Build {
            id,
            source,
            version: None,
            build_counter,
            sha,
            state: BuildState::NeedsBuilding,
            started_at: Utc::now(),
            finished_at: None,
            handled_by: handled_by.into(),
            artifacts: Vec::new(),
        }
    }

    /// Marks the build as picked up by a worker. A no-op once the build has
    /// left [`BuildState::NeedsBuilding`].
    pub fn begin(&mut self) {
        if self.state == BuildState::NeedsBuilding {
            self.state = BuildState::Building;
        }
    }

    /// Moves the build into a terminal state and stamps `finished_at`.
    ///
    /// A no-op if the build is already terminal: the first terminal
    /// transition wins, so `finished_at` is set exactly once.
    pub fn finish(&mut self, state: BuildState) {
        debug_assert!(state.is_terminal());
        if self.state.is_terminal() {
            return;
        }
        self.state = state;
        self.finished_at = Some(Utc::now());
    }
}

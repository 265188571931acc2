//! Package source records and poll outcomes.
//!
//! A [`PackageSource`] tracks one git remote + branch bound to a series.
//! Polling and building mutate it through explicit transition methods; there
//! are no ad hoc field writes scattered across call sites.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{RepositoryId, Sha, SourceId};

/// A git-hosted project registered for automatic building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSource {
    pub id: SourceId,

    /// Owning repository.
    pub repository: RepositoryId,

    /// Series within the repository that builds publish into.
    pub series: String,

    /// Git remote URL.
    pub url: String,

    /// Tracked branch.
    pub branch: String,

    /// SHA seen by the most recent successful poll.
    pub last_seen_sha: Option<Sha>,

    /// Version string of the most recent build that determined one.
    pub last_built_version: Option<String>,

    /// Package name of the most recent build that determined one. Used for
    /// best-effort artifact purge on deletion.
    pub last_built_name: Option<String>,

    /// Monotonic build counter. Only ever increases, and only via
    /// [`Store::next_build_counter`](crate::store::Store::next_build_counter).
    pub build_counter: u64,

    /// Set automatically after a poll failure; cleared only by explicit
    /// human action via [`clear_failure`](Self::clear_failure).
    pub disabled: bool,

    /// Text of the most recent poll failure.
    pub last_failure: Option<String>,

    /// When the most recent poll failure happened.
    pub last_failure_at: Option<DateTime<Utc>>,

    /// Whether a webhook has been registered with the hosting provider.
    /// Registration itself happens outside the core.
    pub webhook_registered: bool,
}

impl PackageSource {
    pub fn new(
        id: SourceId,
        repository: RepositoryId,
        series: impl Into<String>,
        url: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        PackageSource {
            id,
            repository,
            series: series.into(),
            url: url.into(),
            branch: branch.into(),
            last_seen_sha: None,
            last_built_version: None,
            last_built_name: None,
            build_counter: 0,
            disabled: false,
            last_failure: None,
            last_failure_at: None,
            webhook_registered: false,
        }
    }

    /// `{owner-ish}` long name used for build log paths. Derived from the
    /// remote URL's final path component, stripped of a `.git` suffix.
    pub fn long_name(&self) -> String {
        let tail = self
            .url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.url);
        let tail = tail.strip_suffix(".git").unwrap_or(tail);
        format!("{}_{}", tail, self.branch.replace('/', "_"))
    }

    /// Records a poll failure: captures the failure text with a timestamp and
    /// disables the source. A disabled source is skipped by the scheduler
    /// until a human clears the failure.
    pub fn record_poll_failure(&mut self, failure: impl Into<String>) {
        self.last_failure = Some(failure.into());
        self.last_failure_at = Some(Utc::now());
        self.disabled = true;
    }

    /// Explicitly re-enables a source after a poll failure.
    pub fn clear_failure(&mut self) {
        self.last_failure = None;
        self.last_failure_at = None;
        self.disabled = false;
    }

    /// Records a successfully fetched remote SHA.
    pub fn record_seen(&mut self, sha: Sha) {
        self.last_seen_sha = Some(sha);
    }

    /// Records the identity determined by a build.
    pub fn record_built(&mut self, name: impl Into<String>, version: impl Into<String>) {
        self.last_built_name = Some(name.into());
        self.last_built_version = Some(version.into());
    }
}

/// Result of polling a source's git remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The remote's branch head differs from `last_seen_sha`; a build is
    /// warranted.
    Changed { sha: Sha },

    /// Nothing new (or the poll failed and the source was disabled).
    NoChange,
}

impl PollOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, PollOutcome::Changed { .. })
    }
}

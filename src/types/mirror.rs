//! Mirror, mirror set, and snapshot records.
//!
//! Mirrors are local copies of external APT repositories. Mirror sets group
//! mirrors purely as a versioning unit for snapshots: an immutable, tagged
//! point-in-time capture of every member mirror's contents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::ids::{MirrorId, MirrorSetId, SnapshotId};

/// A local, periodically refreshed copy of an external APT repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    pub id: MirrorId,

    /// Owning user.
    pub owner: String,

    /// Upstream repository URL.
    pub url: String,

    /// Space-separated series (suite) list, e.g. "bookworm bookworm-updates".
    pub series: String,

    /// Space-separated component list, e.g. "main contrib".
    pub components: String,

    /// Whether the mirror is visible to other users.
    pub public: bool,

    /// Guard against concurrent refreshes. Flipped false→true only by the
    /// store's conditional update; cleared by a scoped guard when the
    /// refresh finishes, successfully or not.
    pub refresh_in_progress: bool,
}

impl Mirror {
    pub fn new(
        id: MirrorId,
        owner: impl Into<String>,
        url: impl Into<String>,
        series: impl Into<String>,
        components: impl Into<String>,
    ) -> Self {
        Mirror {
            id,
            owner: owner.into(),
            url: url.into(),
            series: series.into(),
            components: components.into(),
            public: false,
            refresh_in_progress: false,
        }
    }

    /// On-disk directory of the mirrored data.
    pub fn mirror_dir(&self, mirror_base: &Path) -> PathBuf {
        mirror_base.join("mirrors").join(self.id.to_string())
    }
}

/// A named group of mirrors, used as the unit of snapshotting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorSet {
    pub id: MirrorSetId,
    pub owner: String,
    pub name: String,
    pub members: BTreeSet<MirrorId>,
}

impl MirrorSet {
    pub fn new(id: MirrorSetId, owner: impl Into<String>, name: impl Into<String>) -> Self {
        MirrorSet {
            id,
            owner: owner.into(),
            name: name.into(),
            members: BTreeSet::new(),
        }
    }
}

/// An immutable point-in-time capture of a mirror set.
///
/// Created synchronously as a placeholder record; the on-disk population
/// (dists sync + pool link) runs asynchronously. Only the first save of the
/// record triggers population; later tag edits never do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub mirror_set: MirrorSetId,
    pub created_at: DateTime<Utc>,

    /// Free-form tags for later retrieval, e.g. "prod-2026-08".
    pub tags: BTreeSet<String>,
}

impl Snapshot {
    pub fn new(id: SnapshotId, mirror_set: MirrorSetId) -> Self {
        Snapshot {
            id,
            mirror_set,
            created_at: Utc::now(),
            tags: BTreeSet::new(),
        }
    }

    /// Final on-disk directory of the populated snapshot.
    pub fn snapshot_dir(&self, mirror_base: &Path) -> PathBuf {
        mirror_base.join("snapshots").join(self.id.to_string())
    }

    /// Staging directory populated before the atomic rename to
    /// [`snapshot_dir`](Self::snapshot_dir). Readers never see this path.
    pub fn staging_dir(&self, mirror_base: &Path) -> PathBuf {
        mirror_base
            .join("snapshots")
            .join(format!("{}.staging", self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_layout() {
        let m = Mirror::new(MirrorId(7), "alice", "http://deb.debian.org/debian", "bookworm", "main");
        assert_eq!(
            m.mirror_dir(Path::new("/srv/mirrorsvc")),
            PathBuf::from("/srv/mirrorsvc/mirrors/7")
        );

        let s = Snapshot::new(SnapshotId(3), MirrorSetId(1));
        assert_eq!(
            s.snapshot_dir(Path::new("/srv/mirrorsvc")),
            PathBuf::from("/srv/mirrorsvc/snapshots/3")
        );
        assert_eq!(
            s.staging_dir(Path::new("/srv/mirrorsvc")),
            PathBuf::from("/srv/mirrorsvc/snapshots/3.staging")
        );
    }
}

//! Repository and series records.
//!
//! A [`Repository`] is the unit of publication: one signed APT repository per
//! (owner, name) pair. It owns one or more [`Series`] (distribution channels,
//! e.g. "stable"); the first series is created lazily on first access when
//! none exists yet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::ids::RepositoryId;

/// A per-user APT repository.
///
/// Invariant: `(owner, name)` is unique across all repositories (enforced by
/// the store at insert time). Destroying a repository must also reconcile the
/// on-disk private and public trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,

    /// Owning user, e.g. "alice". First path component of both trees.
    pub owner: String,

    /// Repository name, unique per owner.
    pub name: String,

    /// GPG key id, set lazily by the signature store on first use.
    pub key_id: Option<String>,

    /// Cached ASCII-armored public key material, exported once the key
    /// exists. `None` until the first export.
    pub key_data: Option<String>,

    /// Extra groups whose members may administer this repository. The
    /// permission checks themselves live in the (out of scope) API layer;
    /// the core only carries the data.
    pub extra_admin_groups: BTreeSet<String>,

    pub created_at: DateTime<Utc>,
}

impl Repository {
    pub fn new(id: RepositoryId, owner: impl Into<String>, name: impl Into<String>) -> Self {
        Repository {
            id,
            owner: owner.into(),
            name: name.into(),
            key_id: None,
            key_data: None,
            extra_admin_groups: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    /// The private on-disk tree: reprepro config, GPG home, pool index.
    pub fn private_dir(&self, repos_base: &Path) -> PathBuf {
        repos_base.join(&self.owner).join(&self.name)
    }

    /// The public on-disk tree: exported Packages/Sources/Release, `repo.key`,
    /// build logs.
    pub fn public_dir(&self, public_base: &Path) -> PathBuf {
        public_base.join(&self.owner).join(&self.name)
    }

    /// Base URL of the published repository, `{base_url}/{owner}/{name}`.
    pub fn base_url(&self, base_url: &str) -> String {
        format!("{}/{}/{}", base_url.trim_end_matches('/'), self.owner, self.name)
    }
}

/// A named distribution channel within a repository.
///
/// Analogous to an APT "suite". Holds the external APT lines mixed into the
/// build environment so packages can depend on other repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    /// Owning repository.
    pub repository: RepositoryId,

    /// Series name, e.g. "stable".
    pub name: String,

    /// Extra `deb ...` lines to make available inside build environments.
    pub external_dependencies: Vec<String>,
}

impl Series {
    pub fn new(repository: RepositoryId, name: impl Into<String>) -> Self {
        Series {
            repository,
            name: name.into(),
            external_dependencies: Vec::new(),
        }
    }

    /// The binary sources.list line for this series.
    ///
    /// With `trusted`, emits `deb [trusted=yes] ...` so apt accepts the
    /// repository before its key has been imported.
    pub fn binary_source_line(&self, repo: &Repository, base_url: &str, trusted: bool) -> String {
        let opts = if trusted { " [trusted=yes]" } else { "" };
        format!("deb{} {} {} main", opts, repo.base_url(base_url), self.name)
    }

    /// The source-package sources.list line for this series.
    pub fn source_source_line(&self, repo: &Repository, base_url: &str, trusted: bool) -> String {
        let opts = if trusted { " [trusted=yes]" } else { "" };
        format!("deb-src{} {} {} main", opts, repo.base_url(base_url), self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> Repository {
        Repository::new(RepositoryId(1), "alice", "tools")
    }

    #[test]
    fn sources_list_line_formats() {
        let r = repo();
        let s = Series::new(r.id, "stable");
        assert_eq!(
            s.binary_source_line(&r, "https://apt.example.com/", false),
            "deb https://apt.example.com/alice/tools stable main"
        );
        assert_eq!(
            s.binary_source_line(&r, "https://apt.example.com", true),
            "deb [trusted=yes] https://apt.example.com/alice/tools stable main"
        );
        assert_eq!(
            s.source_source_line(&r, "https://apt.example.com", false),
            "deb-src https://apt.example.com/alice/tools stable main"
        );
    }

    #[test]
    fn private_and_public_trees_are_owner_name_keyed() {
        let r = repo();
        assert_eq!(
            r.private_dir(Path::new("/var/lib/aptforge/repos")),
            PathBuf::from("/var/lib/aptforge/repos/alice/tools")
        );
        assert_eq!(
            r.public_dir(Path::new("/srv/public")),
            PathBuf::from("/srv/public/alice/tools")
        );
    }
}

//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., using a
//! MirrorId where a SourceId is expected) and make job payloads
//! self-documenting: jobs carry ids, never entity values.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! numeric_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(n: u64) -> Self {
                $name(n)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a [`Repository`](crate::types::Repository).
    RepositoryId
);
numeric_id!(
    /// Identifier of a [`PackageSource`](crate::types::PackageSource).
    SourceId
);
numeric_id!(
    /// Identifier of a [`Build`](crate::types::Build).
    BuildId
);
numeric_id!(
    /// Identifier of a [`Mirror`](crate::types::Mirror).
    MirrorId
);
numeric_id!(
    /// Identifier of a [`MirrorSet`](crate::types::MirrorSet).
    MirrorSetId
);
numeric_id!(
    /// Identifier of a [`Snapshot`](crate::types::Snapshot).
    SnapshotId
);

/// A git commit SHA (40 hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha(pub String);

impl Sha {
    /// Creates a new Sha from a string.
    ///
    /// Note: this does not validate the format. Valid SHAs are 40 hex
    /// characters; `git ls-remote` output is trusted as the producer.
    pub fn new(s: impl Into<String>) -> Self {
        Sha(s.into())
    }

    /// Returns the SHA as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short (7-character) version of the SHA for display.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Sha {
    fn from(s: String) -> Self {
        Sha(s)
    }
}

impl From<&str> for Sha {
    fn from(s: &str) -> Self {
        Sha(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha_short_truncates_to_seven() {
        let sha = Sha::new("0123456789abcdef0123456789abcdef01234567");
        assert_eq!(sha.short(), "0123456");
    }

    #[test]
    fn sha_short_tolerates_short_input() {
        let sha = Sha::new("abc");
        assert_eq!(sha.short(), "abc");
    }

    #[test]
    fn ids_roundtrip_as_transparent_json() {
        let id = SourceId(42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "42");
        let back: SourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

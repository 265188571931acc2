//! Core domain types for the build-and-publish pipeline.
//!
//! This module contains the fundamental records used throughout the
//! application, designed to encode invariants via the type system: newtype
//! ids, explicit state enums, and transition methods instead of bare field
//! writes.

pub mod build;
pub mod ids;
pub mod mirror;
pub mod repo;
pub mod source;

pub use build::{ArtifactKind, Build, BuildArtifact, BuildState};
pub use ids::{BuildId, MirrorId, MirrorSetId, RepositoryId, Sha, SnapshotId, SourceId};
pub use mirror::{Mirror, MirrorSet, Snapshot};
pub use repo::{Repository, Series};
pub use source::{PackageSource, PollOutcome};

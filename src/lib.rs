//! Builds Debian packages from git-hosted sources and publishes them into
//! signed per-user APT repositories, and maintains local mirrors of
//! external repositories with immutable point-in-time snapshots.
//!
//! The pipeline: registered [`types::PackageSource`]s are polled for new
//! commits ([`source::poll`]); changes trigger a build
//! ([`source::build::run`]) inside an isolated [`executor::Executor`],
//! driven by an ecosystem-aware [`builder::PackageBuilder`]; artifacts are
//! published through the injected [`repodrv::RepositoryDriver`]. All work
//! flows through the [`jobs`] queue as fire-and-forget id payloads, with
//! durable entity state in the [`store`].

pub mod builder;
pub mod config;
pub mod context;
pub mod executor;
pub mod gitcli;
pub mod jobs;
pub mod logs;
pub mod mirror;
pub mod process;
pub mod repodrv;
pub mod sign;
pub mod source;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

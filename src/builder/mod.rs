//! Package builders.
//!
//! Given a checked-out source tree, a builder determines package identity
//! and version, renders packaging metadata, and drives the source and
//! binary package builds through an [`Executor`]. Builder selection is an
//! explicit ordered probe list evaluated first-match: trees that carry their
//! own `debian/` directory pass through unchanged, recognized language
//! ecosystems get metadata synthesized from their own tooling, and a generic
//! fallback still produces a minimal package for everything else.

pub mod changelog;
pub mod version;

mod generic;
mod native;
mod python;

pub use generic::GenericBuilder;
pub use native::NativeBuilder;
pub use python::PythonBuilder;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::executor::{Executor, ExecutorError};
use crate::process::{ProcessError, SharedLog};

/// Errors from builder operations.
#[derive(Debug, Error)]
pub enum BuildError {
    /// An external tool (ecosystem query, dpkg-buildpackage) failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The tree's packaging metadata is internally inconsistent or
    /// unsupported.
    #[error("package validation failed: {details}")]
    Validation { details: String },
}

/// Result type for builder operations.
pub type Result<T> = std::result::Result<T, BuildError>;

/// Computed identity handed to metadata rendering.
#[derive(Debug, Clone)]
pub struct PackageIdentity {
    pub name: String,
    pub version: String,
    pub maintainer: String,
    pub build_dependencies: Vec<String>,
    pub runtime_dependencies: Vec<String>,
}

/// Capability set of a package builder.
///
/// Implementations own the checked-out workspace path and are stateless
/// beyond it. Queries that execute code from the tree (ecosystem tooling,
/// dpkg-buildpackage) run through the [`Executor`]; the checkout is
/// untrusted and must never run on the orchestrator directly.
pub trait PackageBuilder: Send {
    /// Short builder name for logs.
    fn kind(&self) -> &'static str;

    /// The checked-out tree this builder operates on.
    fn workspace(&self) -> &Path;

    /// Package name derived from the tree.
    fn package_name(&self, executor: &mut dyn Executor, log: &SharedLog) -> Result<String>;

    /// Ecosystem-reported version, `None` when the project type exposes
    /// none (native passthrough, generic fallback).
    fn native_version(
        &self,
        executor: &mut dyn Executor,
        log: &SharedLog,
    ) -> Result<Option<String>>;

    /// Ecosystem build dependencies, plus any user-declared extras.
    fn build_dependencies(&self, log: &SharedLog) -> Result<Vec<String>>;

    /// Ecosystem runtime dependencies, plus any user-declared extras.
    fn runtime_dependencies(&self, log: &SharedLog) -> Result<Vec<String>>;

    /// Renders or merges the packaging metadata directory.
    fn populate_debian_dir(&self, identity: &PackageIdentity) -> Result<()>;

    /// Builds the source package inside the executor.
    fn build_source_package(
        &self,
        executor: &mut dyn Executor,
        log: &SharedLog,
    ) -> Result<Vec<u8>> {
        let argv: Vec<String> = ["dpkg-buildpackage", "-S", "-us", "-uc", "-d", "-nc"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Ok(executor.run_cmd(&argv, Some(self.workspace()), log)?)
    }

    /// Builds the binary package(s) inside the executor.
    fn build_binary_packages(
        &self,
        executor: &mut dyn Executor,
        log: &SharedLog,
    ) -> Result<Vec<u8>> {
        let argv: Vec<String> = ["dpkg-buildpackage", "-b", "-us", "-uc", "-d"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Ok(executor.run_cmd(&argv, Some(self.workspace()), log)?)
    }
}

type Predicate = fn(&Path) -> bool;
type Constructor = fn(PathBuf) -> Box<dyn PackageBuilder>;

/// Ordered suitability probes: native packaging first, ecosystems next,
/// generic fallback last. First match wins.
const PROBES: &[(Predicate, Constructor)] = &[
    (NativeBuilder::suitable, NativeBuilder::boxed),
    (PythonBuilder::suitable, PythonBuilder::boxed),
    (GenericBuilder::suitable, GenericBuilder::boxed),
];

/// Selects the builder for a checked-out tree.
pub fn select_builder(workspace: &Path) -> Box<dyn PackageBuilder> {
    for (suitable, construct) in PROBES {
        if suitable(workspace) {
            return construct(workspace.to_path_buf());
        }
    }
    // The generic probe always matches.
    unreachable!("generic builder probe must match every tree")
}

/// Name of the user-declared extra dependency file at the tree root.
const EXTRA_DEPS_FILE: &str = ".extra-deps";

/// Reads user-declared extra dependencies: one per line, `#` comments.
pub(crate) fn user_extra_dependencies(workspace: &Path) -> Result<Vec<String>> {
    let path = workspace.join(EXTRA_DEPS_FILE);
    let content = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Lowercases and sanitizes a string into a valid Debian package name.
pub(crate) fn sanitize_package_name(raw: &str) -> String {
    let mut name: String = raw
        .to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    while name.starts_with(['-', '.', '+']) {
        name.remove(0);
    }
    if name.len() < 2 {
        name = format!("pkg-{name}");
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn probe_order_prefers_native_packaging() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("debian")).unwrap();
        std::fs::write(dir.path().join("setup.py"), "from setuptools import setup\n").unwrap();

        let builder = select_builder(dir.path());
        assert_eq!(builder.kind(), "native");
    }

    #[test]
    fn probe_selects_python_for_setup_py() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("setup.py"), "from setuptools import setup\n").unwrap();

        let builder = select_builder(dir.path());
        assert_eq!(builder.kind(), "python");
    }

    #[test]
    fn probe_falls_back_to_generic() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("main.c"), "int main(void){return 0;}\n").unwrap();

        let builder = select_builder(dir.path());
        assert_eq!(builder.kind(), "generic");
    }

    #[test]
    fn extra_deps_parsed_with_comments() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(".extra-deps"),
            "# build needs curl\nlibcurl4-openssl-dev\n\nzlib1g-dev\n",
        )
        .unwrap();
        assert_eq!(
            user_extra_dependencies(dir.path()).unwrap(),
            vec!["libcurl4-openssl-dev", "zlib1g-dev"]
        );
    }

    #[test]
    fn extra_deps_absent_is_empty() {
        let dir = tempdir().unwrap();
        assert!(user_extra_dependencies(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn sanitize_package_name_rules() {
        assert_eq!(sanitize_package_name("My_Widget"), "my-widget");
        assert_eq!(sanitize_package_name("widget2"), "widget2");
        assert_eq!(sanitize_package_name("-odd"), "odd");
        assert_eq!(sanitize_package_name("x"), "pkg-x");
    }
}

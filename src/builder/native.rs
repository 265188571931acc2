//! Passthrough builder for trees that carry their own `debian/` directory.
//!
//! The project's packaging metadata is used unchanged; the only thing the
//! pipeline adds is the generated changelog entry. Such projects do not
//! expose a native version to the version algorithm — the build counter
//! alone drives the computed version.

use std::path::{Path, PathBuf};

use crate::executor::Executor;
use crate::process::SharedLog;

use super::{BuildError, PackageBuilder, PackageIdentity, Result, user_extra_dependencies};

pub struct NativeBuilder {
    workspace: PathBuf,
}

impl NativeBuilder {
    pub fn suitable(workspace: &Path) -> bool {
        workspace.join("debian").is_dir()
    }

    pub fn boxed(workspace: PathBuf) -> Box<dyn PackageBuilder> {
        Box::new(NativeBuilder { workspace })
    }
}

impl PackageBuilder for NativeBuilder {
    fn kind(&self) -> &'static str {
        "native"
    }

    fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn package_name(&self, _executor: &mut dyn Executor, _log: &SharedLog) -> Result<String> {
        let control = std::fs::read_to_string(self.workspace.join("debian/control"))?;
        parse_source_field(&control).ok_or_else(|| BuildError::Validation {
            details: "debian/control has no Source: field".to_string(),
        })
    }

    fn native_version(
        &self,
        _executor: &mut dyn Executor,
        _log: &SharedLog,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    fn build_dependencies(&self, _log: &SharedLog) -> Result<Vec<String>> {
        user_extra_dependencies(&self.workspace)
    }

    fn runtime_dependencies(&self, _log: &SharedLog) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn populate_debian_dir(&self, _identity: &PackageIdentity) -> Result<()> {
        // The tree's own packaging is authoritative.
        Ok(())
    }
}

/// Extracts the `Source:` field from a debian/control file.
fn parse_source_field(control: &str) -> Option<String> {
    control
        .lines()
        .find_map(|line| line.strip_prefix("Source:"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::LocalExecutor;
    use crate::process::{NullLog, shared_log};
    use tempfile::tempdir;

    #[test]
    fn package_name_comes_from_control_source_field() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("debian")).unwrap();
        std::fs::write(
            dir.path().join("debian/control"),
            "Source: widget\nMaintainer: someone\n\nPackage: widget\n",
        )
        .unwrap();

        let builder = NativeBuilder {
            workspace: dir.path().to_path_buf(),
        };
        let mut executor = LocalExecutor::new();
        let log = shared_log(NullLog);
        assert_eq!(builder.package_name(&mut executor, &log).unwrap(), "widget");
        assert_eq!(builder.native_version(&mut executor, &log).unwrap(), None);
    }

    #[test]
    fn missing_source_field_is_a_validation_error() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("debian")).unwrap();
        std::fs::write(dir.path().join("debian/control"), "Package: widget\n").unwrap();

        let builder = NativeBuilder {
            workspace: dir.path().to_path_buf(),
        };
        let mut executor = LocalExecutor::new();
        let log = shared_log(NullLog);
        assert!(matches!(
            builder.package_name(&mut executor, &log),
            Err(BuildError::Validation { .. })
        ));
    }
}

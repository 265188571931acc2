//! Generic fallback builder.
//!
//! Matches any tree the earlier probes rejected and still produces a
//! minimal, installable package: architecture-independent, no build or
//! install steps, named after the tree's directory. Useful for sources
//! that only exist to version a repository entry.

use std::path::{Path, PathBuf};

use crate::executor::Executor;
use crate::process::SharedLog;

use super::{
    BuildError, PackageBuilder, PackageIdentity, Result, sanitize_package_name,
    user_extra_dependencies,
};

pub struct GenericBuilder {
    workspace: PathBuf,
}

impl GenericBuilder {
    pub fn suitable(_workspace: &Path) -> bool {
        true
    }

    pub fn boxed(workspace: PathBuf) -> Box<dyn PackageBuilder> {
        Box::new(GenericBuilder { workspace })
    }
}

impl PackageBuilder for GenericBuilder {
    fn kind(&self) -> &'static str {
        "generic"
    }

    fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn package_name(&self, _executor: &mut dyn Executor, _log: &SharedLog) -> Result<String> {
        let raw = self
            .workspace
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| BuildError::Validation {
                details: "workspace path has no usable directory name".to_string(),
            })?;
        Ok(sanitize_package_name(raw))
    }

    fn native_version(
        &self,
        _executor: &mut dyn Executor,
        _log: &SharedLog,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    fn build_dependencies(&self, _log: &SharedLog) -> Result<Vec<String>> {
        let mut deps = vec!["debhelper-compat (= 13)".to_string()];
        deps.extend(user_extra_dependencies(&self.workspace)?);
        Ok(deps)
    }

    fn runtime_dependencies(&self, _log: &SharedLog) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn populate_debian_dir(&self, identity: &PackageIdentity) -> Result<()> {
        let debian = self.workspace.join("debian");
        std::fs::create_dir_all(debian.join("source"))?;

        std::fs::write(debian.join("control"), render_control(identity))?;
        std::fs::write(debian.join("source/format"), "3.0 (native)\n")?;

        let rules_path = debian.join("rules");
        std::fs::write(
            &rules_path,
            "#!/usr/bin/make -f\n\n%:\n\tdh $@\n\noverride_dh_auto_build:\n\noverride_dh_auto_install:\n",
        )?;
        make_executable(&rules_path)?;
        Ok(())
    }
}

fn render_control(identity: &PackageIdentity) -> String {
    let mut depends = vec!["${misc:Depends}".to_string()];
    depends.extend(identity.runtime_dependencies.iter().cloned());
    format!(
        "Source: {name}\n\
         Section: misc\n\
         Priority: optional\n\
         Maintainer: {maintainer}\n\
         Build-Depends: {build_deps}\n\
         Standards-Version: 4.6.2\n\
         \n\
         Package: {name}\n\
         Architecture: all\n\
         Depends: {depends}\n\
         Description: {name} (automated build)\n \
         Built automatically from a registered package source.\n",
        name = identity.name,
        maintainer = identity.maintainer,
        build_deps = identity.build_dependencies.join(", "),
        depends = depends.join(", "),
    )
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::LocalExecutor;
    use crate::process::{NullLog, shared_log};
    use tempfile::tempdir;

    #[test]
    fn name_derives_from_directory() {
        let root = tempdir().unwrap();
        let workspace = root.path().join("My_Widget");
        std::fs::create_dir_all(&workspace).unwrap();

        let builder = GenericBuilder { workspace };
        let mut executor = LocalExecutor::new();
        let log = shared_log(NullLog);
        assert_eq!(builder.package_name(&mut executor, &log).unwrap(), "my-widget");
        assert_eq!(builder.native_version(&mut executor, &log).unwrap(), None);
    }

    #[test]
    fn populate_produces_minimal_packaging() {
        let dir = tempdir().unwrap();
        let builder = GenericBuilder {
            workspace: dir.path().to_path_buf(),
        };
        let identity = PackageIdentity {
            name: "thing".to_string(),
            version: "3".to_string(),
            maintainer: "m <m@x>".to_string(),
            build_dependencies: vec!["debhelper-compat (= 13)".to_string()],
            runtime_dependencies: Vec::new(),
        };

        builder.populate_debian_dir(&identity).unwrap();

        let rules = std::fs::read_to_string(dir.path().join("debian/rules")).unwrap();
        assert!(rules.contains("override_dh_auto_build:"));
        let control = std::fs::read_to_string(dir.path().join("debian/control")).unwrap();
        assert!(control.contains("Architecture: all"));
    }
}

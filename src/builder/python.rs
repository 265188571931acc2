//! Builder for Python projects (`setup.py` at the tree root).
//!
//! Name and version come from the ecosystem's own tooling
//! (`python3 setup.py --name` / `--version`) rather than any parsing of the
//! file, so dynamically computed values work. Packaging metadata is
//! synthesized: a pybuild-based `debian/` directory rendered from the
//! computed identity.

use std::path::{Path, PathBuf};

use crate::executor::Executor;
use crate::process::SharedLog;

use super::{
    BuildError, PackageBuilder, PackageIdentity, Result, sanitize_package_name,
    user_extra_dependencies,
};

/// Build dependencies every synthesized Python package needs.
const PYTHON_BUILD_DEPS: [&str; 4] = [
    "debhelper-compat (= 13)",
    "dh-python",
    "python3-all",
    "python3-setuptools",
];

pub struct PythonBuilder {
    workspace: PathBuf,
}

impl PythonBuilder {
    pub fn suitable(workspace: &Path) -> bool {
        workspace.join("setup.py").is_file()
    }

    pub fn boxed(workspace: PathBuf) -> Box<dyn PackageBuilder> {
        Box::new(PythonBuilder { workspace })
    }

    /// Queries `setup.py` for a single metadata value.
    ///
    /// The query executes code from the checkout, so it runs inside the
    /// executor like the builds themselves. setuptools writes warnings to
    /// stderr, suppressed on the executor side; the value is the last
    /// non-empty stdout line.
    fn setup_py_query(
        &self,
        executor: &mut dyn Executor,
        flag: &str,
        log: &SharedLog,
    ) -> Result<String> {
        let argv: Vec<String> = [
            "sh",
            "-c",
            &format!("python3 setup.py {flag} 2>/dev/null"),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let out = executor.run_cmd(&argv, Some(&self.workspace), log)?;
        String::from_utf8_lossy(&out)
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .ok_or_else(|| BuildError::Validation {
                details: format!("setup.py {flag} produced no output"),
            })
    }
}

impl PackageBuilder for PythonBuilder {
    fn kind(&self) -> &'static str {
        "python"
    }

    fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn package_name(&self, executor: &mut dyn Executor, log: &SharedLog) -> Result<String> {
        let raw = self.setup_py_query(executor, "--name", log)?;
        Ok(sanitize_package_name(&raw))
    }

    fn native_version(
        &self,
        executor: &mut dyn Executor,
        log: &SharedLog,
    ) -> Result<Option<String>> {
        Ok(Some(self.setup_py_query(executor, "--version", log)?))
    }

    fn build_dependencies(&self, _log: &SharedLog) -> Result<Vec<String>> {
        let mut deps: Vec<String> = PYTHON_BUILD_DEPS.iter().map(|s| s.to_string()).collect();
        deps.extend(user_extra_dependencies(&self.workspace)?);
        Ok(deps)
    }

    fn runtime_dependencies(&self, _log: &SharedLog) -> Result<Vec<String>> {
        Ok(vec!["python3".to_string()])
    }

    fn populate_debian_dir(&self, identity: &PackageIdentity) -> Result<()> {
        let debian = self.workspace.join("debian");
        std::fs::create_dir_all(debian.join("source"))?;

        std::fs::write(debian.join("control"), render_control(identity))?;
        std::fs::write(debian.join("source/format"), "3.0 (native)\n")?;

        let rules_path = debian.join("rules");
        std::fs::write(
            &rules_path,
            "#!/usr/bin/make -f\n\n%:\n\tdh $@ --with python3 --buildsystem=pybuild\n",
        )?;
        make_executable(&rules_path)?;
        Ok(())
    }
}

fn render_control(identity: &PackageIdentity) -> String {
    let mut depends = vec!["${misc:Depends}".to_string(), "${python3:Depends}".to_string()];
    depends.extend(identity.runtime_dependencies.iter().cloned());
    format!(
        "Source: {name}\n\
         Section: python\n\
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

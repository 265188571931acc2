//! Per-build log files.
//!
//! Build output lands under the repository's public tree so users can tail
//! their builds: `buildlogs/{long_name}/{long_name}_{version}.log`. The
//! version is not known when the build starts, so the log opens under a
//! counter-keyed provisional name and is relocated once the builder has
//! computed the version.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::process::LogSink;

/// An append-mode build log file that can be relocated mid-build.
pub struct BuildLogFile {
    path: PathBuf,
    file: File,
}

impl BuildLogFile {
    /// Directory of a source's build logs under the public tree.
    pub fn log_dir(public_repo_dir: &Path, long_name: &str) -> PathBuf {
        public_repo_dir.join("buildlogs").join(long_name)
    }

    /// Final log pathname once the version is known.
    pub fn final_path(public_repo_dir: &Path, long_name: &str, version: &str) -> PathBuf {
        Self::log_dir(public_repo_dir, long_name).join(format!("{long_name}_{version}.log"))
    }

    /// Opens a provisional log keyed by the build counter.
    pub fn provisional(
        public_repo_dir: &Path,
        long_name: &str,
        build_counter: u64,
    ) -> std::io::Result<Self> {
        let dir = Self::log_dir(public_repo_dir, long_name);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{long_name}_tmp{build_counter}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(BuildLogFile { path, file })
    }

    /// Moves the log to its final, version-keyed pathname.
    ///
    /// Further lines append to the new location. Relocation failure is
    /// logged but does not abort a build; the provisional log remains.
    pub fn relocate(&mut self, final_path: &Path) {
        if let Some(parent) = final_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(target: "aptforge::logs", error = %e, "cannot create log dir");
                return;
            }
        }
        match std::fs::rename(&self.path, final_path) {
            Ok(()) => match OpenOptions::new().create(true).append(true).open(final_path) {
                Ok(file) => {
                    self.file = file;
                    self.path = final_path.to_path_buf();
                }
                Err(e) => {
                    warn!(target: "aptforge::logs", error = %e, "cannot reopen relocated log");
                }
            },
            Err(e) => {
                warn!(target: "aptforge::logs", error = %e, "cannot relocate build log");
            }
        }
    }

    /// Current pathname of the log.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for BuildLogFile {
    fn line(&mut self, line: &str) {
        // Write failures must not abort a build over its own log.
        let _ = writeln!(self.file, "{line}");
    }
}

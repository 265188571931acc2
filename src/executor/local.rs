//! In-process build execution.
//!
//! Runs build commands in the orchestrating process's own environment.
//! Suitable for development and trusted sources only; isolation comes from
//! the VM and container executors.

use std::path::Path;

use tracing::debug;

use crate::process::{self, RunRequest, SharedLog};

use super::{Executor, Result};

/// Runs commands directly on the local machine.
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        LocalExecutor
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for LocalExecutor {
    fn run_cmd(&mut self, argv: &[String], cwd: Option<&Path>, log: &SharedLog) -> Result<Vec<u8>> {
        let mut req = RunRequest::new(argv.iter().cloned());
        if let Some(dir) = cwd {
            req = req.cwd(dir);
        }
        Ok(process::run(&req, log)?)
    }

    fn fetch(&mut self, pattern: &str, _dest: &Path, _log: &SharedLog) -> Result<()> {
        // Build output is already on local storage; nothing to pull.
        debug!(target: "aptforge::executor", pattern, "local fetch is a no-op");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{shared_log, NullLog};
    use tempfile::tempdir;

    #[test]
    fn run_cmd_honors_cwd() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("probe"), "x").unwrap();

        let log = shared_log(NullLog);
        let mut exec = LocalExecutor::new();
        let out = exec
            .run_cmd(&["ls".to_string()], Some(dir.path()), &log)
            .unwrap();
        assert!(String::from_utf8_lossy(&out).contains("probe"));
    }

    #[test]
    fn fetch_is_a_no_op() {
        let dir = tempdir().unwrap();
        let log = shared_log(NullLog);
        let mut exec = LocalExecutor::new();
        exec.fetch("*.changes", dir.path(), &log).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

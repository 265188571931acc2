//! Container build execution.
//!
//! Runs builds inside a long-lived `docker` container created per build.
//! The local workspace root is bind-mounted at the same path inside the
//! container, so working directories pass through unchanged and artifacts
//! land directly on local storage. The container is removed in `Drop`.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::process::{self, NullLog, RunRequest, SharedLog, shared_log};

use super::{Executor, ExecutorError, Result};

/// A build environment inside a docker container.
pub struct ContainerExecutor {
    container_id: String,
}

impl ContainerExecutor {
    /// Starts a container with the workspace bind-mounted.
    pub fn provision(config: &Config, label: &str, log: &SharedLog) -> Result<Self> {
        let workspace = config.workspace_dir.to_string_lossy().into_owned();
        let name = format!("aptforge-{label}");
        let mount = format!("{workspace}:{workspace}");
        let run = RunRequest::new([
            "docker",
            "run",
            "--detach",
            "--name",
            name.as_str(),
            "--volume",
            mount.as_str(),
            config.container_image.as_str(),
            "sleep",
            "infinity",
        ]);
        let out = process::run_stdout(&run, log)?;
        let container_id = out.lines().last().unwrap_or("").trim().to_string();
        if container_id.is_empty() {
            return Err(ExecutorError::Provision {
                details: "docker run produced no container id".to_string(),
            });
        }
        info!(target: "aptforge::executor", container = %container_id, "container provisioned");
        Ok(ContainerExecutor { container_id })
    }
}

impl Executor for ContainerExecutor {
    fn run_cmd(&mut self, argv: &[String], cwd: Option<&Path>, log: &SharedLog) -> Result<Vec<u8>> {
        let mut docker: Vec<String> = vec!["docker".to_string(), "exec".to_string()];
        if let Some(dir) = cwd {
            docker.push("--workdir".to_string());
            docker.push(dir.to_string_lossy().into_owned());
        }
        docker.push(self.container_id.clone());
        docker.extend(argv.iter().cloned());
        Ok(process::run(&RunRequest { argv: docker, ..Default::default() }, log)?)
    }

    fn fetch(&mut self, pattern: &str, _dest: &Path, _log: &SharedLog) -> Result<()> {
        // The workspace is bind-mounted; artifacts are already local.
        debug!(target: "aptforge::executor", pattern, "container fetch is a no-op");
        Ok(())
    }
}

impl Drop for ContainerExecutor {
    fn drop(&mut self) {
        let log = shared_log(NullLog);
        let req = RunRequest::new(["docker", "rm", "--force", self.container_id.as_str()]);
        if let Err(e) = process::run(&req, &log) {
            warn!(target: "aptforge::executor", container = %self.container_id, error = %e, "failed to remove container");
        }
    }
}

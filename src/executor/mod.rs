//! Build execution environments.
//!
//! An [`Executor`] abstracts where a build physically runs: in the calling
//! process's environment ([`LocalExecutor`]), on an ephemeral cloud VM
//! ([`VmExecutor`]), or inside a container ([`ContainerExecutor`]). Builds
//! must not corrupt or be corrupted by the orchestrating process's own
//! toolchain; putting this seam behind a trait lets local development and
//! isolated per-build VMs share the same build-state machine untouched.
//!
//! Acquisition is scoped: [`ExecutorProvider::acquire`] provisions the
//! environment and returns a boxed executor whose `Drop` tears it down
//! unconditionally, so a failed build cannot leak a billable node.

mod container;
mod local;
mod vm;

pub use container::ContainerExecutor;
pub use local::LocalExecutor;
pub use vm::VmExecutor;

use std::path::Path;

use thiserror::Error;

use crate::config::{Config, ExecutorKind};
use crate::process::{ProcessError, SharedLog};

/// Errors from executor operations.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// An external command (local, ssh, docker, cloud CLI) failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// The execution environment could not be provisioned.
    #[error("failed to provision build environment: {details}")]
    Provision { details: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for executor operations.
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// A place where build commands run.
pub trait Executor: Send {
    /// Runs a command in the execution environment, streaming output to
    /// `log`, returning captured output bytes.
    fn run_cmd(&mut self, argv: &[String], cwd: Option<&Path>, log: &SharedLog) -> Result<Vec<u8>>;

    /// Pulls files matching `pattern` (non-recursive) out of the execution
    /// context into `dest` on local storage.
    fn fetch(&mut self, pattern: &str, dest: &Path, log: &SharedLog) -> Result<()>;
}

/// Provisions executors of the configured kind.
pub struct ExecutorProvider {
    config: Config,
}

impl ExecutorProvider {
    pub fn new(config: &Config) -> Self {
        ExecutorProvider {
            config: config.clone(),
        }
    }

    /// Provisions a fresh execution environment.
    ///
    /// The returned executor tears its environment down when dropped.
    pub fn acquire(&self, label: &str, log: &SharedLog) -> Result<Box<dyn Executor>> {
        match self.config.executor {
            ExecutorKind::Local => Ok(Box::new(LocalExecutor::new())),
            ExecutorKind::Vm => Ok(Box::new(VmExecutor::provision(&self.config, label, log)?)),
            ExecutorKind::Container => Ok(Box::new(ContainerExecutor::provision(
                &self.config,
                label,
                log,
            )?)),
        }
    }
}

/// Quotes a string for inclusion in a remote `sh -c` command line.
pub(crate) fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=+:@".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Joins argv into a shell command line with each word quoted.
pub(crate) fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

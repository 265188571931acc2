//! Ephemeral cloud VM build execution.
//!
//! Provisions a fresh VM per build through the `openstack` CLI, waits for
//! SSH readiness with a bounded retry loop, runs build commands over `ssh`
//! (pushing the working directory with `rsync` first), and fetches artifacts
//! back with `scp`. The VM is deleted in `Drop`, success or failure alike,
//! so a crashed build cannot leak a billable server.

use std::path::Path;

use tracing::{info, warn};

use crate::config::Config;
use crate::process::{self, NullLog, RunRequest, SharedLog, shared_log};

use super::{Executor, ExecutorError, Result, shell_join};

/// Remote directory builds run in, relative to the SSH user's home.
const REMOTE_WORKDIR: &str = "aptforge-build";

/// SSH options for unattended operation against throwaway hosts.
const SSH_OPTS: [&str; 6] = [
    "-o",
    "BatchMode=yes",
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
];

/// A build environment on an ephemeral cloud VM.
pub struct VmExecutor {
    server_id: String,
    address: String,
    ssh_user: String,
    /// Local dir most recently pushed to the remote workdir.
    synced_cwd: Option<std::path::PathBuf>,
}

impl VmExecutor {
    /// Boots a VM and waits until SSH answers.
    pub fn provision(config: &Config, label: &str, log: &SharedLog) -> Result<Self> {
        let name = format!("aptforge-{label}");
        let create = RunRequest::new([
            "openstack",
            "server",
            "create",
            "--image",
            config.vm_image.as_str(),
            "--flavor",
            config.vm_flavor.as_str(),
            "--wait",
            "-f",
            "json",
            name.as_str(),
        ]);
        let out = process::run(&create, log)?;
        let created: serde_json::Value =
            serde_json::from_slice(&out).map_err(|e| ExecutorError::Provision {
                details: format!("unparseable server create output: {e}"),
            })?;
        let server_id = created["id"]
            .as_str()
            .ok_or_else(|| ExecutorError::Provision {
                details: "server create output has no id".to_string(),
            })?
            .to_string();

        let show = RunRequest::new([
            "openstack",
            "server",
            "show",
            server_id.as_str(),
            "-f",
            "value",
            "-c",
            "addresses",
        ]);
        let addresses = process::run_stdout(&show, log)?;
        let address = parse_first_address(&addresses).ok_or_else(|| {
            // The half-provisioned server still needs deleting.
            delete_server(&server_id);
            ExecutorError::Provision {
                details: format!("no address in {addresses:?}"),
            }
        })?;

        let vm = VmExecutor {
            server_id,
            address,
            ssh_user: config.vm_ssh_user.clone(),
            synced_cwd: None,
        };

        info!(target: "aptforge::executor", server = %vm.server_id, address = %vm.address, "VM provisioned, waiting for SSH");

        let ready = process::retry_until(
            "SSH readiness",
            std::time::Duration::from_secs(5),
            config.vm_ready_timeout,
            || vm.ssh(&["true".to_string()], log),
        );
        // On readiness timeout, dropping `vm` deletes the server.
        ready?;

        Ok(vm)
    }

    fn ssh_target(&self) -> String {
        format!("{}@{}", self.ssh_user, self.address)
    }

    fn ssh(&self, remote_argv: &[String], log: &SharedLog) -> process::Result<Vec<u8>> {
        let mut argv: Vec<String> = vec!["ssh".to_string()];
        argv.extend(SSH_OPTS.iter().map(|s| s.to_string()));
        argv.push(self.ssh_target());
        argv.push(shell_join(remote_argv));
        process::run(&RunRequest { argv, ..Default::default() }, log)
    }

    /// Pushes `cwd` to the remote workdir unless it is already there.
    fn sync_cwd(&mut self, cwd: &Path, log: &SharedLog) -> Result<()> {
        if self.synced_cwd.as_deref() == Some(cwd) {
            return Ok(());
        }
        let argv: Vec<String> = vec![
            "rsync".to_string(),
            "-a".to_string(),
            "--delete".to_string(),
            "-e".to_string(),
            format!("ssh {}", SSH_OPTS.join(" ")),
            format!("{}/", cwd.display()),
            format!("{}:{}/", self.ssh_target(), REMOTE_WORKDIR),
        ];
        self.ssh(&["mkdir".to_string(), "-p".to_string(), REMOTE_WORKDIR.to_string()], log)?;
        process::run(&RunRequest { argv, ..Default::default() }, log)?;
        self.synced_cwd = Some(cwd.to_path_buf());
        Ok(())
    }
}

impl Executor for VmExecutor {
    fn run_cmd(&mut self, argv: &[String], cwd: Option<&Path>, log: &SharedLog) -> Result<Vec<u8>> {
        let remote = match cwd {
            Some(dir) => {
                self.sync_cwd(dir, log)?;
                vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    format!("cd {REMOTE_WORKDIR} && {}", shell_join(argv)),
                ]
            }
            None => argv.to_vec(),
        };
        Ok(self.ssh(&remote, log)?)
    }

    fn fetch(&mut self, pattern: &str, dest: &Path, log: &SharedLog) -> Result<()> {
        std::fs::create_dir_all(dest)?;
        let mut argv: Vec<String> = vec!["scp".to_string()];
        argv.extend(SSH_OPTS.iter().map(|s| s.to_string()));
        // Artifacts land in the parent of the remote workdir, i.e. the SSH
        // user's home; the glob expands on the remote side.
        argv.push(format!("{}:{}", self.ssh_target(), pattern));
        argv.push(dest.to_string_lossy().into_owned());
        process::run(&RunRequest { argv, ..Default::default() }, log)?;
        Ok(())
    }
}

impl Drop for VmExecutor {
    fn drop(&mut self) {
        delete_server(&self.server_id);
    }
}

fn delete_server(server_id: &str) {
    let log = shared_log(NullLog);
    let req = RunRequest::new(["openstack", "server", "delete", "--wait", server_id]);
    if let Err(e) = process::run(&req, &log) {
        // Nothing more we can do from here; operators alert on leaked nodes.
        warn!(target: "aptforge::executor", server = server_id, error = %e, "failed to delete VM");
    }
}

/// Parses the first IP out of an `openstack server show -c addresses` value,
/// e.g. `private=10.0.0.5, 2001:db8::5`.
fn parse_first_address(addresses: &str) -> Option<String> {
    let after_net = addresses.split('=').nth(1)?;
    let first = after_net.split(',').next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(first.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_first_address_handles_openstack_format() {
        assert_eq!(
            parse_first_address("private=10.0.0.5, 2001:db8::5"),
            Some("10.0.0.5".to_string())
        );
        assert_eq!(parse_first_address("private=10.0.0.5"), Some("10.0.0.5".to_string()));
        assert_eq!(parse_first_address(""), None);
        assert_eq!(parse_first_address("private="), None);
    }
}

//! Environment-driven configuration.
//!
//! Every knob has a documented default and an `APTFORGE_*` override, read
//! once at startup. The executor kind and repository driver are selected
//! here and injected into the application context; nothing resolves drivers
//! at runtime by name.

use std::path::PathBuf;
use std::time::Duration;

/// Which build execution environment to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    /// Run builds in the orchestrating process's own environment.
    Local,
    /// Provision an ephemeral cloud VM per build.
    Vm,
    /// Run builds inside a container per build.
    Container,
}

impl ExecutorKind {
    fn parse(s: &str) -> Self {
        match s {
            "vm" => ExecutorKind::Vm,
            "container" => ExecutorKind::Container,
            _ => ExecutorKind::Local,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Private per-repository trees: `{repos_base_dir}/{owner}/{repo}`.
    pub repos_base_dir: PathBuf,

    /// Public per-repository trees: `{repos_public_dir}/{owner}/{repo}`.
    pub repos_public_dir: PathBuf,

    /// Mirror service base: `mirrors/{id}` and `snapshots/{id}` underneath.
    pub mirror_base_path: PathBuf,

    /// Scratch space for checkouts and build contexts.
    pub workspace_dir: PathBuf,

    /// Path of the persisted state file.
    pub state_file: PathBuf,

    /// Base URL under which public trees are served.
    pub base_url: String,

    /// Name of the lazily created default series.
    pub default_series: String,

    /// Distribution name written into generated changelog entries. Builds
    /// target this distribution regardless of what the source's own
    /// changelog claims.
    pub target_distribution: String,

    /// Maintainer identity for generated changelog entries.
    pub maintainer_name: String,
    pub maintainer_email: String,

    /// Build execution environment.
    pub executor: ExecutorKind,

    /// Number of job worker tasks.
    pub worker_count: usize,

    /// Period of the poll-all scheduler.
    pub poll_interval: Duration,

    /// Bounded wait for the repository tool's exclusive lock, in seconds.
    pub lock_wait_secs: u64,

    /// Identity recorded on builds handled by this node.
    pub node_name: String,

    /// VM executor: cloud image name.
    pub vm_image: String,
    /// VM executor: cloud flavor name.
    pub vm_flavor: String,
    /// VM executor: SSH login user.
    pub vm_ssh_user: String,
    /// VM executor: how long to wait for SSH readiness.
    pub vm_ready_timeout: Duration,

    /// Container executor: image to run builds in.
    pub container_image: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env_or(key, default))
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from the environment, with defaults.
    pub fn from_env() -> Self {
        let node_name = std::env::var("APTFORGE_NODE_NAME")
            .ok()
            .or_else(|| {
                std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty())
            })
            .unwrap_or_else(|| "localhost".to_string());

        Config {
            repos_base_dir: env_path("APTFORGE_REPOS_BASE_DIR", "/var/lib/aptforge/repos"),
            repos_public_dir: env_path("APTFORGE_REPOS_PUBLIC_DIR", "/srv/aptforge/public"),
            mirror_base_path: env_path("APTFORGE_MIRROR_BASE_PATH", "/srv/aptforge/mirrorsvc"),
            workspace_dir: env_path("APTFORGE_WORKSPACE_DIR", "/var/lib/aptforge/workspace"),
            state_file: env_path("APTFORGE_STATE_FILE", "/var/lib/aptforge/state.json"),
            base_url: env_or("APTFORGE_BASE_URL", "http://localhost/apt"),
            default_series: env_or("APTFORGE_DEFAULT_SERIES", "stable"),
            target_distribution: env_or("APTFORGE_DISTRIBUTION", "aptforge"),
            maintainer_name: env_or("APTFORGE_MAINTAINER_NAME", "aptforge"),
            maintainer_email: env_or("APTFORGE_MAINTAINER_EMAIL", "builds@aptforge.invalid"),
            executor: ExecutorKind::parse(&env_or("APTFORGE_EXECUTOR", "local")),
            worker_count: env_u64("APTFORGE_WORKERS", 4) as usize,
            poll_interval: Duration::from_secs(env_u64("APTFORGE_POLL_INTERVAL_SECS", 600)),
            lock_wait_secs: env_u64("APTFORGE_LOCK_WAIT_SECS", 60),
            node_name,
            vm_image: env_or("APTFORGE_VM_IMAGE", "debian-12-build"),
            vm_flavor: env_or("APTFORGE_VM_FLAVOR", "m1.small"),
            vm_ssh_user: env_or("APTFORGE_VM_SSH_USER", "debian"),
            vm_ready_timeout: Duration::from_secs(env_u64("APTFORGE_VM_READY_TIMEOUT_SECS", 600)),
            container_image: env_or("APTFORGE_CONTAINER_IMAGE", "debian:stable"),
        }
    }

    /// A configuration rooted under `base`, for tests and local development.
    pub fn rooted_at(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Config {
            repos_base_dir: base.join("repos"),
            repos_public_dir: base.join("public"),
            mirror_base_path: base.join("mirrorsvc"),
            workspace_dir: base.join("workspace"),
            state_file: base.join("state.json"),
            base_url: "http://localhost/apt".to_string(),
            default_series: "stable".to_string(),
            target_distribution: "aptforge".to_string(),
            maintainer_name: "aptforge".to_string(),
            maintainer_email: "builds@aptforge.invalid".to_string(),
            executor: ExecutorKind::Local,
            worker_count: 2,
            poll_interval: Duration::from_secs(600),
            lock_wait_secs: 60,
            node_name: "test-node".to_string(),
            vm_image: "debian-12-build".to_string(),
            vm_flavor: "m1.small".to_string(),
            vm_ssh_user: "debian".to_string(),
            vm_ready_timeout: Duration::from_secs(600),
            container_image: "debian:stable".to_string(),
        }
    }

    /// Maintainer string for changelog entries, `Name <email>`.
    pub fn maintainer(&self) -> String {
        format!("{} <{}>", self.maintainer_name, self.maintainer_email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maintainer_string_format() {
        let config = Config::rooted_at("/tmp/x");
        assert_eq!(config.maintainer(), "aptforge <builds@aptforge.invalid>");
    }

    #[test]
    fn executor_kind_parse_falls_back_to_local() {
        assert_eq!(ExecutorKind::parse("vm"), ExecutorKind::Vm);
        assert_eq!(ExecutorKind::parse("container"), ExecutorKind::Container);
        assert_eq!(ExecutorKind::parse("anything"), ExecutorKind::Local);
    }
}

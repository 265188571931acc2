//! Build orchestration.
//!
//! One call to [`run`] takes a source from its last seen revision to a
//! published package: counter increment, checkout, builder selection,
//! version computation, packaging metadata, source and binary builds inside
//! an executor, artifact classification, and publication through the
//! repository driver.
//!
//! Every build is tracked by a [`Build`](crate::types::Build) record guarded
//! by [`BuildGuard`]: whatever happens — error, panic, early return — the
//! record reaches a terminal state with a finish timestamp.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, instrument, warn};

use crate::builder::{self, PackageBuilder, PackageIdentity, changelog, select_builder};
use crate::context::AppContext;
use crate::executor::{Executor, ExecutorError, shell_quote};
use crate::gitcli;
use crate::logs::BuildLogFile;
use crate::process::{LogSink, ProcessError, SharedLog};
use crate::store::Store;
use crate::types::{
    ArtifactKind, Build, BuildArtifact, BuildId, BuildState, PackageSource, Repository, Series,
    Sha, SourceId,
};

use super::{Result, SourceError};

/// Finalizes a build record no matter how the build ends.
///
/// If the guard is dropped without an explicit [`finish`](Self::finish) —
/// an early `?` return, a panic in the handler — the build is finalized as
/// [`BuildState::FailedToBuild`], so no record is ever left dangling in a
/// non-terminal state.
pub struct BuildGuard {
    store: Arc<Store>,
    id: BuildId,
    finished: bool,
}

impl BuildGuard {
    pub fn new(store: Arc<Store>, id: BuildId) -> Self {
        BuildGuard {
            store,
            id,
            finished: false,
        }
    }

    /// Moves the build to `state` and disarms the guard.
    pub fn finish(mut self, state: BuildState) {
        self.finished = true;
        if let Err(e) = self.store.update_build(self.id, |b| b.finish(state)) {
            warn!(target: "aptforge::source", build = %self.id, error = %e, "cannot record build state");
        }
    }
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(target: "aptforge::source", build = %self.id, "build abandoned without terminal state");
        let _ = self
            .store
            .update_build(self.id, |b| b.finish(BuildState::FailedToBuild));
    }
}

/// Shares one [`BuildLogFile`] between the process-output streamer and the
/// orchestration code that relocates it once the version is known.
struct FileLog(Arc<Mutex<BuildLogFile>>);

impl LogSink for FileLog {
    fn line(&mut self, line: &str) {
        if let Ok(mut file) = self.0.lock() {
            file.line(line);
        }
    }
}

/// Builds a source at its last seen revision and publishes the result.
///
/// The build counter is incremented first and never reused; even a build
/// that fails immediately afterwards burns its counter value, keeping
/// version assignment monotonic.
#[instrument(skip(ctx), fields(source = %id))]
pub fn run(ctx: &AppContext, id: SourceId) -> Result<()> {
    let source = ctx.store.source(id)?;
    let sha = source
        .last_seen_sha
        .clone()
        .ok_or(SourceError::NoRevision(id))?;

    let counter = ctx.store.next_build_counter(id)?;
    let build = ctx
        .store
        .create_build(id, counter, sha.clone(), &ctx.config.node_name)?;
    let guard = BuildGuard::new(Arc::clone(&ctx.store), build.id);

    let repo = ctx.store.repository(source.repository)?;
    let public_dir = repo.public_dir(&ctx.config.repos_public_dir);
    let long_name = source.long_name();

    let log_file = Arc::new(Mutex::new(BuildLogFile::provisional(
        &public_dir,
        &long_name,
        counter,
    )?));
    let log: SharedLog = Arc::new(Mutex::new(FileLog(Arc::clone(&log_file))));

    ctx.store.update_build(build.id, |b| b.begin())?;
    info!(target: "aptforge::source", source = %id, build = %build.id, sha = %sha.short(), counter, "build started");

    let job = BuildJob {
        ctx,
        source: &source,
        repo: &repo,
        build: &build,
        sha: &sha,
        counter,
        long_name: &long_name,
        public_dir: &public_dir,
        log: &log,
        log_file: &log_file,
    };

    match job.execute() {
        Ok(state) => {
            info!(target: "aptforge::source", source = %id, build = %build.id, ?state, "build finished");
            guard.finish(state);
            Ok(())
        }
        Err(e) => {
            let state = classify_failure(&e);
            warn!(target: "aptforge::source", source = %id, build = %build.id, ?state, error = %e, "build failed");
            if let Ok(mut file) = log_file.lock() {
                file.line(&format!("build failed: {e}"));
            }
            guard.finish(state);
            Err(e)
        }
    }
}

/// Maps a build failure onto the terminal state recorded for it.
fn classify_failure(err: &SourceError) -> BuildState {
    match err {
        SourceError::Executor(ExecutorError::Provision { .. }) => BuildState::ChrootProblem,
        SourceError::Executor(ExecutorError::Process(ProcessError::Timeout { .. })) => {
            BuildState::ChrootProblem
        }
        SourceError::Repo(_) => BuildState::FailedToUpload,
        _ if failed_command_output(err).is_some_and(is_dependency_wait) => {
            BuildState::DependencyWait
        }
        _ => BuildState::FailedToBuild,
    }
}

/// Captured output of the failed command inside `err`, whichever subsystem
/// wrapped it. Commands run through an executor arrive wrapped in
/// [`ExecutorError::Process`], possibly under a builder error.
fn failed_command_output(err: &SourceError) -> Option<&str> {
    let process = match err {
        SourceError::Process(p) => p,
        SourceError::Executor(ExecutorError::Process(p)) => p,
        SourceError::Build(builder::BuildError::Process(p)) => p,
        SourceError::Build(builder::BuildError::Executor(ExecutorError::Process(p))) => p,
        _ => return None,
    };
    match process {
        ProcessError::CommandFailed { output, .. } => Some(output),
        _ => None,
    }
}

/// Whether command output indicates missing (not yet installable) build
/// dependencies, as opposed to a genuine build failure.
fn is_dependency_wait(output: &str) -> bool {
    output.contains("Unable to locate package")
        || output.contains("but it is not installable")
        || output.contains("but it is not going to be installed")
        || output.contains("Unmet build dependencies")
}

struct BuildJob<'a> {
    ctx: &'a AppContext,
    source: &'a PackageSource,
    repo: &'a Repository,
    build: &'a Build,
    sha: &'a Sha,
    counter: u64,
    long_name: &'a str,
    public_dir: &'a Path,
    log: &'a SharedLog,
    log_file: &'a Arc<Mutex<BuildLogFile>>,
}

impl BuildJob<'_> {
    /// Runs the pipeline to a successful terminal state; errors bubble to
    /// [`classify_failure`].
    fn execute(&self) -> Result<BuildState> {
        let build_dir = self
            .ctx
            .config
            .workspace_dir
            .join(format!("build-{}", self.build.id));
        // Scratch from an earlier attempt with the same id cannot exist
        // (ids are never reused), but a crashed run's directory might.
        if build_dir.exists() {
            std::fs::remove_dir_all(&build_dir)?;
        }
        std::fs::create_dir_all(&build_dir)?;

        let checkout = build_dir.join(checkout_dir_name(&self.source.url));
        gitcli::checkout_at(&self.source.url, self.sha, &checkout, self.log)?;

        let mut executor = self
            .ctx
            .executors
            .acquire(&format!("build-{}", self.build.id), self.log)?;

        let builder = select_builder(&checkout);
        info!(target: "aptforge::source", build = %self.build.id, kind = builder.kind(), "builder selected");

        let name = builder.package_name(executor.as_mut(), self.log)?;
        let native = builder.native_version(executor.as_mut(), self.log)?;
        let version = builder::version::compute_version(
            native.as_deref(),
            self.counter,
            self.source.last_built_version.as_deref(),
        );

        // Persist the identity before anything can fail: the next build's
        // version computation must see this one even if it never publishes.
        self.ctx
            .store
            .update_build(self.build.id, |b| b.version = Some(version.clone()))?;
        self.ctx
            .store
            .update_source(self.source.id, |s| s.record_built(&name, &version))?;

        if let Ok(mut file) = self.log_file.lock() {
            file.relocate(&BuildLogFile::final_path(
                self.public_dir,
                self.long_name,
                &version,
            ));
        }

        let identity = PackageIdentity {
            name: name.clone(),
            version: version.clone(),
            maintainer: self.ctx.config.maintainer(),
            build_dependencies: builder.build_dependencies(self.log)?,
            runtime_dependencies: builder.runtime_dependencies(self.log)?,
        };
        builder.populate_debian_dir(&identity)?;

        let entry = changelog::render_entry(
            &name,
            &version,
            &self.ctx.config.target_distribution,
            self.sha.as_str(),
            &identity.maintainer,
            chrono::Utc::now(),
        );
        changelog::prepend_entry(&checkout, &entry)?;

        self.prepare_apt_environment(executor.as_mut(), &checkout)?;

        builder.build_source_package(executor.as_mut(), self.log)?;
        builder.build_binary_packages(executor.as_mut(), self.log)?;

        fetch_artifacts(executor.as_mut(), &name, &build_dir, self.log)?;

        // The source may have moved on while this build ran; publishing a
        // stale revision would fight the build that replaced it.
        let current = self.ctx.store.source(self.source.id)?;
        if current.last_seen_sha.as_ref() != Some(self.sha) {
            info!(target: "aptforge::source", build = %self.build.id, "revision superseded during build, discarding artifacts");
            return Ok(BuildState::BuildForSupersededSource);
        }

        self.publish(&build_dir)?;
        Ok(BuildState::SuccessfullyBuilt)
    }

    /// Makes the repository's own series plus its declared external
    /// repositories resolvable inside the execution environment, then
    /// installs the tree's build dependencies.
    fn prepare_apt_environment(&self, executor: &mut dyn Executor, checkout: &Path) -> Result<()> {
        let lines = build_source_lines(self.repo, &self.series(), &self.ctx.config.base_url);
        if !lines.is_empty() {
            let content = lines.join("\n") + "\n";
            let write = format!(
                "printf '%s' {} | sudo tee /etc/apt/sources.list.d/aptforge-build.list >/dev/null",
                shell_quote(&content)
            );
            run_shell(executor, &write, self.log)?;
        }
        if let Some(key) = &self.repo.key_data {
            let write_key = format!(
                "printf '%s' {} | sudo tee /etc/apt/trusted.gpg.d/aptforge-build.asc >/dev/null",
                shell_quote(key)
            );
            run_shell(executor, &write_key, self.log)?;
        }
        run_argv(executor, &["sudo", "apt-get", "-q", "update"], None, self.log)?;

        // `build-dep ./` resolves the freshly rendered debian/control,
        // including virtual and versioned dependencies a plain install
        // cannot express. The executor maps the checkout path into its own
        // environment.
        run_argv(
            executor,
            &["sudo", "apt-get", "-q", "-y", "build-dep", "./"],
            Some(checkout),
            self.log,
        )?;
        Ok(())
    }

    fn series(&self) -> Series {
        self.ctx
            .store
            .series_for(self.repo.id)
            .into_iter()
            .find(|s| s.name == self.source.series)
            .unwrap_or_else(|| Series::new(self.repo.id, &self.source.series))
    }

    /// Publishes every changes file found among the fetched artifacts and
    /// records the produced packages on the build.
    fn publish(&self, build_dir: &Path) -> Result<()> {
        let scan = classify_artifacts(build_dir)?;
        if scan.changes.is_empty() {
            return Err(SourceError::Build(builder::BuildError::Validation {
                details: format!("no .changes file produced in {}", build_dir.display()),
            }));
        }
        let packages = scan.packages;
        self.ctx
            .store
            .update_build(self.build.id, |b| b.artifacts = packages)?;
        for path in scan.changes {
            self.ctx.driver.process_changes(
                self.repo.id,
                &self.source.series,
                &path,
                self.log,
            )?;
        }
        Ok(())
    }
}

/// Directory name for a checkout, taken from the remote URL's final path
/// component. This becomes the fallback package name for trees without any
/// packaging metadata of their own.
pub(crate) fn checkout_dir_name(url: &str) -> String {
    let tail = url.trim_end_matches('/').rsplit('/').next().unwrap_or(url);
    let tail = tail.strip_suffix(".git").unwrap_or(tail);
    if tail.is_empty() {
        "source".to_string()
    } else {
        tail.to_string()
    }
}

/// sources.list lines made available inside the build environment: the
/// series' own repository (trusted, since its key may not exist yet inside
/// the environment) plus the series' declared external lines.
pub(crate) fn build_source_lines(repo: &Repository, series: &Series, base_url: &str) -> Vec<String> {
    let mut lines = vec![series.binary_source_line(repo, base_url, true)];
    lines.extend(series.external_dependencies.iter().cloned());
    lines
}

/// Pulls build artifacts out of the executor into `build_dir`.
///
/// `dpkg-buildpackage` writes to the parent of the build tree, which is
/// `build_dir` locally and the remote home directory on a VM. The primary
/// `{name}_*` pattern covers the source package, changes files, and
/// same-named binaries; extra binary packages are fetched best-effort.
fn fetch_artifacts(
    executor: &mut dyn Executor,
    name: &str,
    build_dir: &Path,
    log: &SharedLog,
) -> Result<()> {
    executor.fetch(&format!("{name}_*"), build_dir, log)?;
    for pattern in ["*.deb", "*.ddeb"] {
        if let Err(e) = executor.fetch(pattern, build_dir, log) {
            debug!(target: "aptforge::source", pattern, error = %e, "no extra artifacts matched");
        }
    }
    Ok(())
}

/// Fetched artifacts split by role: the changes files driving publication,
/// in stable order with source uploads before binary uploads, and the
/// package metadata records kept on the build.
struct ArtifactScan {
    changes: Vec<PathBuf>,
    packages: Vec<BuildArtifact>,
}

fn classify_artifacts(build_dir: &Path) -> std::io::Result<ArtifactScan> {
    let mut changes = Vec::new();
    let mut packages = Vec::new();
    for entry in std::fs::read_dir(build_dir)? {
        let path = entry?.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
        else {
            continue;
        };
        match path.extension().and_then(|e| e.to_str()) {
            Some("changes") => changes.push(path),
            Some("dsc") => packages.push(BuildArtifact {
                file_name,
                kind: ArtifactKind::Source,
            }),
            Some("deb") | Some("ddeb") => packages.push(BuildArtifact {
                file_name,
                kind: ArtifactKind::Binary,
            }),
            _ => {
                debug!(target: "aptforge::source", artifact = %path.display(), "artifact fetched");
            }
        }
    }
    changes.sort_by_key(|p| {
        let name = p.file_name().map(|n| n.to_string_lossy().into_owned());
        (
            !name
                .as_deref()
                .map(|n| n.ends_with("_source.changes"))
                .unwrap_or(false),
            name,
        )
    });
    packages.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(ArtifactScan { changes, packages })
}

fn run_shell(executor: &mut dyn Executor, script: &str, log: &SharedLog) -> Result<()> {
    run_argv(executor, &["sh", "-c", script], None, log)
}

fn run_argv(
    executor: &mut dyn Executor,
    argv: &[&str],
    cwd: Option<&Path>,
    log: &SharedLog,
) -> Result<()> {
    let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
    executor.run_cmd(&argv, cwd, log)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn provision_failures_count_as_chroot_problems() {
        let err = SourceError::Executor(ExecutorError::Provision {
            details: "quota exceeded".to_string(),
        });
        assert_eq!(classify_failure(&err), BuildState::ChrootProblem);

        let timeout = SourceError::Executor(ExecutorError::Process(ProcessError::Timeout {
            what: "SSH readiness".to_string(),
            timeout: std::time::Duration::from_secs(1),
        }));
        assert_eq!(classify_failure(&timeout), BuildState::ChrootProblem);
    }

    #[test]
    fn missing_dependencies_wait_instead_of_failing() {
        // apt-get build-dep failures reach classification wrapped by the
        // executor that ran them.
        let apt = SourceError::Executor(ExecutorError::Process(ProcessError::CommandFailed {
            argv: "sudo apt-get -q -y build-dep ./".to_string(),
            code: Some(100),
            output: "E: Unable to locate package libwidget-dev".to_string(),
        }));
        assert_eq!(classify_failure(&apt), BuildState::DependencyWait);

        // dpkg-buildpackage failures carry a builder wrap around the
        // executor wrap.
        let dpkg = SourceError::Build(builder::BuildError::Executor(ExecutorError::Process(
            ProcessError::CommandFailed {
                argv: "dpkg-buildpackage -b -us -uc -d".to_string(),
                code: Some(3),
                output: "dpkg-checkbuilddeps: error: Unmet build dependencies: libfoo-dev"
                    .to_string(),
            },
        )));
        assert_eq!(classify_failure(&dpkg), BuildState::DependencyWait);

        // Unwrapped process failures classify the same way.
        let bare = SourceError::Process(ProcessError::CommandFailed {
            argv: "sudo apt-get build-dep ./".to_string(),
            code: Some(100),
            output: "libwidget-dev : Depends: libc6 but it is not installable".to_string(),
        });
        assert_eq!(classify_failure(&bare), BuildState::DependencyWait);
    }

    #[test]
    fn publish_failures_are_failed_to_upload() {
        let err = SourceError::Repo(crate::repodrv::RepoError::Io(std::io::Error::other("disk")));
        assert_eq!(classify_failure(&err), BuildState::FailedToUpload);
    }

    #[test]
    fn plain_command_failures_are_failed_to_build() {
        let err = SourceError::Executor(ExecutorError::Process(ProcessError::CommandFailed {
            argv: "dpkg-buildpackage".to_string(),
            code: Some(2),
            output: "error: widget.c:12: expected ';'".to_string(),
        }));
        assert_eq!(classify_failure(&err), BuildState::FailedToBuild);
    }

    #[test]
    fn changes_files_sort_source_upload_first() {
        let dir = tempdir().unwrap();
        for name in [
            "widget_1.0+1_amd64.changes",
            "widget_1.0+1_source.changes",
            "widget_1.0+1.dsc",
            "widget_1.0+1_amd64.deb",
            "widget_1.0+1.tar.xz",
        ] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }

        let scan = classify_artifacts(dir.path()).unwrap();
        let names: Vec<_> = scan
            .changes
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["widget_1.0+1_source.changes", "widget_1.0+1_amd64.changes"]
        );
    }

    #[test]
    fn produced_packages_become_metadata_records() {
        let dir = tempdir().unwrap();
        for name in [
            "widget_1.0+1.dsc",
            "widget_1.0+1_amd64.deb",
            "widget-dbgsym_1.0+1_amd64.ddeb",
            "widget_1.0+1_amd64.changes",
            "widget_1.0+1.tar.xz",
        ] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }

        let scan = classify_artifacts(dir.path()).unwrap();
        assert_eq!(
            scan.packages,
            vec![
                BuildArtifact {
                    file_name: "widget-dbgsym_1.0+1_amd64.ddeb".to_string(),
                    kind: ArtifactKind::Binary,
                },
                BuildArtifact {
                    file_name: "widget_1.0+1.dsc".to_string(),
                    kind: ArtifactKind::Source,
                },
                BuildArtifact {
                    file_name: "widget_1.0+1_amd64.deb".to_string(),
                    kind: ArtifactKind::Binary,
                },
            ]
        );
    }

    #[test]
    fn artifact_records_persist_on_the_build() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("state.json")).unwrap();
        let repo = store.create_repository("alice", "tools").unwrap();
        let source = store
            .create_source(repo.id, "stable", "https://git.example.com/w.git", "main")
            .unwrap();
        let build = store
            .create_build(source.id, 1, Sha::new("a".repeat(40)), "node-1")
            .unwrap();

        store
            .update_build(build.id, |b| {
                b.artifacts = vec![BuildArtifact {
                    file_name: "widget_1.0+1.dsc".to_string(),
                    kind: ArtifactKind::Source,
                }];
            })
            .unwrap();

        let build = store.build(build.id).unwrap();
        assert_eq!(
            build.artifacts,
            vec![BuildArtifact {
                file_name: "widget_1.0+1.dsc".to_string(),
                kind: ArtifactKind::Source,
            }]
        );
    }
}

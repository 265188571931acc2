//! reprepro-backed repository driver.
//!
//! The private tree holds reprepro's configuration and index database plus
//! the GPG home; the public tree receives exported metadata and the pool.
//! All reprepro invocations use a bounded `--waitforlock` so concurrent
//! mutations of one repository queue up instead of failing immediately,
//! while a wedged lock still surfaces as a command failure rather than a
//! busy-loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::process::{self, ProcessError, RunRequest, SharedLog};
use crate::sign::SignatureStore;
use crate::store::Store;
use crate::types::{Repository, RepositoryId, Series};

use super::{RepoError, RepositoryDriver, Result};

pub struct RepreproDriver {
    store: Arc<Store>,
    signatures: SignatureStore,
    repos_base_dir: PathBuf,
    repos_public_dir: PathBuf,
    default_series: String,
    lock_wait_secs: u64,
}

impl RepreproDriver {
    pub fn new(store: Arc<Store>, config: &Config) -> Self {
        RepreproDriver {
            signatures: SignatureStore::new(Arc::clone(&store), config),
            store,
            repos_base_dir: config.repos_base_dir.clone(),
            repos_public_dir: config.repos_public_dir.clone(),
            default_series: config.default_series.clone(),
            lock_wait_secs: config.lock_wait_secs,
        }
    }

    /// Ensures series, key, scaffold, and public key exist; returns the
    /// up-to-date repository record.
    fn ensure_ready(&self, id: RepositoryId, log: &SharedLog) -> Result<Repository> {
        self.store.ensure_default_series(id, &self.default_series)?;
        let repo = self.signatures.ensure_key(id, log)?;
        self.write_scaffold(&repo)?;
        self.signatures.export_public_key(&repo)?;
        Ok(repo)
    }

    /// Renders `conf/distributions` and `conf/options` for a repository.
    ///
    /// Rendering is deterministic from the repository record, so calling it
    /// repeatedly with unchanged state rewrites identical bytes.
    fn write_scaffold(&self, repo: &Repository) -> Result<()> {
        let private = repo.private_dir(&self.repos_base_dir);
        let conf = private.join("conf");
        std::fs::create_dir_all(&conf)?;

        let series = self.store.series_for(repo.id);
        std::fs::write(
            conf.join("distributions"),
            render_distributions(repo, &series),
        )?;

        let public = repo.public_dir(&self.repos_public_dir);
        std::fs::create_dir_all(&public)?;
        std::fs::write(
            conf.join("options"),
            format!("outdir {}\n", public.display()),
        )?;
        Ok(())
    }

    fn reprepro(&self, repo: &Repository, args: &[&str]) -> RunRequest {
        let private = repo.private_dir(&self.repos_base_dir);
        let mut argv = vec![
            "reprepro".to_string(),
            format!("--waitforlock={}", self.lock_wait_secs),
            "-b".to_string(),
            private.to_string_lossy().into_owned(),
        ];
        argv.extend(args.iter().map(|s| s.to_string()));
        RunRequest {
            argv,
            ..Default::default()
        }
        .env(
            "GNUPGHOME",
            self.signatures.gpg_home(repo).to_string_lossy().into_owned(),
        )
    }
}

impl RepositoryDriver for RepreproDriver {
    fn export(&self, repository: RepositoryId, log: &SharedLog) -> Result<()> {
        let repo = self.ensure_ready(repository, log)?;
        process::run(&self.reprepro(&repo, &["export"]), log)?;
        info!(target: "aptforge::repodrv", repository = %repository, "metadata exported");
        Ok(())
    }

    fn process_changes(
        &self,
        repository: RepositoryId,
        series: &str,
        changes_path: &Path,
        log: &SharedLog,
    ) -> Result<()> {
        let repo = self.ensure_ready(repository, log)?;

        // Debug-symbol packages are not distributed; strip their file
        // references before reprepro validates the manifest.
        let changes = std::fs::read_to_string(changes_path)?;
        let stripped = strip_dbgsym_references(&changes);
        if stripped != changes {
            std::fs::write(changes_path, &stripped)?;
        }

        // This system builds for one configured distribution regardless of
        // what the source's own changelog claims.
        let include = self.reprepro(
            &repo,
            &[
                "--ignore=wrongdistribution",
                "include",
                series,
                &changes_path.to_string_lossy(),
            ],
        );
        match process::run(&include, log) {
            Ok(_) => {}
            Err(e) if is_duplicate_version(&e) => {
                // Soft skip: the series already has this version.
                info!(target: "aptforge::repodrv", repository = %repository, series, "version already present, skipping include");
                return Ok(());
            }
            Err(e) => return Err(RepoError::Process(e)),
        }

        self.export(repository, log)
    }

    fn remove_source_package(
        &self,
        repository: RepositoryId,
        series: &str,
        package: &str,
        log: &SharedLog,
    ) -> Result<()> {
        let repo = self.ensure_ready(repository, log)?;
        let req = self.reprepro(&repo, &["removesrc", series, package]);
        if let Err(e) = process::run(&req, log) {
            // Best effort: the package may never have been published.
            warn!(target: "aptforge::repodrv", repository = %repository, package, error = %e, "removesrc failed");
            return Ok(());
        }
        self.export(repository, log)
    }

    fn delete_repository_trees(&self, repository: &Repository) -> Result<()> {
        for dir in [
            repository.private_dir(&self.repos_base_dir),
            repository.public_dir(&self.repos_public_dir),
        ] {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Renders the reprepro distributions file, one stanza per series.
fn render_distributions(repo: &Repository, series: &[Series]) -> String {
    let mut out = String::new();
    for s in series {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!(
            "Origin: {owner}/{name}\n\
             Label: {owner}/{name}\n\
             Codename: {series}\n\
             Architectures: amd64 arm64 source\n\
             Components: main\n\
             Description: packages built from registered sources\n",
            owner = repo.owner,
            name = repo.name,
            series = s.name,
        ));
        if let Some(key_id) = &repo.key_id {
            out.push_str(&format!("SignWith: {key_id}\n"));
        }
    }
    out
}

/// Drops debug-symbol package references from a changes file.
///
/// Entries in `Files:` and `Checksums-*:` sections that reference `.ddeb`
/// artifacts or `-dbgsym_` packages are removed; everything else is kept
/// byte-for-byte.
fn strip_dbgsym_references(changes: &str) -> String {
    let mut out = Vec::new();
    for line in changes.lines() {
        let is_continuation = line.starts_with(' ');
        let refers_to_dbgsym = {
            let file = line.split_whitespace().last().unwrap_or("");
            file.ends_with(".ddeb") || file.contains("-dbgsym_")
        };
        if is_continuation && refers_to_dbgsym {
            continue;
        }
        out.push(line);
    }
    let mut result = out.join("\n");
    if changes.ends_with('\n') {
        result.push('\n');
    }
    result
}

/// Whether a failed include means the version is already present.
fn is_duplicate_version(err: &ProcessError) -> bool {
    match err {
        ProcessError::CommandFailed { output, .. } => {
            output.contains("already registered with different checksums")
                || output.contains("Already this version")
                || output.contains("newer version")
        }
        _ => false,
    }
}

//! GPG key material per repository.
//!
//! Each repository gets its own GPG home under its private tree and one
//! keypair, generated lazily on first use. The public half is exported to
//! `repo.key` in the public tree exactly once; key rotation is not
//! supported, so an existing `repo.key` is never overwritten.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::process::{self, ProcessError, RunRequest, SharedLog};
use crate::store::{Store, StoreError};
use crate::types::{Repository, RepositoryId};

/// Errors from signature-store operations.
#[derive(Debug, Error)]
pub enum SignError {
    /// A gpg invocation failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// gpg produced output we could not find a key id in.
    #[error("no secret key found in gpg listing")]
    NoKeyGenerated,
}

/// Result type for signing operations.
pub type Result<T> = std::result::Result<T, SignError>;

/// Manages one GPG keypair per repository.
pub struct SignatureStore {
    store: Arc<Store>,
    repos_base_dir: PathBuf,
    repos_public_dir: PathBuf,
}

impl SignatureStore {
    pub fn new(store: Arc<Store>, config: &Config) -> Self {
        SignatureStore {
            store,
            repos_base_dir: config.repos_base_dir.clone(),
            repos_public_dir: config.repos_public_dir.clone(),
        }
    }

    /// GPG home directory for a repository's key material.
    pub fn gpg_home(&self, repo: &Repository) -> PathBuf {
        repo.private_dir(&self.repos_base_dir).join("gpghome")
    }

    /// Ensures the repository has a keypair and cached public key material.
    ///
    /// Generates a key with batch parameters derived from the repository
    /// identity when `key_id` is unset; exports and caches the armored
    /// public key when `key_data` is unset. Returns the up-to-date record.
    pub fn ensure_key(&self, id: RepositoryId, log: &SharedLog) -> Result<Repository> {
        let mut repo = self.store.repository(id)?;
        let home = self.gpg_home(&repo);
        std::fs::create_dir_all(&home)?;
        restrict_permissions(&home)?;

        if repo.key_id.is_none() {
            let batch = keygen_batch(&repo);
            let req = gpg_request(&home, ["--gen-key"]).stdin(batch.into_bytes());
            process::run(&req, log)?;

            let listing_req = gpg_request(&home, ["--list-secret-keys", "--with-colons"]);
            let listing = process::run_stdout(&listing_req, log)?;
            let key_id = parse_secret_key_id(&listing).ok_or(SignError::NoKeyGenerated)?;
            info!(target: "aptforge::sign", repository = %id, key_id, "generated signing key");
            repo = self.store.update_repository(id, |r| r.key_id = Some(key_id))?;
        }

        if repo.key_data.is_none() {
            let key_id = repo.key_id.clone().ok_or(SignError::NoKeyGenerated)?;
            let req = gpg_request(&home, ["--armor", "--export", key_id.as_str()]);
            let armored = process::run_stdout(&req, log)?;
            repo = self.store.update_repository(id, |r| r.key_data = Some(armored))?;
        }

        Ok(repo)
    }

    /// Writes the armored public key to `{public}/repo.key`.
    ///
    /// A no-op when the file already exists: the published key is immutable.
    pub fn export_public_key(&self, repo: &Repository) -> Result<()> {
        let Some(key_data) = &repo.key_data else {
            return Err(SignError::NoKeyGenerated);
        };
        let public_dir = repo.public_dir(&self.repos_public_dir);
        let key_path = public_dir.join("repo.key");
        if key_path.exists() {
            return Ok(());
        }
        std::fs::create_dir_all(&public_dir)?;
        std::fs::write(&key_path, key_data)?;
        Ok(())
    }
}

fn gpg_request<I, S>(home: &Path, args: I) -> RunRequest
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut argv = vec![
        "gpg".to_string(),
        "--homedir".to_string(),
        home.to_string_lossy().into_owned(),
        "--batch".to_string(),
        "--no-tty".to_string(),
    ];
    argv.extend(args.into_iter().map(Into::into));
    RunRequest {
        argv,
        ..Default::default()
    }
}

/// Batch keygen parameters derived from the repository identity: the owner
/// is the UID name, the repository name the UID comment.
fn keygen_batch(repo: &Repository) -> String {
    format!(
        "%no-protection\n\
         Key-Type: RSA\n\
         Key-Length: 2048\n\
         Name-Real: {owner}\n\
         Name-Comment: {name}\n\
         Name-Email: {owner}@aptforge.invalid\n\
         Expire-Date: 0\n\
         %commit\n",
        owner = repo.owner,
        name = repo.name,
    )
}

/// Extracts the key id from `gpg --list-secret-keys --with-colons` output
/// (field 5 of the first `sec` record).
fn parse_secret_key_id(listing: &str) -> Option<String> {
    listing
        .lines()
        .find(|line| line.starts_with("sec:"))
        .and_then(|line| line.split(':').nth(4))
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string())
}

#[cfg(unix)]
fn restrict_permissions(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn restrict_permissions(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

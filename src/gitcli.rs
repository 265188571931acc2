//! Thin helpers over the git CLI.
//!
//! All git interaction goes through the CLI with a clean environment: system
//! and user configuration are disabled for reproducible behavior across
//! machines, and terminal prompts are off so a misconfigured remote fails
//! fast instead of hanging a worker.

use std::path::Path;

use crate::process::{self, ProcessError, RunRequest, SharedLog};
use crate::types::Sha;

/// Base request for a git invocation with a clean environment.
fn git_request<I, S>(args: I) -> RunRequest
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut argv = vec!["git".to_string()];
    argv.extend(args.into_iter().map(Into::into));
    RunRequest {
        argv,
        ..Default::default()
    }
    .env("GIT_CONFIG_NOSYSTEM", "1")
    .env("GIT_CONFIG_GLOBAL", "/dev/null")
    .env("GIT_TERMINAL_PROMPT", "0")
}

/// Resolves the head of `branch` on `url` via `git ls-remote`.
///
/// Returns `None` when the remote is reachable but has no such branch.
pub fn ls_remote(url: &str, branch: &str, log: &SharedLog) -> Result<Option<Sha>, ProcessError> {
    let refspec = format!("refs/heads/{branch}");
    let req = git_request(["ls-remote", url, refspec.as_str()]);
    let out = process::run_stdout(&req, log)?;
    // Output line: "<sha>\trefs/heads/<branch>"
    Ok(out
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().next())
        .map(Sha::new))
}

/// Clones `url` into `dest` and hard-resets to the exact `sha`.
///
/// The reset guarantees the build sees the polled commit even if the branch
/// has moved since the poll.
pub fn checkout_at(url: &str, sha: &Sha, dest: &Path, log: &SharedLog) -> Result<(), ProcessError> {
    let dest_str = dest.to_string_lossy().into_owned();
    process::run(&git_request(["clone", url, dest_str.as_str()]), log)?;
    let reset = git_request(["reset", "--hard", sha.as_str()]).cwd(dest);
    process::run(&reset, log)?;
    Ok(())
}

/// Returns the SHA of `HEAD` in a checked-out tree.
pub fn rev_parse_head(workdir: &Path, log: &SharedLog) -> Result<Sha, ProcessError> {
    let req = git_request(["rev-parse", "HEAD"]).cwd(workdir);
    Ok(Sha::new(process::run_stdout(&req, log)?))
}

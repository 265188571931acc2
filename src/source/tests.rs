use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;

use crate::process::{self, NullLog, RunRequest, shared_log};
use crate::store::Store;
use crate::types::{BuildState, PollOutcome, RepositoryId, Sha, SourceId};

use super::build::{BuildGuard, build_source_lines, checkout_dir_name};
use super::poll;

fn git(args: &[&str], cwd: &Path) {
    let log = shared_log(NullLog);
    let mut argv = vec!["git".to_string()];
    argv.extend(args.iter().map(|s| s.to_string()));
    let req = RunRequest {
        argv,
        ..Default::default()
    }
    .cwd(cwd)
    .env("GIT_CONFIG_NOSYSTEM", "1")
    .env("GIT_CONFIG_GLOBAL", "/dev/null");
    process::run(&req, &log).unwrap();
}

fn commit(dir: &Path, file: &str) {
    std::fs::write(dir.join(file), file).unwrap();
    git(&["add", file], dir);
    git(
        &[
            "-c",
            "user.name=test",
            "-c",
            "user.email=test@example.com",
            "commit",
            "-m",
            file,
        ],
        dir,
    );
}

fn fixture_repo(dir: &Path) {
    git(&["init", "--initial-branch", "main", "."], dir);
    commit(dir, "README");
}

/// A store with one repository and one source pointing at `url`.
fn store_with_source(state_dir: &Path, url: &str) -> (Arc<Store>, SourceId) {
    let store = Arc::new(Store::open(state_dir.join("state.json")).unwrap());
    let repo = store.create_repository("alice", "tools").unwrap();
    let source = store
        .create_source(repo.id, "stable", url, "main")
        .unwrap();
    (store, source.id)
}

#[test]
fn first_poll_reports_change_and_persists_sha() {
    let origin = tempdir().unwrap();
    fixture_repo(origin.path());
    let state = tempdir().unwrap();
    let url = origin.path().to_string_lossy().into_owned();
    let (store, id) = store_with_source(state.path(), &url);

    let outcome = poll(&store, id).unwrap();
    assert!(outcome.is_changed());

    let source = store.source(id).unwrap();
    match outcome {
        PollOutcome::Changed { sha } => assert_eq!(source.last_seen_sha, Some(sha)),
        PollOutcome::NoChange => panic!("expected change"),
    }
}

#[test]
fn unchanged_head_polls_quiet_until_new_commit() {
    let origin = tempdir().unwrap();
    fixture_repo(origin.path());
    let state = tempdir().unwrap();
    let url = origin.path().to_string_lossy().into_owned();
    let (store, id) = store_with_source(state.path(), &url);

    assert!(poll(&store, id).unwrap().is_changed());
    assert_eq!(poll(&store, id).unwrap(), PollOutcome::NoChange);

    commit(origin.path(), "second");
    assert!(poll(&store, id).unwrap().is_changed());
}

#[test]
fn unreachable_remote_disables_source() {
    let state = tempdir().unwrap();
    let missing = state.path().join("no-such-repo");
    let (store, id) = store_with_source(state.path(), &missing.to_string_lossy());

    assert_eq!(poll(&store, id).unwrap(), PollOutcome::NoChange);

    let source = store.source(id).unwrap();
    assert!(source.disabled);
    assert!(source.last_failure.is_some());
    assert!(source.last_failure_at.is_some());
    assert_eq!(source.last_seen_sha, None);
}

#[test]
fn missing_branch_disables_source() {
    let origin = tempdir().unwrap();
    fixture_repo(origin.path());
    let state = tempdir().unwrap();
    let url = origin.path().to_string_lossy().into_owned();

    let store = Arc::new(Store::open(state.path().join("state.json")).unwrap());
    let repo = store.create_repository("alice", "tools").unwrap();
    let source = store
        .create_source(repo.id, "stable", &url, "does-not-exist")
        .unwrap();

    assert_eq!(poll(&store, source.id).unwrap(), PollOutcome::NoChange);
    let source = store.source(source.id).unwrap();
    assert!(source.disabled);
    assert!(source.last_failure.unwrap().contains("does-not-exist"));
}

#[test]
fn disabled_source_is_not_contacted() {
    let state = tempdir().unwrap();
    // A URL that would fail if contacted; a disabled source must not even try.
    let (store, id) = store_with_source(state.path(), "/nonexistent/origin");
    store
        .update_source(id, |s| s.record_poll_failure("earlier failure"))
        .unwrap();

    assert_eq!(poll(&store, id).unwrap(), PollOutcome::NoChange);
    let source = store.source(id).unwrap();
    assert_eq!(source.last_failure.as_deref(), Some("earlier failure"));
}

#[test]
fn clearing_failure_makes_source_pollable_again() {
    let origin = tempdir().unwrap();
    fixture_repo(origin.path());
    let state = tempdir().unwrap();
    let url = origin.path().to_string_lossy().into_owned();
    let (store, id) = store_with_source(state.path(), &url);

    store
        .update_source(id, |s| s.record_poll_failure("transient"))
        .unwrap();
    assert_eq!(poll(&store, id).unwrap(), PollOutcome::NoChange);

    store.update_source(id, |s| s.clear_failure()).unwrap();
    assert!(poll(&store, id).unwrap().is_changed());
}

fn build_fixture(state_dir: &Path) -> (Arc<Store>, crate::types::BuildId) {
    let (store, source_id) = store_with_source(state_dir, "https://git.example.com/w.git");
    let counter = store.next_build_counter(source_id).unwrap();
    let build = store
        .create_build(source_id, counter, Sha::new("a".repeat(40)), "node-1")
        .unwrap();
    (store, build.id)
}

#[test]
fn dropped_guard_finalizes_as_failed() {
    let state = tempdir().unwrap();
    let (store, build_id) = build_fixture(state.path());

    {
        let _guard = BuildGuard::new(Arc::clone(&store), build_id);
        // Dropped without finish, as after a panic or early return.
    }

    let build = store.build(build_id).unwrap();
    assert_eq!(build.state, BuildState::FailedToBuild);
    assert!(build.finished_at.is_some());
}

#[test]
fn explicit_finish_wins_over_guard_drop() {
    let state = tempdir().unwrap();
    let (store, build_id) = build_fixture(state.path());

    let guard = BuildGuard::new(Arc::clone(&store), build_id);
    guard.finish(BuildState::SuccessfullyBuilt);

    let build = store.build(build_id).unwrap();
    assert_eq!(build.state, BuildState::SuccessfullyBuilt);
}

#[test]
fn checkout_dir_name_from_url() {
    assert_eq!(checkout_dir_name("https://git.example.com/alice/widget.git"), "widget");
    assert_eq!(checkout_dir_name("https://git.example.com/alice/widget"), "widget");
    assert_eq!(checkout_dir_name("https://git.example.com/alice/widget/"), "widget");
    assert_eq!(checkout_dir_name(""), "source");
}

#[test]
fn build_sources_include_own_series_and_externals() {
    let repo = crate::types::Repository::new(RepositoryId(1), "alice", "tools");
    let mut series = crate::types::Series::new(repo.id, "stable");
    series
        .external_dependencies
        .push("deb http://deb.debian.org/debian bookworm main".to_string());

    let lines = build_source_lines(&repo, &series, "https://apt.example.com");
    assert_eq!(
        lines,
        vec![
            "deb [trusted=yes] https://apt.example.com/alice/tools stable main".to_string(),
            "deb http://deb.debian.org/debian bookworm main".to_string(),
        ]
    );
}

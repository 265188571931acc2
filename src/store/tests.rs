//! Store invariant tests: counter monotonicity, refresh mutual exclusion,
//! snapshot trigger edges, and durability across reopen.

use std::sync::Arc;

use tempfile::tempdir;

use super::{Store, StoreError};
use crate::types::{BuildState, Sha};

fn open_store(dir: &tempfile::TempDir) -> Store {
    Store::open(dir.path().join("state.json")).unwrap()
}

#[test]
fn repository_owner_name_unique() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);

    store.create_repository("alice", "tools").unwrap();
    let err = store.create_repository("alice", "tools").unwrap_err();
    assert!(matches!(err, StoreError::DuplicateRepository { .. }));

    // Same name under another owner is fine.
    store.create_repository("bob", "tools").unwrap();
}

#[test]
fn default_series_created_lazily_and_only_once() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let repo = store.create_repository("alice", "tools").unwrap();

    assert!(store.series_for(repo.id).is_empty());
    let first = store.ensure_default_series(repo.id, "stable").unwrap();
    assert_eq!(first.name, "stable");

    // A second call returns the existing series rather than appending.
    store.ensure_default_series(repo.id, "unstable").unwrap();
    let all = store.series_for(repo.id);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "stable");
}

#[test]
fn build_counter_increases_monotonically_under_concurrency() {
    let dir = tempdir().unwrap();
    let store = Arc::new(open_store(&dir));
    let repo = store.create_repository("alice", "tools").unwrap();
    let source = store
        .create_source(repo.id, "stable", "https://git.example.com/w.git", "main")
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        let id = source.id;
        handles.push(std::thread::spawn(move || {
            (0..5).map(|_| store.next_build_counter(id).unwrap()).collect::<Vec<_>>()
        }));
    }
    let mut counters: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    counters.sort_unstable();

    // 40 increments yield exactly 1..=40 with no duplicates or gaps.
    assert_eq!(counters, (1..=40).collect::<Vec<_>>());
    assert_eq!(store.source(source.id).unwrap().build_counter, 40);
}

#[test]
fn refresh_flag_is_won_by_exactly_one_caller() {
    let dir = tempdir().unwrap();
    let store = Arc::new(open_store(&dir));
    let mirror = store
        .create_mirror("alice", "http://deb.debian.org/debian", "bookworm", "main")
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = Arc::clone(&store);
        let id = mirror.id;
        handles.push(std::thread::spawn(move || store.try_begin_refresh(id).unwrap()));
    }
    let wins: usize = handles
        .into_iter()
        .map(|h| h.join().unwrap() as usize)
        .sum();
    assert_eq!(wins, 1);

    store.end_refresh(mirror.id).unwrap();
    assert!(!store.mirror(mirror.id).unwrap().refresh_in_progress);
    // After clearing, the flag can be won again.
    assert!(store.try_begin_refresh(mirror.id).unwrap());
}

#[test]
fn snapshot_tag_update_preserves_contents() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let set = store.create_mirror_set("alice", "deps").unwrap();
    let snapshot = store.create_snapshot(set.id).unwrap();

    let tagged = store
        .update_snapshot(snapshot.id, |tags| {
            tags.insert("prod-2026-08".to_string());
        })
        .unwrap();
    assert_eq!(tagged.created_at, snapshot.created_at);
    assert_eq!(tagged.mirror_set, snapshot.mirror_set);
    assert!(tagged.tags.contains("prod-2026-08"));
}

#[test]
fn builds_are_ordered_by_start_time_and_never_deleted() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let repo = store.create_repository("alice", "tools").unwrap();
    let source = store
        .create_source(repo.id, "stable", "https://git.example.com/w.git", "main")
        .unwrap();

    let b1 = store
        .create_build(source.id, 1, Sha::new("a".repeat(40)), "node-1")
        .unwrap();
    let b2 = store
        .create_build(source.id, 2, Sha::new("b".repeat(40)), "node-1")
        .unwrap();

    store
        .update_build(b1.id, |b| b.finish(BuildState::FailedToBuild))
        .unwrap();

    let builds = store.builds_for(source.id);
    assert_eq!(builds.len(), 2);
    assert_eq!(builds[0].id, b1.id);
    assert_eq!(builds[1].id, b2.id);
}

#[test]
fn state_survives_reopen() {
    let dir = tempdir().unwrap();
    let repo_id = {
        let store = open_store(&dir);
        let repo = store.create_repository("alice", "tools").unwrap();
        store.ensure_default_series(repo.id, "stable").unwrap();
        repo.id
    };

    let store = open_store(&dir);
    let repo = store.repository(repo_id).unwrap();
    assert_eq!(repo.owner, "alice");
    assert_eq!(store.series_for(repo_id)[0].name, "stable");
}

#[test]
fn deleting_source_returns_record_for_purge() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let repo = store.create_repository("alice", "tools").unwrap();
    let source = store
        .create_source(repo.id, "stable", "https://git.example.com/w.git", "main")
        .unwrap();
    store
        .update_source(source.id, |s| s.record_built("widget", "1.0+1"))
        .unwrap();

    let deleted = store.delete_source(source.id).unwrap();
    assert_eq!(deleted.last_built_name.as_deref(), Some("widget"));
    assert!(store.source(source.id).is_err());
}

//! Integration tests for the thread registry with real files in a temp dir.

use news_chat_client::threads::{NEW_THREAD_TITLE, UNTITLED};
use news_chat_client::ThreadStore;
use predicates::prelude::*;

#[test]
fn create_rename_delete_persist_across_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = ThreadStore::path_in(dir.path());

    let mut store = ThreadStore::load(&path);
    assert!(store.threads().is_empty());
    let first = store.create().unwrap();
    let second = store.create().unwrap();
    assert_ne!(first, second);
    store.rename(&first, "  Energy headlines ").unwrap();

    let reloaded = ThreadStore::load(&path);
    let ids: Vec<_> = reloaded.threads().iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, [second.as_str(), first.as_str()], "newest first");
    assert_eq!(reloaded.get(&first).unwrap().title, "Energy headlines");
    assert_eq!(reloaded.get(&second).unwrap().title, NEW_THREAD_TITLE);

    let mut store = reloaded;
    store.remove(&second).unwrap();
    let reloaded = ThreadStore::load(&path);
    assert_eq!(reloaded.threads().len(), 1);
    assert!(reloaded.get(&second).is_none());
}

#[test]
fn file_lives_under_namespaced_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = ThreadStore::path_in(dir.path());
    assert!(predicate::str::ends_with("news_chat_threads.json").eval(path.to_str().unwrap()));

    let mut store = ThreadStore::load(&path);
    store.create().unwrap();
    assert!(predicate::path::exists().eval(&path));
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(predicate::str::contains("updatedAt").eval(&contents));
}

#[test]
fn save_creates_missing_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("deeper").join("threads.json");
    let mut store = ThreadStore::load(&path);
    store.ensure("abc").unwrap();
    assert!(path.exists());
}

#[test]
fn corrupt_or_foreign_data_degrades_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("threads.json");

    std::fs::write(&path, "{{ not json").unwrap();
    assert!(ThreadStore::load(&path).threads().is_empty());

    std::fs::write(&path, r#"{"id":"x"}"#).unwrap();
    assert!(ThreadStore::load(&path).threads().is_empty());
}

#[test]
fn missing_titles_are_normalized() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("threads.json");
    std::fs::write(
        &path,
        r#"[{"id":"a","updatedAt":1},{"id":"b","title":"Kept","updatedAt":2}]"#,
    )
    .unwrap();

    let store = ThreadStore::load(&path);
    assert_eq!(store.get("a").unwrap().title, NEW_THREAD_TITLE);
    assert_eq!(store.get("b").unwrap().title, "Kept");
}

#[test]
fn ensure_is_idempotent_and_blank_rename_is_untitled() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ThreadStore::load(dir.path().join("threads.json"));
    store.ensure("abc").unwrap();
    store.ensure("abc").unwrap();
    store.ensure("").unwrap();
    assert_eq!(store.threads().len(), 1);

    store.rename("abc", "   ").unwrap();
    assert_eq!(store.get("abc").unwrap().title, UNTITLED);
    store.rename("unknown", "ignored").unwrap();
    assert_eq!(store.threads().len(), 1);
}

#[test]
fn auto_title_only_replaces_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ThreadStore::load(dir.path().join("threads.json"));
    let id = store.create().unwrap();

    let long = "Summarize today's top headlines about renewable energy in Europe please";
    assert!(store.auto_title(&id, long).unwrap());
    let title = store.get(&id).unwrap().title.clone();
    assert_eq!(title.chars().count(), 51);
    assert!(title.ends_with('…'));

    assert!(!store.auto_title(&id, "Second question").unwrap());
    assert_eq!(store.get(&id).unwrap().title, title);
}

#[test]
fn bad_entries_are_skipped_individually() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("threads.json");
    std::fs::write(
        &path,
        r#"[{"title":"no id"},{"id":"a","title":"Kept","updatedAt":1700000000000.5},7,{"id":"b"}]"#,
    )
    .unwrap();

    let store = ThreadStore::load(&path);
    let ids: Vec<_> = store.threads().iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, ["a", "b"]);
    assert_eq!(store.get("a").unwrap().updated_at, 1_700_000_000_000);
    assert_eq!(store.get("b").unwrap().title, NEW_THREAD_TITLE);
}

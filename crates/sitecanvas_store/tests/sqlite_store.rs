use sitecanvas_core::model::{Page, PageCollection, ThemeIdentity};
use sitecanvas_store::{KeyValueStore, PersistOptions, SqliteStore, ThemePersistence, WriteOutcome};
use tempfile::TempDir;

#[test]
fn entries_survive_reopen() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("nested").join("storage.sqlite");
    {
        let mut store = SqliteStore::open(&path).expect("open");
        store.put("b", "2").expect("put");
        store.put("a", "1").expect("put");
        store.put("a", "one").expect("upsert");
    }
    let mut store = SqliteStore::open(&path).expect("reopen");
    assert_eq!(store.get("a").expect("get").as_deref(), Some("one"));
    assert_eq!(store.keys().expect("keys"), vec!["a", "b"]);
    assert!(store.remove("b").expect("remove"));
    assert_eq!(store.get("b").expect("get"), None);
}

#[test]
fn sqlite_store_enforces_quota() {
    let dir = TempDir::new().expect("tempdir");
    let mut store = SqliteStore::open(&dir.path().join("storage.sqlite"))
        .expect("open")
        .with_quota(Some(10));
    store.put("k", "123456789").expect("fits");
    let err = store.put("k2", "x").expect_err("over quota");
    assert!(err.is_quota());
}

#[test]
fn another_process_sees_newer_snapshot_by_polling() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("storage.sqlite");
    let identity = ThemeIdentity::custom("docs").expect("identity");

    let mut reader = ThemePersistence::new(
        SqliteStore::open(&path).expect("open reader"),
        Some(&identity),
        PersistOptions::default(),
    );
    reader.mount();
    assert_eq!(reader.poll_external().expect("poll"), None);

    let mut writer = ThemePersistence::new(
        SqliteStore::open(&path).expect("open writer"),
        Some(&identity),
        PersistOptions::default(),
    );
    writer.mount();
    let collection = PageCollection::single(Page {
        id: "page-1".to_string(),
        name: "Guide".to_string(),
        html: "<h1>Guide</h1>".to_string(),
        css: "h1{margin:0}".to_string(),
    });
    assert_eq!(writer.flush(&collection, 1_000), WriteOutcome::Written);

    let polled = reader.poll_external().expect("poll").expect("newer snapshot");
    assert_eq!(polled, collection);
    assert_eq!(reader.poll_external().expect("poll again"), None);
}

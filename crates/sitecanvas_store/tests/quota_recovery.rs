use sitecanvas_core::model::{Page, PageCollection, ThemeIdentity};
use sitecanvas_store::{
    KeyValueStore, MemoryStore, PersistOptions, PersistedSnapshot, ThemePersistence, WriteOutcome,
};

const OWN_KEY: &str = "sitecanvas.pages.custom-landing";
const OTHER_KEY: &str = "sitecanvas.pages.custom-old-campaign";
const NOTES_KEY: &str = "sitecanvas.notes.custom-landing";

fn identity() -> ThemeIdentity {
    ThemeIdentity::custom("landing").expect("identity")
}

fn heavy_pages() -> PageCollection {
    PageCollection::from_pages(vec![
        Page {
            id: "page-1".to_string(),
            name: "Home".to_string(),
            html: "<h1>Launch</h1>".to_string(),
            css: "a".repeat(1_000),
        },
        Page {
            id: "page-2".to_string(),
            name: "Pricing".to_string(),
            html: "<h1>Pricing</h1>".to_string(),
            css: "é".repeat(40),
        },
    ])
}

fn options() -> PersistOptions {
    PersistOptions {
        css_truncate_limit: 16,
        ..PersistOptions::default()
    }
}

fn seeded_store(quota: usize) -> MemoryStore {
    let mut store = MemoryStore::new();
    store.put(OTHER_KEY, &"x".repeat(500)).expect("seed other theme");
    store.put(NOTES_KEY, "[]").expect("seed notes");
    store.with_quota(Some(quota))
}

#[test]
fn quota_failure_prunes_other_themes_and_truncates_css() {
    let store = seeded_store(1_300);
    let mut persistence = ThemePersistence::new(store.clone(), Some(&identity()), options());
    persistence.mount();

    let outcome = persistence.flush(&heavy_pages(), 42);
    assert_eq!(outcome, WriteOutcome::WrittenTruncated);

    assert_eq!(store.get(OTHER_KEY).expect("get"), None);
    assert_eq!(store.get(NOTES_KEY).expect("get").as_deref(), Some("[]"));

    let raw = store.get(OWN_KEY).expect("get").expect("snapshot written");
    let snapshot: PersistedSnapshot = serde_json::from_str(&raw).expect("json");
    assert_eq!(snapshot.pages[0].css, "a".repeat(16));
    assert_eq!(snapshot.pages[1].css, "é".repeat(16));
    assert_eq!(snapshot.pages[0].html, "<h1>Launch</h1>");
    assert_eq!(snapshot.updated_at, 42);
}

#[test]
fn unrecoverable_quota_failure_is_reported_not_raised() {
    let store = seeded_store(40);
    let mut persistence = ThemePersistence::new(store.clone(), Some(&identity()), options());
    persistence.mount();

    assert_eq!(persistence.flush(&heavy_pages(), 42), WriteOutcome::Failed);
    assert_eq!(store.get(OWN_KEY).expect("get"), None);
}

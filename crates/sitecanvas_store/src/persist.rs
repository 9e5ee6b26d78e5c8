//! Debounced snapshot persistence of a theme's pages, with cross-tab sync.
//!
//! Every tab writes `{ pages, currentPageId, updatedAt, source }` under one
//! key per theme. Conflicts are settled by `updatedAt`: the last writer wins
//! and a tab never adopts a snapshot older than one it already applied.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sitecanvas_core::config::{DEFAULT_CSS_TRUNCATE_LIMIT, DEFAULT_DEBOUNCE_MS, StorageConfig};
use sitecanvas_core::model::{Page, PageCollection, ThemeIdentity};

use crate::bus::StorageEvent;
use crate::debounce::Debouncer;
use crate::error::StoreError;
use crate::store::KeyValueStore;

pub const SNAPSHOT_KEY_PREFIX: &str = "sitecanvas.pages.";

pub fn snapshot_key(identity: &ThemeIdentity) -> String {
    snapshot_key_for_slug(&identity.storage_slug())
}

pub fn snapshot_key_for_slug(slug: &str) -> String {
    format!("{SNAPSHOT_KEY_PREFIX}{slug}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub pages: Vec<Page>,
    pub current_page_id: String,
    pub updated_at: i64,
    pub source: String,
}

impl PersistedSnapshot {
    /// `None` for snapshots without pages, which are never restored.
    pub fn into_collection(self) -> Option<PageCollection> {
        if self.pages.is_empty() {
            return None;
        }
        Some(PageCollection::from_pages(self.pages).with_current(&self.current_page_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Written after pruning other themes and truncating page CSS.
    WrittenTruncated,
    /// Content identical to the last write.
    Unchanged,
    /// Theme has no identity yet.
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PersistOptions {
    pub debounce: Duration,
    pub css_truncate_limit: usize,
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            css_truncate_limit: DEFAULT_CSS_TRUNCATE_LIMIT,
        }
    }
}

impl From<&StorageConfig> for PersistOptions {
    fn from(config: &StorageConfig) -> Self {
        Self {
            debounce: config.debounce,
            css_truncate_limit: config.css_truncate_limit,
        }
    }
}

pub struct ThemePersistence<S: KeyValueStore> {
    store: S,
    key: Option<String>,
    source: String,
    options: PersistOptions,
    debouncer: Debouncer,
    pending: Option<PageCollection>,
    mounted: bool,
    suppress_next: bool,
    restored_from_local: bool,
    last_applied: i64,
    last_fingerprint: Option<blake3::Hash>,
}

impl<S: KeyValueStore> ThemePersistence<S> {
    /// Without an identity nothing is read or written.
    pub fn new(store: S, identity: Option<&ThemeIdentity>, options: PersistOptions) -> Self {
        Self {
            store,
            key: identity.map(snapshot_key),
            source: Uuid::new_v4().to_string(),
            debouncer: Debouncer::new(options.debounce),
            options,
            pending: None,
            mounted: false,
            suppress_next: false,
            restored_from_local: false,
            last_applied: i64::MIN,
            last_fingerprint: None,
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn restored_from_local(&self) -> bool {
        self.restored_from_local
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn has_pending_write(&self) -> bool {
        self.pending.is_some()
    }

    /// Reads any existing snapshot. A restored snapshot suppresses the next write.
    pub fn mount(&mut self) -> Option<PageCollection> {
        self.mounted = true;
        let key = self.key.clone()?;
        let raw = match self.store.get(&key) {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "could not read local snapshot");
                return None;
            }
        };
        let snapshot = parse_snapshot(&raw)?;
        let updated_at = snapshot.updated_at;
        let collection = snapshot.into_collection()?;
        self.restored_from_local = true;
        self.suppress_next = true;
        self.last_applied = updated_at;
        self.last_fingerprint = Some(fingerprint(&collection));
        tracing::debug!(key = %key, pages = collection.len(), "restored pages from local snapshot");
        Some(collection)
    }

    /// Records a change to pages or the current page; written once the debounce expires.
    pub fn on_change(&mut self, collection: &PageCollection, now: i64) {
        if !self.mounted || self.key.is_none() {
            return;
        }
        if self.suppress_next {
            self.suppress_next = false;
            return;
        }
        self.pending = Some(collection.snapshot());
        self.debouncer.touch(now);
    }

    pub fn flush_due(&mut self, now: i64) -> Option<WriteOutcome> {
        if !self.debouncer.take_due(now) {
            return None;
        }
        let collection = self.pending.take()?;
        Some(self.write(&collection, now))
    }

    /// Writes immediately, dropping any debounced write.
    pub fn flush(&mut self, collection: &PageCollection, now: i64) -> WriteOutcome {
        self.debouncer.cancel();
        self.pending = None;
        self.write(collection, now)
    }

    fn write(&mut self, collection: &PageCollection, now: i64) -> WriteOutcome {
        let Some(key) = self.key.clone() else {
            return WriteOutcome::Skipped;
        };
        let print = fingerprint(collection);
        if self.last_fingerprint == Some(print) {
            return WriteOutcome::Unchanged;
        }
        let snapshot = self.snapshot_of(collection, now, None);
        let outcome = match self.put_snapshot(&key, &snapshot) {
            Ok(()) => WriteOutcome::Written,
            Err(err) if err.is_quota() => self.recover_from_quota(&key, collection, now),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "local snapshot write failed");
                WriteOutcome::Failed
            }
        };
        if outcome != WriteOutcome::Failed {
            self.last_fingerprint = Some(print);
        }
        outcome
    }

    fn recover_from_quota(&mut self, key: &str, collection: &PageCollection, now: i64) -> WriteOutcome {
        let pruned = self.prune_other_snapshots(key);
        tracing::warn!(
            key = %key,
            pruned,
            "storage quota exceeded; pruned other themes and retrying with truncated CSS"
        );
        let snapshot = self.snapshot_of(collection, now, Some(self.options.css_truncate_limit));
        match self.put_snapshot(key, &snapshot) {
            Ok(()) => WriteOutcome::WrittenTruncated,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "giving up on local snapshot write");
                WriteOutcome::Failed
            }
        }
    }

    fn prune_other_snapshots(&mut self, keep: &str) -> usize {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(err) => {
                tracing::warn!(error = %err, "could not list storage keys");
                return 0;
            }
        };
        let mut pruned = 0;
        for key in keys
            .iter()
            .filter(|key| key.starts_with(SNAPSHOT_KEY_PREFIX) && key.as_str() != keep)
        {
            match self.store.remove(key) {
                Ok(true) => pruned += 1,
                Ok(false) => {}
                Err(err) => tracing::debug!(key = %key, error = %err, "could not prune snapshot"),
            }
        }
        pruned
    }

    fn snapshot_of(
        &self,
        collection: &PageCollection,
        now: i64,
        css_limit: Option<usize>,
    ) -> PersistedSnapshot {
        let pages = collection
            .pages
            .iter()
            .map(|page| match css_limit {
                Some(limit) => Page {
                    css: truncate_chars(&page.css, limit).to_string(),
                    ..page.clone()
                },
                None => page.clone(),
            })
            .collect();
        PersistedSnapshot {
            pages,
            current_page_id: collection.current_page_id.clone(),
            updated_at: now,
            source: self.source.clone(),
        }
    }

    fn put_snapshot(&mut self, key: &str, snapshot: &PersistedSnapshot) -> Result<(), StoreError> {
        let json = serde_json::to_string(snapshot)?;
        self.store.put(key, &json)
    }

    /// Adopts a newer snapshot written by another tab. The next local write is suppressed.
    pub fn handle_event(&mut self, event: &StorageEvent) -> Option<PageCollection> {
        if self.key.as_deref() != Some(event.key.as_str()) {
            return None;
        }
        let snapshot = parse_snapshot(event.new_value.as_deref()?)?;
        if snapshot.source == self.source {
            return None;
        }
        if snapshot.updated_at <= self.last_applied {
            tracing::debug!(
                incoming = snapshot.updated_at,
                applied = self.last_applied,
                "ignoring stale snapshot"
            );
            return None;
        }
        let updated_at = snapshot.updated_at;
        let collection = snapshot.into_collection()?;
        self.last_applied = updated_at;
        self.suppress_next = true;
        self.pending = None;
        self.debouncer.cancel();
        self.last_fingerprint = Some(fingerprint(&collection));
        Some(collection)
    }

    /// Reads the key directly, for writers in other processes that share no bus.
    pub fn poll_external(&mut self) -> Result<Option<PageCollection>, StoreError> {
        let Some(key) = self.key.clone() else {
            return Ok(None);
        };
        let new_value = self.store.get(&key)?;
        Ok(self.handle_event(&StorageEvent { key, new_value }))
    }
}

fn parse_snapshot(raw: &str) -> Option<PersistedSnapshot> {
    match serde_json::from_str(raw) {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            tracing::debug!(error = %err, "ignoring unreadable snapshot");
            None
        }
    }
}

fn fingerprint(collection: &PageCollection) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    for page in &collection.pages {
        for field in [&page.id, &page.name, &page.html, &page.css] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
    }
    hasher.update(collection.current_page_id.as_bytes());
    hasher.finalize()
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

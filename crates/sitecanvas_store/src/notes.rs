//! Free-form author notes, stored next to the page snapshot under their own key.

use std::time::Duration;

use uuid::Uuid;

use sitecanvas_core::model::{Note, ThemeIdentity};

use crate::debounce::Debouncer;
use crate::error::StoreError;
use crate::persist::snapshot_key_for_slug;
use crate::store::KeyValueStore;

pub const NOTES_KEY_PREFIX: &str = "sitecanvas.notes.";

pub fn notes_key(identity: &ThemeIdentity) -> String {
    notes_key_for_slug(&identity.storage_slug())
}

pub fn notes_key_for_slug(slug: &str) -> String {
    format!("{NOTES_KEY_PREFIX}{slug}")
}

pub fn new_note(content: &str, now: i64) -> Note {
    Note {
        id: Uuid::new_v4().to_string(),
        content: content.to_string(),
        created_at: now,
    }
}

/// Unreadable notes are treated as none.
pub fn load_notes<S>(store: &S, identity: &ThemeIdentity) -> Result<Vec<Note>, StoreError>
where
    S: KeyValueStore + ?Sized,
{
    let key = notes_key(identity);
    let Some(raw) = store.get(&key)? else {
        return Ok(Vec::new());
    };
    match serde_json::from_str(&raw) {
        Ok(notes) => Ok(notes),
        Err(err) => {
            tracing::warn!(key = %key, error = %err, "ignoring unreadable notes");
            Ok(Vec::new())
        }
    }
}

pub fn save_notes<S>(store: &mut S, identity: &ThemeIdentity, notes: &[Note]) -> Result<(), StoreError>
where
    S: KeyValueStore + ?Sized,
{
    let json = serde_json::to_string(notes)?;
    store.put(&notes_key(identity), &json)
}

/// Removes the snapshot and notes stored under `slug`. Returns how many keys existed.
pub fn clear_theme_data<S>(store: &mut S, slug: &str) -> Result<usize, StoreError>
where
    S: KeyValueStore + ?Sized,
{
    let mut removed = 0;
    for key in [snapshot_key_for_slug(slug), notes_key_for_slug(slug)] {
        if store.remove(&key)? {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Debounced note saving.
pub struct NotesAutosave {
    identity: ThemeIdentity,
    debouncer: Debouncer,
    pending: Option<Vec<Note>>,
}

impl NotesAutosave {
    pub fn new(identity: ThemeIdentity, debounce: Duration) -> Self {
        Self {
            identity,
            debouncer: Debouncer::new(debounce),
            pending: None,
        }
    }

    pub fn on_change(&mut self, notes: &[Note], now: i64) {
        self.pending = Some(notes.to_vec());
        self.debouncer.touch(now);
    }

    /// Saves when the debounce has expired. Returns whether anything was written.
    pub fn flush_due<S>(&mut self, store: &mut S, now: i64) -> Result<bool, StoreError>
    where
        S: KeyValueStore + ?Sized,
    {
        if !self.debouncer.take_due(now) {
            return Ok(false);
        }
        self.flush(store)
    }

    pub fn flush<S>(&mut self, store: &mut S) -> Result<bool, StoreError>
    where
        S: KeyValueStore + ?Sized,
    {
        self.debouncer.cancel();
        let Some(notes) = self.pending.take() else {
            return Ok(false);
        };
        save_notes(store, &self.identity, &notes)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn identity() -> ThemeIdentity {
        ThemeIdentity::custom("t1").expect("identity")
    }

    #[test]
    fn autosave_waits_for_quiet_period() {
        let mut store = MemoryStore::new();
        let mut autosave = NotesAutosave::new(identity(), Duration::from_millis(400));
        let notes = vec![new_note("hero copy is too long", 5)];
        autosave.on_change(&notes, 0);
        assert!(!autosave.flush_due(&mut store, 100).expect("flush"));
        assert!(load_notes(&store, &identity()).expect("load").is_empty());
        assert!(autosave.flush_due(&mut store, 400).expect("flush"));
        assert_eq!(load_notes(&store, &identity()).expect("load"), notes);
    }

    #[test]
    fn clear_removes_snapshot_and_notes() {
        let mut store = MemoryStore::new();
        store.put("sitecanvas.pages.custom-bad id", "{}").expect("put");
        store.put("sitecanvas.notes.custom-bad id", "[]").expect("put");
        store.put("sitecanvas.notes.custom-other", "[]").expect("put");
        assert_eq!(clear_theme_data(&mut store, "custom-bad id").expect("clear"), 2);
        assert_eq!(store.keys().expect("keys"), vec!["sitecanvas.notes.custom-other"]);
    }

    #[test]
    fn unreadable_notes_load_as_empty() {
        let mut store = MemoryStore::new();
        store.put(&notes_key(&identity()), "not json").expect("put");
        assert!(load_notes(&store, &identity()).expect("load").is_empty());
    }
}

mod bus;
mod debounce;
mod error;
pub mod notes;
pub mod persist;
mod store;

pub use crate::bus::{ChangeBus, StorageEvent};
pub use crate::debounce::Debouncer;
pub use crate::error::StoreError;
pub use crate::persist::{PersistOptions, PersistedSnapshot, ThemePersistence, WriteOutcome};
pub use crate::store::{KeyValueStore, MemoryStore, SqliteStore};

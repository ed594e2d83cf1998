//! Flat string key/value persistence backends.
//!
//! [`RedbPreferences`] keeps every value in a single redb table and mirrors
//! it in memory so reads made on the interception path never hit the disk.
//! [`MemoryPreferences`] is a process-local store for hosts that persist
//! preferences themselves.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;

const PREFERENCES: TableDefinition<&str, &str> = TableDefinition::new("preferences");

/// Failures raised by a preference backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("preference storage error: {0}")]
    Backend(#[from] redb::Error),
}

/// String-keyed, string-valued durable store.
pub trait PreferenceStore: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;

    fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// redb-backed store with a write-through in-memory mirror.
pub struct RedbPreferences {
    db: Database,
    cache: RwLock<HashMap<String, String>>,
}

impl RedbPreferences {
    /// Open (or create) the preference database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(redb::Error::from)?;
        Self::from_database(db)
    }

    /// Database that lives only as long as the returned store.
    pub fn in_memory() -> Result<Self, StoreError> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(redb::Error::from)?;
        Self::from_database(db)
    }

    fn from_database(db: Database) -> Result<Self, StoreError> {
        let cache = load_all(&db)?;
        log::debug!("loaded {} stored preferences", cache.len());
        Ok(Self {
            db,
            cache: RwLock::new(cache),
        })
    }

    fn persist(&self, key: &str, value: &str) -> Result<(), redb::Error> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(PREFERENCES)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }
}

fn load_all(db: &Database) -> Result<HashMap<String, String>, redb::Error> {
    // Opening the table in a write transaction creates it on first run.
    let txn = db.begin_write()?;
    let mut values = HashMap::new();
    {
        let table = txn.open_table(PREFERENCES)?;
        for entry in table.iter()? {
            let (key, value) = entry?;
            values.insert(key.value().to_string(), value.value().to_string());
        }
    }
    txn.commit()?;
    Ok(values)
}

impl PreferenceStore for RedbPreferences {
    fn get_string(&self, key: &str) -> Option<String> {
        let guard = self.cache.read().expect("preference cache poisoned");
        guard.get(key).cloned()
    }

    /// The mirror lock is held across the commit so the cache and the table
    /// agree on the last writer.
    fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut guard = self.cache.write().expect("preference cache poisoned");
        self.persist(key, value)?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Non-durable store.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: RwLock::new(
                values
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get_string(&self, key: &str) -> Option<String> {
        let guard = self.values.read().expect("preference map poisoned");
        guard.get(key).cloned()
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut guard = self.values.write().expect("preference map poisoned");
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

//! Durable client-side state.
//!
//! Four string keys survive between runs, the same ones the web dashboard
//! keeps in browser storage. Everything else is re-fetched.

use crate::error::StoreError;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

pub const TOKEN_KEY: &str = "pb_token";
pub const USER_KEY: &str = "pb_user";
pub const CURRENT_PORTFOLIO_KEY: &str = "current_portfolio";
pub const THEME_KEY: &str = "pb_theme";

pub trait ClientStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Read a JSON value. `Ok(None)` when absent.
pub fn get_json<T: DeserializeOwned>(
    store: &dyn ClientStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Json {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

pub fn set_json<T: Serialize>(
    store: &dyn ClientStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Json {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &raw)
}

pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(SledStore { db })
    }
}

impl ClientStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.db.get(key)? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|_| StoreError::Encoding {
                    key: key.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.db.insert(key, value.as_bytes())?;
        // block until the write is stable on disk
        self.db.flush()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.db.remove(key)?;
        self.db.flush()?;
        Ok(())
    }
}

/// Non-persistent store for `--ephemeral` runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl ClientStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sled_round_trip() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(&dir.path().join("state")).unwrap();
        store.set(TOKEN_KEY, "jwt.value").unwrap();
        store.set(THEME_KEY, "light").unwrap();
        store.remove(THEME_KEY).unwrap();

        assert_eq!(store.get(TOKEN_KEY).unwrap().as_deref(), Some("jwt.value"));
        assert_eq!(store.get(THEME_KEY).unwrap(), None);
    }

    #[test]
    fn test_json_helpers() {
        let store = MemoryStore::default();
        set_json(&store, USER_KEY, &vec![1, 2, 3]).unwrap();
        let back: Option<Vec<i32>> = get_json(&store, USER_KEY).unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));

        store.set(USER_KEY, "{not json").unwrap();
        let err = get_json::<Vec<i32>>(&store, USER_KEY).unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));

        let missing: Option<Vec<i32>> = get_json(&store, "nope").unwrap();
        assert!(missing.is_none());
    }
}

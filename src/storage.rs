//! Durable key/value persistence for the offline engine.
//!
//! Every record lives under `{namespace}:{record}:{scope}:v{version}`. A
//! schema bump simply changes the key, so old payloads are never read again.
//! The one exception is the pre-scoping key `{namespace}:{record}`, which is
//! read once, rewritten under the scoped key and deleted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Result, SyncError};

pub const GLOBAL_SCOPE: &str = "global";

/// Synchronous storage backend injected into every store.
pub trait StorageAdapter: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Succeeds when the key does not exist.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local adapter. Each instance is fully isolated.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

impl StorageAdapter for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

/// Normalize an optional merchant id into a key segment.
pub fn scope_segment(merchant_scope: Option<&str>) -> String {
    merchant_scope
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(GLOBAL_SCOPE)
        .to_string()
}

/// One merchant-scoped, versioned record.
#[derive(Clone)]
pub struct ScopedRecord {
    storage: Arc<dyn StorageAdapter>,
    key: String,
    legacy_key: String,
}

impl ScopedRecord {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        namespace: &str,
        record: &str,
        merchant_scope: Option<&str>,
        schema_version: u32,
    ) -> Self {
        let scope = scope_segment(merchant_scope);
        Self {
            storage,
            key: format!("{namespace}:{record}:{scope}:v{schema_version}"),
            legacy_key: format!("{namespace}:{record}"),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn legacy_key(&self) -> &str {
        &self.legacy_key
    }

    /// Read and decode the record.
    ///
    /// Missing and malformed payloads come back as `Ok(None)`; corruption is
    /// logged, never returned. Adapter failures are `Err` so callers never
    /// mistake an unreadable record for an empty one.
    pub fn read<T: DeserializeOwned + Serialize>(&self) -> Result<Option<T>> {
        if let Some(raw) = self.storage.get(&self.key)? {
            return Ok(self.decode(&self.key, &raw));
        }
        self.migrate_legacy()
    }

    pub fn write<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value).map_err(|e| SyncError::Storage(e.to_string()))?;
        self.storage.set(&self.key, &raw)
    }

    pub fn clear(&self) -> Result<()> {
        self.storage.remove(&self.key)
    }

    fn decode<T: DeserializeOwned>(&self, key: &str, raw: &str) -> Option<T> {
        match serde_json::from_str::<T>(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                let err = SyncError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                };
                warn!(error = %err, "discarding malformed persisted payload");
                None
            }
        }
    }

    fn migrate_legacy<T: DeserializeOwned + Serialize>(&self) -> Result<Option<T>> {
        let raw = match self.storage.get(&self.legacy_key)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let value = self.decode::<T>(&self.legacy_key, &raw);
        if let Some(ref v) = value {
            if let Err(e) = self.write(v) {
                warn!(key = %self.key, error = %e, "failed to persist migrated legacy payload");
                return Ok(value);
            }
            info!(from = %self.legacy_key, to = %self.key, "migrated legacy payload");
        }
        if let Err(e) = self.storage.remove(&self.legacy_key) {
            warn!(key = %self.legacy_key, error = %e, "failed to remove legacy key");
        }
        Ok(value)
    }
}

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::StorageBackend;
use arca_types::error::{ArcaError, Result};

/// In-memory storage backend. Thread-safe via Mutex.
#[derive(Default)]
pub struct MemoryBackend {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of stored objects under `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.map().keys().filter(|k| k.starts_with(prefix)).count()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map().get(key).cloned())
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        let map = self.map();
        let Some(data) = map.get(key) else {
            return Ok(None);
        };
        let start = offset as usize;
        let end = start.checked_add(length as usize).ok_or_else(|| {
            ArcaError::InvalidFormat(format!(
                "short read on '{key}' at offset {offset}: offset + length overflows usize"
            ))
        })?;
        if end > data.len() {
            return Err(ArcaError::InvalidFormat(format!(
                "short read on '{key}' at offset {offset}: expected {length} bytes, got {}",
                data.len().saturating_sub(start)
            )));
        }
        Ok(Some(data[start..end].to_vec()))
    }

    fn size(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.map().get(key).map(|d| d.len() as u64))
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.map().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.map().remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .map()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

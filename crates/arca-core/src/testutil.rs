use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use arca_crypto::key::KdfCost;
use arca_storage::{MemoryBackend, RetryConfig, StorageBackend};
use arca_types::error::{ArcaError, Result};

use crate::config::{ChunkerConfig, EngineConfig, LockConfig, PackConfig};
use crate::repo::Repository;

pub const PASSPHRASE: &str = "correct horse battery staple";

/// Small chunks and packs, cheap key derivation and fast retries.
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        chunker: ChunkerConfig {
            min_size: 256,
            avg_size: 1024,
            max_size: 4096,
        },
        packs: PackConfig {
            min_pack_size: 16 * 1024,
            max_pack_size: 64 * 1024,
            max_in_flight_uploads: 2,
            repack_threshold: 0.5,
        },
        locks: LockConfig {
            stale_after_secs: 60,
            refresh_interval_secs: 10,
            max_refresh_failures: 2,
            acquire_attempts: 1,
            acquire_retry_delay_ms: 10,
        },
        retry: RetryConfig {
            max_retries: 2,
            retry_delay_ms: 1,
            retry_max_delay_ms: 5,
        },
        kdf: KdfCost {
            time_cost: 1,
            memory_cost: 256,
            parallelism: 1,
        },
        ..EngineConfig::default()
    }
}

/// Deterministic pseudo-random bytes.
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut buf);
    buf
}

pub fn init_repo(storage: Arc<dyn StorageBackend>) -> Repository {
    Repository::init(storage, &test_engine_config(), PASSPHRASE).unwrap()
}

pub fn open_repo(storage: Arc<dyn StorageBackend>) -> Repository {
    Repository::open(storage, &test_engine_config(), PASSPHRASE).unwrap()
}

/// A fresh in-memory repository. The backend is returned for inspection.
pub fn memory_repo() -> (Arc<MemoryBackend>, Repository) {
    let storage = Arc::new(MemoryBackend::new());
    let repo = init_repo(storage.clone());
    (storage, repo)
}

/// Records every backend call as `(operation, key)`.
pub struct RecordingBackend {
    inner: Arc<MemoryBackend>,
    calls: Mutex<Vec<(&'static str, String)>>,
}

impl RecordingBackend {
    pub fn new(inner: Arc<MemoryBackend>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, op: &'static str, key: &str) {
        self.calls.lock().unwrap().push((op, key.to_string()));
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Calls of `op` on keys starting with `prefix`.
    pub fn count(&self, op: &str, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, k)| *o == op && k.starts_with(prefix))
            .count()
    }

    /// Reads of any kind under `prefix`.
    pub fn reads(&self, prefix: &str) -> usize {
        self.count("get", prefix) + self.count("get_range", prefix) + self.count("size", prefix)
    }
}

impl StorageBackend for RecordingBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.record("get", key);
        self.inner.get(key)
    }
    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        self.record("get_range", key);
        self.inner.get_range(key, offset, length)
    }
    fn size(&self, key: &str) -> Result<Option<u64>> {
        self.record("size", key);
        self.inner.size(key)
    }
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.record("put", key);
        self.inner.put(key, data)
    }
    fn delete(&self, key: &str) -> Result<()> {
        self.record("delete", key);
        self.inner.delete(key)
    }
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.record("list", prefix);
        self.inner.list(prefix)
    }
}

/// Fails writes under a prefix with a transient error while armed.
pub struct FaultyBackend {
    inner: Arc<MemoryBackend>,
    failing_prefix: Mutex<Option<String>>,
    fail_reads: AtomicBool,
}

impl FaultyBackend {
    pub fn new(inner: Arc<MemoryBackend>) -> Self {
        Self {
            inner,
            failing_prefix: Mutex::new(None),
            fail_reads: AtomicBool::new(false),
        }
    }

    pub fn fail_puts_under(&self, prefix: &str) {
        *self.failing_prefix.lock().unwrap() = Some(prefix.to_string());
    }

    /// Also fail reads under the armed prefix.
    pub fn fail_reads_too(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        *self.failing_prefix.lock().unwrap() = None;
        self.fail_reads.store(false, Ordering::SeqCst);
    }

    fn check(&self, op: &'static str, key: &str, write: bool) -> Result<()> {
        let armed = self.failing_prefix.lock().unwrap();
        let hit = armed.as_deref().is_some_and(|p| key.starts_with(p));
        if hit && (write || self.fail_reads.load(Ordering::SeqCst)) {
            return Err(ArcaError::Transient {
                op,
                key: key.to_string(),
                message: "injected failure".into(),
            });
        }
        Ok(())
    }
}

impl StorageBackend for FaultyBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check("get", key, false)?;
        self.inner.get(key)
    }
    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        self.check("get_range", key, false)?;
        self.inner.get_range(key, offset, length)
    }
    fn size(&self, key: &str) -> Result<Option<u64>> {
        self.check("size", key, false)?;
        self.inner.size(key)
    }
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.check("put", key, true)?;
        self.inner.put(key, data)
    }
    fn delete(&self, key: &str) -> Result<()> {
        self.check("delete", key, true)?;
        self.inner.delete(key)
    }
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.check("list", prefix, false)?;
        self.inner.list(prefix)
    }
}

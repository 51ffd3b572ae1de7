use std::sync::atomic::{AtomicUsize, Ordering};

use arca_storage::{MemoryBackend, RetryConfig, RetryingBackend, StorageBackend};
use arca_types::error::{ArcaError, Result};

/// Fails the first `failures` calls of every operation with a transient error.
struct Flaky {
    inner: MemoryBackend,
    remaining: AtomicUsize,
}

impl Flaky {
    fn new(failures: usize) -> Self {
        Self {
            inner: MemoryBackend::new(),
            remaining: AtomicUsize::new(failures),
        }
    }

    fn maybe_fail(&self, op: &'static str, key: &str) -> Result<()> {
        let left = self.remaining.load(Ordering::SeqCst);
        if left > 0 {
            self.remaining.store(left - 1, Ordering::SeqCst);
            return Err(ArcaError::Transient {
                op,
                key: key.to_string(),
                message: "connection reset".into(),
            });
        }
        Ok(())
    }

    fn reset(&self, failures: usize) {
        self.remaining.store(failures, Ordering::SeqCst);
    }
}

impl StorageBackend for Flaky {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.maybe_fail("get", key)?;
        self.inner.get(key)
    }
    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        self.maybe_fail("get_range", key)?;
        self.inner.get_range(key, offset, length)
    }
    fn size(&self, key: &str) -> Result<Option<u64>> {
        self.maybe_fail("size", key)?;
        self.inner.size(key)
    }
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.maybe_fail("put", key)?;
        self.inner.put(key, data)
    }
    fn delete(&self, key: &str) -> Result<()> {
        self.maybe_fail("delete", key)?;
        self.inner.delete(key)
    }
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.maybe_fail("list", prefix)?;
        self.inner.list(prefix)
    }
}

fn fast_retry(max_retries: usize) -> RetryConfig {
    RetryConfig {
        max_retries,
        retry_delay_ms: 1,
        retry_max_delay_ms: 4,
    }
}

#[test]
fn transient_failures_are_absorbed() {
    let backend = RetryingBackend::new(Flaky::new(2), fast_retry(3));
    backend.put("snapshots/a", b"payload").unwrap();
    backend.inner().reset(3);
    assert_eq!(backend.get("snapshots/a").unwrap().unwrap(), b"payload");
}

#[test]
fn exhausted_retries_surface_fatal_error() {
    let backend = RetryingBackend::new(Flaky::new(10), fast_retry(2));
    let err = backend.list("locks/").unwrap_err();
    assert!(!err.is_transient());
    assert!(matches!(
        err,
        ArcaError::RetriesExhausted { op: "list", attempts: 3, .. }
    ));
    assert!(err.to_string().contains("locks/"));
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::StorageBackend;
use arca_types::error::{ArcaError, Result};

/// Backoff policy for transient backend failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries).
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

/// Run `f`, retrying transient errors with exponential backoff + jitter.
///
/// Non-transient errors are returned immediately. When every attempt failed
/// transiently the last error is wrapped in [`ArcaError::RetriesExhausted`]
/// naming the operation and object key.
pub fn retry_op<T>(
    config: &RetryConfig,
    op: &'static str,
    key: &str,
    mut f: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut delay_ms = config.retry_delay_ms;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let jitter = rand::random::<u64>() % delay_ms.max(1);
            std::thread::sleep(Duration::from_millis(delay_ms + jitter));
            delay_ms = (delay_ms * 2).min(config.retry_max_delay_ms);
        }
        match f() {
            Ok(val) => return Ok(val),
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                tracing::warn!(
                    op,
                    key,
                    "transient error (attempt {}/{}), retrying: {e}",
                    attempt + 1,
                    config.max_retries + 1,
                );
            }
            Err(e) if e.is_transient() => {
                return Err(ArcaError::RetriesExhausted {
                    op,
                    key: key.to_string(),
                    attempts: attempt + 1,
                    source: Box::new(e),
                });
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("retry loop always returns")
}

/// Whether an I/O error is transient and worth retrying.
pub fn is_retryable_io(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}

/// Convert an I/O error into `Transient` when retrying could help.
pub fn classify_io(op: &'static str, key: &str, err: std::io::Error) -> ArcaError {
    if is_retryable_io(&err) {
        ArcaError::Transient {
            op,
            key: key.to_string(),
            message: err.to_string(),
        }
    } else {
        ArcaError::Io(err).context(format!("{op} '{key}'"))
    }
}

/// Backend wrapper that applies [`retry_op`] to every operation.
pub struct RetryingBackend<B> {
    inner: B,
    config: RetryConfig,
}

impl<B: StorageBackend> RetryingBackend<B> {
    pub fn new(inner: B, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

impl<B: StorageBackend> StorageBackend for RetryingBackend<B> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        retry_op(&self.config, "get", key, || self.inner.get(key))
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        retry_op(&self.config, "get_range", key, || {
            self.inner.get_range(key, offset, length)
        })
    }

    fn size(&self, key: &str) -> Result<Option<u64>> {
        retry_op(&self.config, "size", key, || self.inner.size(key))
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        retry_op(&self.config, "put", key, || self.inner.put(key, data))
    }

    fn delete(&self, key: &str) -> Result<()> {
        retry_op(&self.config, "delete", key, || self.inner.delete(key))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        retry_op(&self.config, "list", prefix, || self.inner.list(prefix))
    }

    fn exists(&self, key: &str) -> Result<bool> {
        retry_op(&self.config, "exists", key, || self.inner.exists(key))
    }

    fn create_dir(&self, key: &str) -> Result<()> {
        retry_op(&self.config, "create_dir", key, || self.inner.create_dir(key))
    }
}

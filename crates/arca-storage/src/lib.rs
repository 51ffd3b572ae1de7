pub mod local;
pub mod memory;
pub mod paths;
pub mod retry;

use std::sync::Arc;

use arca_types::error::Result;

pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use retry::{RetryConfig, RetryingBackend, is_retryable_io, retry_op};

/// Minimal key/value object store the repository is built on.
///
/// Keys are `/`-separated relative paths (see [`paths`]). Implementations
/// must distinguish a missing object (`Ok(None)`) from an empty one
/// (`Ok(Some(vec![]))`): some backends leave zero-byte placeholders behind
/// after an interrupted upload, and callers treat those differently.
/// Failures that may succeed on retry are reported as
/// [`ArcaError::Transient`](arca_types::ArcaError::Transient).
pub trait StorageBackend: Send + Sync {
    /// Read a whole object.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Read `length` bytes starting at `offset`. A range extending past the
    /// end of the object is an error.
    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>>;

    /// Size of an object in bytes, `None` if absent.
    fn size(&self, key: &str) -> Result<Option<u64>>;

    /// Store an object. Overwriting with identical content has no effect.
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Remove an object. Removing a missing object is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// List every object key that starts with `prefix`.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.size(key)?.is_some())
    }

    /// Create a directory marker. No-op for flat object stores.
    fn create_dir(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

impl<T: StorageBackend + ?Sized> StorageBackend for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }
    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        (**self).get_range(key, offset, length)
    }
    fn size(&self, key: &str) -> Result<Option<u64>> {
        (**self).size(key)
    }
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        (**self).put(key, data)
    }
    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list(prefix)
    }
    fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key)
    }
    fn create_dir(&self, key: &str) -> Result<()> {
        (**self).create_dir(key)
    }
}

impl<T: StorageBackend + ?Sized> StorageBackend for Box<T> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }
    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        (**self).get_range(key, offset, length)
    }
    fn size(&self, key: &str) -> Result<Option<u64>> {
        (**self).size(key)
    }
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        (**self).put(key, data)
    }
    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list(prefix)
    }
    fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key)
    }
    fn create_dir(&self, key: &str) -> Result<()> {
        (**self).create_dir(key)
    }
}

use thiserror::Error;

use crate::blob_id::BlobHandle;

pub type Result<T> = std::result::Result<T, ArcaError>;

#[derive(Debug, Error)]
pub enum ArcaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A backend failure that may succeed when retried (network, timeout).
    #[error("transient backend error during {op} of '{key}': {message}")]
    Transient {
        op: &'static str,
        key: String,
        message: String,
    },

    #[error("{op} of '{key}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        op: &'static str,
        key: String,
        attempts: usize,
        #[source]
        source: Box<ArcaError>,
    },

    #[error("object not found: '{0}'")]
    NotFound(String),

    #[error("repository not found at '{0}'")]
    RepoNotFound(String),

    #[error("repository already exists at '{0}'")]
    RepoAlreadyExists(String),

    #[error("decryption failed: wrong key or corrupted data")]
    DecryptionFailed,

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("no key file could be opened with the given passphrase")]
    WrongPassphrase,

    #[error("invalid repository format: {0}")]
    InvalidFormat(String),

    #[error("unknown object type tag: {0}")]
    UnknownObjectType(u8),

    #[error("unknown compression tag: {0}")]
    UnknownCompressionTag(u8),

    #[error("unsupported repository version: {0}")]
    UnsupportedVersion(u32),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("blob not found in index: {0}")]
    BlobNotFound(BlobHandle),

    #[error("index has not been loaded")]
    IndexNotLoaded,

    #[error("index inconsistency: {0}")]
    IndexInconsistent(String),

    #[error("repository is locked: {0}")]
    Locked(String),

    #[error("unreadable lock '{key}': {reason}; remove it manually once its owner is known to be gone")]
    UnreadableLock { key: String, reason: String },

    #[error("repository lock '{0}' was lost after repeated refresh failures")]
    LockLost(String),

    #[error("operation requires a {0} repository lock")]
    NotLocked(&'static str),

    #[error("snapshot not found: '{0}'")]
    SnapshotNotFound(String),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("operation interrupted")]
    Interrupted,

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ArcaError>,
    },

    #[error("{0}")]
    Other(String),
}

impl ArcaError {
    /// Wrap this error with a description of the operation that failed.
    pub fn context(self, context: impl Into<String>) -> Self {
        ArcaError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through `Context` wrappers.
    pub fn root(&self) -> &ArcaError {
        match self {
            ArcaError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether retrying the failed operation might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self.root(), ArcaError::Transient { .. })
    }

    /// Authentication or content-hash failures. Never retried.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self.root(),
            ArcaError::DecryptionFailed | ArcaError::Integrity(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), ArcaError::NotFound(_))
    }
}

/// Attach operation context to the error side of a `Result`.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_looks_through_context() {
        let err = ArcaError::DecryptionFailed
            .context("reading pack abcd")
            .context("loading index");
        assert!(err.is_integrity());
        assert!(!err.is_transient());

        let err = ArcaError::Transient {
            op: "get",
            key: "locks/x".into(),
            message: "timeout".into(),
        }
        .context("listing locks");
        assert!(err.is_transient());
    }

    #[test]
    fn context_message_includes_both_layers() {
        let err: Result<()> = Err(ArcaError::NotFound("packs/ab/abcd".into()));
        let err = err.context("reading blob data/1234").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("reading blob data/1234"), "{msg}");
        assert!(msg.contains("packs/ab/abcd"), "{msg}");
        assert!(err.is_not_found());
    }
}

pub mod check;
pub mod chunker;
pub mod compress;
pub mod config;
pub mod index;
pub mod platform;
pub mod prune;
pub mod repo;
pub mod snapshot;

pub use arca_crypto::EncryptionMode;
pub use arca_storage::StorageBackend;
pub use arca_types::error::{ArcaError, Result};
pub use config::EngineConfig;
pub use repo::Repository;

#[cfg(test)]
mod tests;
#[cfg(test)]
mod testutil;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use arca_crypto::EncryptionMode;
use arca_crypto::key::KdfCost;
use arca_storage::RetryConfig;

use super::defaults::*;

/// Runtime configuration of the storage engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub packs: PackConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub kdf: KdfCost,
    /// Cipher for newly initialized repositories.
    #[serde(default)]
    pub encryption: EncryptionMode,
    /// Upper bound on decrypted blobs kept in memory on the read path.
    #[serde(default = "default_blob_cache_bytes")]
    pub blob_cache_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            packs: PackConfig::default(),
            compression: CompressionConfig::default(),
            locks: LockConfig::default(),
            retry: RetryConfig::default(),
            kdf: KdfCost::default(),
            encryption: EncryptionMode::default(),
            blob_cache_bytes: default_blob_cache_bytes(),
        }
    }
}

/// Content-defined chunking bounds. Persisted in the repository config at
/// init; later runs always use the persisted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    #[serde(default = "default_min_size")]
    pub min_size: u32,
    #[serde(default = "default_avg_size")]
    pub avg_size: u32,
    #[serde(default = "default_max_size")]
    pub max_size: u32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: default_min_size(),
            avg_size: default_avg_size(),
            max_size: default_max_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackConfig {
    #[serde(default = "default_min_pack_size")]
    pub min_pack_size: u32,
    #[serde(default = "default_max_pack_size")]
    pub max_pack_size: u32,
    #[serde(default = "default_max_in_flight_uploads")]
    pub max_in_flight_uploads: usize,
    /// Packs whose live fraction (by stored bytes) falls below this are
    /// rewritten by prune.
    #[serde(default = "default_repack_threshold")]
    pub repack_threshold: f64,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            min_pack_size: default_min_pack_size(),
            max_pack_size: default_max_pack_size(),
            max_in_flight_uploads: default_max_in_flight_uploads(),
            repack_threshold: default_repack_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    None,
    Lz4,
    Zstd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: CompressionAlgorithm,
    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            zstd_level: default_zstd_level(),
        }
    }
}

/// Lock timing. `stale_after_secs` must comfortably exceed
/// `refresh_interval_secs`, see [`EngineConfig::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Consecutive refresh failures tolerated before the lock counts as lost.
    #[serde(default = "default_max_refresh_failures")]
    pub max_refresh_failures: u32,
    #[serde(default = "default_acquire_attempts")]
    pub acquire_attempts: usize,
    #[serde(default = "default_acquire_retry_delay_ms")]
    pub acquire_retry_delay_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            max_refresh_failures: default_max_refresh_failures(),
            acquire_attempts: default_acquire_attempts(),
            acquire_retry_delay_ms: default_acquire_retry_delay_ms(),
        }
    }
}

impl LockConfig {
    pub fn timing(&self) -> LockTiming {
        LockTiming {
            stale_after: Duration::from_secs(self.stale_after_secs),
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            max_refresh_failures: self.max_refresh_failures,
            acquire_attempts: self.acquire_attempts.max(1),
            acquire_retry_delay: Duration::from_millis(self.acquire_retry_delay_ms),
        }
    }
}

/// Resolved lock timing used by the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTiming {
    pub stale_after: Duration,
    pub refresh_interval: Duration,
    pub max_refresh_failures: u32,
    pub acquire_attempts: usize,
    pub acquire_retry_delay: Duration,
}

impl Default for LockTiming {
    fn default() -> Self {
        LockConfig::default().timing()
    }
}

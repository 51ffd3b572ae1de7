mod defaults;
mod types;

use std::path::Path;

use arca_types::error::{ArcaError, Result};

pub use self::types::*;

/// Hard cap on pack sizes; a pack must stay addressable by the u32 offsets
/// stored in its header.
pub const MAX_PACK_SIZE_HARD_LIMIT: u32 = 512 * 1024 * 1024;

// FastCDC v2020 accepted parameter ranges.
const CHUNK_MIN_SIZE_RANGE: (u32, u32) = (64, 1024 * 1024);
const CHUNK_AVG_SIZE_RANGE: (u32, u32) = (256, 4 * 1024 * 1024);
const CHUNK_MAX_SIZE_RANGE: (u32, u32) = (1024, 16 * 1024 * 1024);

/// Read and validate an engine configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ArcaError::Config(format!("cannot read config file '{}': {e}", path.display()))
    })?;
    parse_config(&contents)
}

/// Parse and validate an engine configuration from a YAML string.
pub fn parse_config(yaml: &str) -> Result<EngineConfig> {
    let config: EngineConfig = if yaml.trim().is_empty() {
        EngineConfig::default()
    } else {
        serde_yaml::from_str(yaml).map_err(|e| ArcaError::Config(format!("invalid YAML: {e}")))?
    };
    config.validate()?;
    Ok(config)
}

fn check_range(name: &str, value: u32, (lo, hi): (u32, u32)) -> Result<()> {
    if value < lo || value > hi {
        return Err(ArcaError::Config(format!(
            "{name} ({value}) must be between {lo} and {hi}"
        )));
    }
    Ok(())
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<()> {
        check_range("chunker.min_size", self.min_size, CHUNK_MIN_SIZE_RANGE)?;
        check_range("chunker.avg_size", self.avg_size, CHUNK_AVG_SIZE_RANGE)?;
        check_range("chunker.max_size", self.max_size, CHUNK_MAX_SIZE_RANGE)?;
        if !(self.min_size <= self.avg_size && self.avg_size <= self.max_size) {
            return Err(ArcaError::Config(format!(
                "chunker sizes must satisfy min <= avg <= max (got {} / {} / {})",
                self.min_size, self.avg_size, self.max_size
            )));
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        self.chunker.validate()?;

        let packs = &self.packs;
        if packs.min_pack_size == 0 || packs.min_pack_size > packs.max_pack_size {
            return Err(ArcaError::Config(format!(
                "packs.min_pack_size ({}) must be non-zero and not above packs.max_pack_size ({})",
                packs.min_pack_size, packs.max_pack_size
            )));
        }
        if packs.max_pack_size > MAX_PACK_SIZE_HARD_LIMIT {
            return Err(ArcaError::Config(format!(
                "packs.max_pack_size ({}) exceeds hard limit of 512 MiB",
                packs.max_pack_size
            )));
        }
        if packs.max_in_flight_uploads == 0 {
            return Err(ArcaError::Config(
                "packs.max_in_flight_uploads must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&packs.repack_threshold) {
            return Err(ArcaError::Config(format!(
                "packs.repack_threshold ({}) must be within 0.0..=1.0",
                packs.repack_threshold
            )));
        }

        if self.compression.algorithm == CompressionAlgorithm::Zstd
            && !(1..=22).contains(&self.compression.zstd_level)
        {
            return Err(ArcaError::Config(format!(
                "compression.zstd_level ({}) must be within 1..=22",
                self.compression.zstd_level
            )));
        }

        let locks = &self.locks;
        if locks.refresh_interval_secs == 0 {
            return Err(ArcaError::Config(
                "locks.refresh_interval_secs must be at least 1".into(),
            ));
        }
        // A live process may miss `max_refresh_failures` refreshes in a row;
        // its lock must still look fresh to everyone else meanwhile.
        let margin = locks
            .refresh_interval_secs
            .saturating_mul(u64::from(locks.max_refresh_failures) + 2);
        if locks.stale_after_secs <= margin {
            return Err(ArcaError::Config(format!(
                "locks.stale_after_secs ({}) must exceed refresh_interval_secs × (max_refresh_failures + 2) = {margin}",
                locks.stale_after_secs
            )));
        }

        if self.retry.retry_delay_ms > self.retry.retry_max_delay_ms {
            return Err(ArcaError::Config(format!(
                "retry.retry_delay_ms ({}) exceeds retry.retry_max_delay_ms ({})",
                self.retry.retry_delay_ms, self.retry.retry_max_delay_ms
            )));
        }
        if self.kdf.time_cost == 0 || self.kdf.parallelism == 0 {
            return Err(ArcaError::Config(
                "kdf.time_cost and kdf.parallelism must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

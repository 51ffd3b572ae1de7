use super::types::CompressionAlgorithm;

pub(super) fn default_min_size() -> u32 {
    512 * 1024 // 512 KiB
}

pub(super) fn default_avg_size() -> u32 {
    2 * 1024 * 1024 // 2 MiB
}

pub(super) fn default_max_size() -> u32 {
    8 * 1024 * 1024 // 8 MiB
}

pub(super) fn default_min_pack_size() -> u32 {
    16 * 1024 * 1024 // 16 MiB
}

pub(super) fn default_max_pack_size() -> u32 {
    128 * 1024 * 1024 // 128 MiB
}

pub(super) fn default_max_in_flight_uploads() -> usize {
    2
}

pub(super) fn default_repack_threshold() -> f64 {
    0.5
}

pub(super) fn default_algorithm() -> CompressionAlgorithm {
    CompressionAlgorithm::Lz4
}

pub(super) fn default_zstd_level() -> i32 {
    3
}

pub(super) fn default_stale_after_secs() -> u64 {
    30 * 60
}

pub(super) fn default_refresh_interval_secs() -> u64 {
    5 * 60
}

pub(super) fn default_max_refresh_failures() -> u32 {
    3
}

pub(super) fn default_acquire_attempts() -> usize {
    5
}

pub(super) fn default_acquire_retry_delay_ms() -> u64 {
    2000
}

pub(super) fn default_blob_cache_bytes() -> usize {
    32 * 1024 * 1024 // 32 MiB
}

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ArcaError, Result};

pub const SNAPSHOTS_PREFIX: &str = "snapshots/";

/// A 32-byte snapshot identifier (random).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub [u8; 32]);

impl SnapshotId {
    /// Generate a random snapshot ID.
    pub fn generate() -> Self {
        let mut buf = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut buf);
        SnapshotId(buf)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Storage key path: `snapshots/<hex>`.
    pub fn storage_key(&self) -> String {
        format!("{SNAPSHOTS_PREFIX}{}", self.to_hex())
    }

    /// Parse a SnapshotId from a 64-character hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| ArcaError::InvalidFormat(format!("invalid snapshot id hex: {e}")))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            ArcaError::InvalidFormat(format!("snapshot id must be 32 bytes, got {}", b.len()))
        })?;
        Ok(SnapshotId(arr))
    }

    /// Raw bytes for use as AAD context.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapshotId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

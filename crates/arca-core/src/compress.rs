//! Per-blob compression. Every compressed payload starts with a one-byte
//! codec tag so readers never need out-of-band codec information.

use std::cell::RefCell;
use std::io::Read;

use arca_types::error::{ArcaError, Result};

use crate::config::{CompressionAlgorithm, CompressionConfig};

const TAG_NONE: u8 = 0x00;
const TAG_LZ4: u8 = 0x01;
const TAG_ZSTD: u8 = 0x02;

/// Upper bound on a decompressed blob: twice the largest accepted chunk size.
/// Guards against decompression bombs in corrupted or hostile packs.
pub const MAX_DECOMPRESS_SIZE: u64 = 32 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    #[default]
    Lz4,
    Zstd {
        level: i32,
    },
}

impl Compression {
    pub fn from_config(config: &CompressionConfig) -> Self {
        match config.algorithm {
            CompressionAlgorithm::None => Compression::None,
            CompressionAlgorithm::Lz4 => Compression::Lz4,
            CompressionAlgorithm::Zstd => Compression::Zstd {
                level: config.zstd_level,
            },
        }
    }

    fn tag(self) -> u8 {
        match self {
            Compression::None => TAG_NONE,
            Compression::Lz4 => TAG_LZ4,
            Compression::Zstd { .. } => TAG_ZSTD,
        }
    }
}

thread_local! {
    static ZSTD_CX: RefCell<Option<(i32, zstd::bulk::Compressor<'static>)>> =
        const { RefCell::new(None) };
}

fn zstd_compress(level: i32, data: &[u8]) -> Result<Vec<u8>> {
    ZSTD_CX.with(|cell| {
        let mut slot = cell.borrow_mut();
        let (_, cx) = match slot.take() {
            Some(entry) if entry.0 == level => slot.insert(entry),
            _ => {
                let cx = zstd::bulk::Compressor::new(level)
                    .map_err(|e| ArcaError::Other(format!("zstd init: {e}")))?;
                slot.insert((level, cx))
            }
        };
        cx.compress(data)
            .map_err(|e| ArcaError::Other(format!("zstd compress: {e}")))
    })
}

/// Compress `data` and prepend the codec tag.
pub fn compress(compression: Compression, data: &[u8]) -> Result<Vec<u8>> {
    let body = match compression {
        Compression::None => None,
        Compression::Lz4 => Some(lz4_flex::compress_prepend_size(data)),
        Compression::Zstd { level } => Some(zstd_compress(level, data)?),
    };
    let body = body.as_deref().unwrap_or(data);
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(compression.tag());
    out.extend_from_slice(body);
    Ok(out)
}

/// Inverse of [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    decompress_with_hint(data, None)
}

/// Like [`decompress`], with a capacity hint (usually the uncompressed length
/// recorded in the pack header). The hint never raises the size limit.
pub fn decompress_with_hint(data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>> {
    let Some((&tag, payload)) = data.split_first() else {
        return Err(ArcaError::Decompression("empty data".into()));
    };
    match tag {
        TAG_NONE => Ok(payload.to_vec()),
        TAG_LZ4 => {
            let Some(prefix) = payload.first_chunk::<4>() else {
                return Err(ArcaError::Decompression("lz4: payload too short".into()));
            };
            let declared = u64::from(u32::from_le_bytes(*prefix));
            if declared > MAX_DECOMPRESS_SIZE {
                return Err(ArcaError::Decompression(format!(
                    "lz4: declared size {declared} exceeds limit of {MAX_DECOMPRESS_SIZE} bytes"
                )));
            }
            lz4_flex::decompress_size_prepended(payload)
                .map_err(|e| ArcaError::Decompression(format!("lz4: {e}")))
        }
        TAG_ZSTD => {
            let decoder = zstd::stream::Decoder::new(payload)
                .map_err(|e| ArcaError::Decompression(format!("zstd init: {e}")))?;
            let capacity = expected_size
                .unwrap_or(0)
                .min(MAX_DECOMPRESS_SIZE as usize);
            let mut output = Vec::with_capacity(capacity);
            decoder
                .take(MAX_DECOMPRESS_SIZE + 1)
                .read_to_end(&mut output)
                .map_err(|e| ArcaError::Decompression(format!("zstd: {e}")))?;
            if output.len() as u64 > MAX_DECOMPRESS_SIZE {
                return Err(ArcaError::Decompression(format!(
                    "zstd: output exceeds limit of {MAX_DECOMPRESS_SIZE} bytes"
                )));
            }
            Ok(output)
        }
        other => Err(ArcaError::UnknownCompressionTag(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_lz4_size_bomb() {
        let mut data = vec![TAG_LZ4];
        data.extend_from_slice(&(1u32 << 30).to_le_bytes());
        data.extend_from_slice(&[0u8; 10]);
        let err = decompress(&data).unwrap_err();
        assert!(matches!(err, ArcaError::Decompression(_)), "{err}");
    }

    #[test]
    fn rejects_truncated_lz4_prefix() {
        assert!(decompress(&[TAG_LZ4, 0x00, 0x00]).is_err());
    }

    #[test]
    fn hint_does_not_change_output() {
        let payload = vec![0xAB; 4096];
        for codec in [Compression::None, Compression::Lz4, Compression::Zstd { level: 3 }] {
            let encoded = compress(codec, &payload).unwrap();
            assert_eq!(encoded[0], codec.tag());
            assert_eq!(
                decompress_with_hint(&encoded, Some(usize::MAX)).unwrap(),
                payload
            );
        }
    }

    #[test]
    fn zstd_level_change_reinitializes_context() {
        let data = b"some data that is compressed twice at different levels".repeat(8);
        let a = compress(Compression::Zstd { level: 1 }, &data).unwrap();
        let b = compress(Compression::Zstd { level: 19 }, &data).unwrap();
        assert_eq!(decompress(&a).unwrap(), data);
        assert_eq!(decompress(&b).unwrap(), data);
    }
}

use std::io::Read;

use fastcdc::v2020::{FastCDC, StreamCDC};

use arca_types::error::{ArcaError, Result};

use crate::config::ChunkerConfig;

/// One content-defined chunk read from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub offset: u64,
    pub length: usize,
    pub data: Vec<u8>,
}

/// Chunk a byte slice using FastCDC content-defined chunking.
/// Returns a vector of `(offset, length)` pairs.
pub fn chunk_data(data: &[u8], config: &ChunkerConfig) -> Vec<(usize, usize)> {
    let chunker = FastCDC::new(data, config.min_size, config.avg_size, config.max_size);
    chunker.map(|chunk| (chunk.offset, chunk.length)).collect()
}

/// Lazily chunk a reader. Boundaries are identical to [`chunk_data`] over
/// the same bytes; only one chunk is buffered at a time.
pub fn chunk_stream<R: Read>(reader: R, config: &ChunkerConfig) -> ChunkStream<R> {
    ChunkStream {
        inner: StreamCDC::new(reader, config.min_size, config.avg_size, config.max_size),
    }
}

pub struct ChunkStream<R: Read> {
    inner: StreamCDC<R>,
}

impl<R: Read> Iterator for ChunkStream<R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        Some(
            item.map(|c| Chunk {
                offset: c.offset,
                length: c.length,
                data: c.data,
            })
            .map_err(|e| match e {
                fastcdc::v2020::Error::IoError(io) => ArcaError::Io(io),
                other => ArcaError::Other(format!("chunker: {other}")),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_stay_within_bounds() {
        let config = ChunkerConfig {
            min_size: 64,
            avg_size: 256,
            max_size: 1024,
        };
        let data: Vec<u8> = (0..20_000u32).map(|i| (i * 31 % 251) as u8).collect();
        let chunks = chunk_data(&data, &config);
        let (last, rest) = chunks.split_last().unwrap();
        for (_, len) in rest {
            assert!(*len >= 64 && *len <= 1024, "chunk length {len}");
        }
        assert!(last.1 <= 1024);
    }
}

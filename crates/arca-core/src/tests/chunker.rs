use std::collections::HashSet;
use std::io::Cursor;

use crate::chunker::{chunk_data, chunk_stream};
use crate::testutil::{random_bytes, test_engine_config};

#[test]
fn boundaries_are_deterministic() {
    let config = test_engine_config().chunker;
    let data = random_bytes(200_000, 7);
    assert_eq!(chunk_data(&data, &config), chunk_data(&data, &config));
}

#[test]
fn stream_matches_slice_chunking() {
    let config = test_engine_config().chunker;
    let data = random_bytes(100_000, 11);
    let from_slice = chunk_data(&data, &config);
    let from_stream: Vec<(usize, usize)> = chunk_stream(Cursor::new(data.clone()), &config)
        .map(|c| {
            let c = c.unwrap();
            assert_eq!(&data[c.offset as usize..c.offset as usize + c.length], &c.data[..]);
            (c.offset as usize, c.length)
        })
        .collect();
    assert_eq!(from_slice, from_stream);
}

#[test]
fn chunks_cover_input_contiguously() {
    let config = test_engine_config().chunker;
    let data = random_bytes(50_000, 3);
    let mut expected_offset = 0;
    for (offset, length) in chunk_data(&data, &config) {
        assert_eq!(offset, expected_offset);
        expected_offset += length;
    }
    assert_eq!(expected_offset, data.len());
}

#[test]
fn empty_input_yields_no_chunks() {
    let config = test_engine_config().chunker;
    assert!(chunk_data(&[], &config).is_empty());
    assert_eq!(chunk_stream(Cursor::new(Vec::new()), &config).count(), 0);
}

#[test]
fn single_byte_insertion_only_changes_nearby_chunks() {
    let config = test_engine_config().chunker;
    let original = random_bytes(200_000, 42);
    let position = 100_000;
    let mut modified = original.clone();
    modified.insert(position, 0xAB);

    let slices = |data: &[u8]| -> Vec<Vec<u8>> {
        chunk_data(data, &config)
            .into_iter()
            .map(|(o, l)| data[o..o + l].to_vec())
            .collect()
    };
    let before = slices(&original);
    let after = slices(&modified);

    // Every chunk ending before the insertion point is unchanged.
    let mut end = 0;
    for (i, chunk) in before.iter().enumerate() {
        end += chunk.len();
        if end >= position {
            break;
        }
        assert_eq!(&after[i], chunk, "chunk {i} before the edit changed");
    }

    let known: HashSet<&Vec<u8>> = before.iter().collect();
    let changed = after.iter().filter(|c| !known.contains(c)).count();
    assert!(changed >= 1);
    assert!(changed <= 4, "{changed} chunks changed after a one-byte insert");
}

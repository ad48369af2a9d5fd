//! MTU-sized chunking of outbound payloads
//!
//! Chunks carry no framing: a receiver gets the raw slices and nothing tells it
//! where one message ends and the next begins.

use std::slice::Chunks;

use crate::error::ChunkError;
use crate::protocol::ATT_HEADER_SIZE;

/// Largest payload that fits one ATT packet at `mtu`, never below 1
pub fn chunk_size_for_mtu(mtu: u16) -> usize {
    (mtu as usize).saturating_sub(ATT_HEADER_SIZE).max(1)
}

/// Split `payload` into consecutive chunks of `chunk_size` bytes
///
/// The last chunk holds the remainder. An empty payload yields no chunks.
pub fn split(payload: &[u8], chunk_size: usize) -> Result<Chunks<'_, u8>, ChunkError> {
    if chunk_size == 0 {
        return Err(ChunkError::InvalidChunkSize(chunk_size));
    }
    Ok(payload.chunks(chunk_size))
}

/// Number of chunks [`split`] produces for a payload of `len` bytes
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    if chunk_size == 0 {
        return 0;
    }
    len.div_ceil(chunk_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_mtu_chunk_size() {
        assert_eq!(chunk_size_for_mtu(23), 20);
        assert_eq!(chunk_size_for_mtu(512), 509);
    }

    #[test]
    fn test_mtu_below_header_is_clamped() {
        assert_eq!(chunk_size_for_mtu(0), 1);
        assert_eq!(chunk_size_for_mtu(3), 1);
        assert_eq!(chunk_size_for_mtu(4), 1);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert_eq!(
            split(b"abc", 0).err(),
            Some(ChunkError::InvalidChunkSize(0))
        );
    }

    #[test]
    fn test_empty_payload_yields_nothing() {
        assert_eq!(split(&[], 20).unwrap().count(), 0);
        assert_eq!(chunk_count(0, 20), 0);
    }

    #[test]
    fn test_longer_message_splits_twenty_and_seventeen() {
        let payload = b"HELLO WORLD THIS IS A LONGER MESSAGE!";
        assert_eq!(payload.len(), 37);

        let chunks: Vec<&[u8]> = split(payload, chunk_size_for_mtu(23)).unwrap().collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 20);
        assert_eq!(chunks[1].len(), 17);
    }

    proptest! {
        #[test]
        fn prop_chunks_reconstruct_payload(
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
            size in 1usize..600,
        ) {
            let chunks: Vec<&[u8]> = split(&payload, size).unwrap().collect();

            prop_assert_eq!(chunks.len(), chunk_count(payload.len(), size));
            prop_assert_eq!(chunks.concat(), payload.clone());

            if let Some((last, rest)) = chunks.split_last() {
                prop_assert!(rest.iter().all(|c| c.len() == size));
                prop_assert!(!last.is_empty() && last.len() <= size);
            }
        }
    }
}

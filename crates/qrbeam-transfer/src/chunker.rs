/// Splits a file's bytes into ordered, 1-indexed chunks.

use crate::error::TransferError;

/// A slice of the source file. `index` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u32,
    pub bytes: Vec<u8>,
}

/// Split `data` into `ceil(len / chunk_size)` chunks. The last chunk carries the
/// remainder, or a full chunk when the length divides evenly.
pub fn split(data: &[u8], chunk_size: usize) -> Result<Vec<Chunk>, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::Config("chunk size must be at least 1".into()));
    }
    let count = data.len().div_ceil(chunk_size);
    if count > u32::MAX as usize {
        return Err(TransferError::Config(format!(
            "{} bytes at chunk size {} needs more than u32::MAX chunks",
            data.len(),
            chunk_size
        )));
    }

    Ok(data
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, bytes)| Chunk {
            index: i as u32 + 1,
            bytes: bytes.to_vec(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thousand_bytes_at_220() {
        let data = vec![7u8; 1000];
        let chunks = split(&data, 220).unwrap();
        let lens: Vec<usize> = chunks.iter().map(|c| c.bytes.len()).collect();
        assert_eq!(lens, vec![220, 220, 220, 220, 120]);
        let indices: Vec<u32> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_exact_multiple_keeps_full_tail() {
        let data = vec![1u8; 660];
        let chunks = split(&data, 220).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].bytes.len(), 220);
    }

    #[test]
    fn test_concatenation_reproduces_input() {
        let data: Vec<u8> = (0..997u32).map(|i| (i % 251) as u8).collect();
        for size in [1, 2, 3, 64, 220, 996, 997, 5000] {
            let joined: Vec<u8> = split(&data, size)
                .unwrap()
                .into_iter()
                .flat_map(|c| c.bytes)
                .collect();
            assert_eq!(joined, data, "chunk size {}", size);
        }
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(split(b"abc", 0), Err(TransferError::Config(_))));
    }

    #[test]
    fn test_empty_input() {
        assert!(split(&[], 220).unwrap().is_empty());
    }
}

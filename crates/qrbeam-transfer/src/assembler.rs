/// Reconstructs the file from the aggregator's data chunks.
///
/// Missing chunks are recorded as gaps rather than aborting, so the receiver
/// can always write a best-effort file. Anything with gaps is flagged as
/// unverified.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::aggregator::ReceiveAggregator;

/// Best-effort reconstruction of the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    pub bytes: Vec<u8>,
    /// Data chunk indices (1-based) absent from the output.
    pub gaps: Vec<u32>,
    /// Number of data chunks the session describes, 0 if the total was never learned.
    pub data_chunks: u32,
    /// Hex SHA-256 of `bytes`.
    pub sha256: String,
}

impl Assembly {
    /// True only when the session was known and every chunk made it in.
    pub fn is_verified(&self) -> bool {
        self.data_chunks > 0 && self.gaps.is_empty()
    }
}

/// Concatenate data chunks `1..=N`. Chunks rebuilt from parity carry zero
/// padding, so the final chunk is cut to the manifest's true tail length.
pub fn assemble(aggregator: &ReceiveAggregator) -> Assembly {
    let mut bytes = Vec::new();
    let mut gaps = Vec::new();
    let mut data_chunks = 0;

    if let (Some(layout), Some(manifest)) = (aggregator.layout(), aggregator.manifest()) {
        data_chunks = layout.data_chunks();
        for chunk in 1..=data_chunks {
            let payload = layout
                .frame_for_chunk(chunk)
                .and_then(|id| aggregator.get(id));
            match payload {
                Some(payload) if chunk == data_chunks => {
                    let tail = (manifest.tail_len as usize).min(payload.len());
                    bytes.extend_from_slice(&payload[..tail]);
                }
                Some(payload) => bytes.extend_from_slice(payload),
                None => gaps.push(chunk),
            }
        }
    }

    let sha256 = hex::encode(Sha256::digest(&bytes));
    Assembly {
        bytes,
        gaps,
        data_chunks,
        sha256,
    }
}

/// Write an assembly to `path`, creating parent directories.
pub fn write_assembly(path: &Path, assembly: &Assembly) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, &assembly.bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::split;
    use crate::fec::{FecPolicy, encode_frames, repair_all};

    fn source() -> Vec<u8> {
        (0..1000u32).map(|i| (i % 253) as u8 ^ 0x5a).collect()
    }

    fn receive(policy: FecPolicy, dropped: &[u32]) -> ReceiveAggregator {
        let frames = encode_frames(&split(&source(), 220).unwrap(), policy);
        let mut agg = ReceiveAggregator::new();
        for f in frames.into_iter().filter(|f| !dropped.contains(&f.frame_id)) {
            agg.accept(f);
        }
        repair_all(&mut agg);
        agg
    }

    #[test]
    fn test_complete_assembly_matches_source() {
        let out = assemble(&receive(FecPolicy::None, &[]));
        assert!(out.is_verified());
        assert_eq!(out.bytes, source());
        assert_eq!(out.data_chunks, 5);
        assert_eq!(out.sha256, hex::encode(Sha256::digest(source())));
    }

    #[test]
    fn test_gaps_are_recorded_not_fatal() {
        let out = assemble(&receive(FecPolicy::None, &[2, 4]));
        assert!(!out.is_verified());
        assert_eq!(out.gaps, vec![2, 4]);
        assert_eq!(out.bytes.len(), 1000 - 440);
    }

    #[test]
    fn test_repaired_tail_is_trimmed() {
        // Group 1 holds chunk 5 (120 bytes) and a parity; with group size 3,
        // group 1 is chunks 4 and 5 and the rebuilt tail comes back padded to 220.
        let out = assemble(&receive(FecPolicy::XorGroup(3), &[6]));
        assert!(out.is_verified());
        assert_eq!(out.bytes, source());
    }

    #[test]
    fn test_nothing_received() {
        let out = assemble(&ReceiveAggregator::new());
        assert!(out.bytes.is_empty());
        assert!(out.gaps.is_empty());
        assert!(!out.is_verified());
    }

    #[test]
    fn test_write_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.bin");
        let out = assemble(&receive(FecPolicy::None, &[]));
        write_assembly(&path, &out).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), source());
    }
}

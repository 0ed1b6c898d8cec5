/// Wire frame format for the optical channel.
///
/// ```text
/// [0..4]    Total frames in the session (u32 LE)
/// [4..8]    Frame ID, 1-based (u32 LE)
/// [8]       Parity flag (0 = data, 1 = parity)
/// [9..11]   Group size (u16 LE, 0 = no FEC)
/// [11..15]  True length of the final data chunk (u32 LE)
/// [15..n]   Payload (up to chunk_size bytes)
/// [n..n+4]  CRC32 over bytes [0..n] (u32 LE)
/// ```
///
/// 15-byte header + payload + 4-byte trailer. Before the bytes reach the symbol
/// codec they are mapped to printable text with standard base64.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::FrameError;

/// Header size in bytes.
pub const FRAME_HEADER: usize = 15;

/// Trailer (CRC32) size in bytes.
pub const FRAME_TRAILER: usize = 4;

/// Smallest buffer that can hold a frame with an empty payload.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER + FRAME_TRAILER;

/// Default chunk size. Keeps each symbol small enough to scan from a phone screen.
pub const DEFAULT_CHUNK_SIZE: usize = 220;

/// Byte capacity of the densest symbol the default codec targets
/// (QR version 40, error correction L, byte mode).
pub const SYMBOL_CAPACITY: usize = 2953;

/// Upper bound on `total_frames` accepted from the wire. Keeps a corrupt but
/// checksum-valid header from forcing a huge allocation on the receiver.
pub const MAX_TOTAL_FRAMES: u32 = 1 << 24;

/// Largest chunk size whose printable frame still fits in `capacity` bytes.
pub fn max_chunk_size(capacity: usize) -> usize {
    // base64 turns every 3 input bytes into 4 output bytes.
    (capacity / 4 * 3).saturating_sub(FRAME_OVERHEAD)
}

/// Length of the printable form of a frame carrying `payload_len` bytes.
pub fn printable_len(payload_len: usize) -> usize {
    (FRAME_OVERHEAD + payload_len).div_ceil(3) * 4
}

/// Per-session facts every frame repeats so the receiver can map frame ids
/// to groups and trim a reconstructed tail without any side channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Manifest {
    /// Data chunks per FEC group, 0 when FEC is disabled.
    pub group_size: u16,
    /// True byte length of the last data chunk.
    pub tail_len: u32,
}

/// One decoded, checksum-valid frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub total_frames: u32,
    pub frame_id: u32,
    pub is_parity: bool,
    pub manifest: Manifest,
    pub payload: Vec<u8>,
}

/// Encode a frame into its wire bytes, CRC32 trailer included.
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_OVERHEAD + frame.payload.len());
    buf.extend_from_slice(&frame.total_frames.to_le_bytes());
    buf.extend_from_slice(&frame.frame_id.to_le_bytes());
    buf.push(frame.is_parity as u8);
    buf.extend_from_slice(&frame.manifest.group_size.to_le_bytes());
    buf.extend_from_slice(&frame.manifest.tail_len.to_le_bytes());
    buf.extend_from_slice(&frame.payload);

    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Decode wire bytes into a frame. The checksum is verified before any header
/// field is trusted, so a damaged buffer never yields a partial frame.
pub fn decode_frame(data: &[u8]) -> Result<Frame, FrameError> {
    if data.len() < FRAME_OVERHEAD {
        return Err(FrameError::Malformed {
            len: data.len(),
            min: FRAME_OVERHEAD,
        });
    }

    let body_len = data.len() - FRAME_TRAILER;
    let (body, trailer) = data.split_at(body_len);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = crc32fast::hash(body);
    if expected != computed {
        return Err(FrameError::ChecksumMismatch { expected, computed });
    }

    let is_parity = match body[8] {
        0 => false,
        1 => true,
        _ => {
            return Err(FrameError::Malformed {
                len: data.len(),
                min: FRAME_OVERHEAD,
            });
        }
    };

    Ok(Frame {
        total_frames: u32::from_le_bytes([body[0], body[1], body[2], body[3]]),
        frame_id: u32::from_le_bytes([body[4], body[5], body[6], body[7]]),
        is_parity,
        manifest: Manifest {
            group_size: u16::from_le_bytes([body[9], body[10]]),
            tail_len: u32::from_le_bytes([body[11], body[12], body[13], body[14]]),
        },
        payload: body[FRAME_HEADER..].to_vec(),
    })
}

/// Map wire bytes to the printable text handed to the symbol codec.
pub fn to_printable(wire: &[u8]) -> String {
    STANDARD.encode(wire)
}

/// Inverse of [`to_printable`]. Surrounding whitespace from the scanner is ignored.
pub fn from_printable(text: &[u8]) -> Result<Vec<u8>, FrameError> {
    STANDARD
        .decode(text.trim_ascii())
        .map_err(|e| FrameError::Encoding(e.to_string()))
}

/// Full receive-side path: printable text → wire bytes → validated frame.
pub fn parse_symbol(text: &[u8]) -> Result<Frame, FrameError> {
    let wire = from_printable(text)?;
    decode_frame(&wire)
}

/// qrbeam transfer: one-way file transfer through a sequence of optical symbols.
///
/// Provides the protocol core for a screen-to-camera link with:
/// - Self-describing frames: header, payload and CRC32 trailer, base64 on the wire
/// - Optional XOR parity groups repairing one lost frame per group
/// - Write-once aggregation with a dense received bitfield
/// - Missing-set feedback through a shared, atomically replaced store
/// - Two-phase sender playback: full pass, then targeted retransmission
/// - Best-effort reassembly with SHA-256 reporting
///
/// Rendering, capture and the store sit behind traits; headless spool and
/// JSON file implementations are included.

pub mod aggregator;
pub mod assembler;
pub mod bitfield;
pub mod chunker;
pub mod device;
pub mod error;
pub mod fec;
pub mod logging;
pub mod missing;
pub mod protocol;
pub mod receiver;
pub mod sender;

// Re-export key types for convenience.
pub use aggregator::{Acceptance, Anomaly, ReceiveAggregator};
pub use assembler::{Assembly, assemble, write_assembly};
pub use bitfield::FrameBitfield;
pub use chunker::{Chunk, split};
pub use device::{
    CaptureDevice, DisplaySurface, Signal, SpoolCapture, SpoolDisplay, SymbolCodec,
    TextSymbolCodec, spawn_stdin_signals,
};
pub use error::{CodecError, FrameError, TransferError};
pub use fec::{FecPolicy, FrameLayout, GroupState};
pub use logging::{NullLogger, TracingLogger, TransferLogger};
pub use missing::{JsonFileStore, MemoryStore, MissingSetFeed, MissingSetTracker, MissingStore};
pub use protocol::{
    DEFAULT_CHUNK_SIZE, FRAME_HEADER, FRAME_OVERHEAD, FRAME_TRAILER, Frame, MAX_TOTAL_FRAMES,
    Manifest, SYMBOL_CAPACITY, decode_frame, encode_frame, from_printable, parse_symbol,
    to_printable,
};
pub use receiver::{
    ReceiveOutcome, ReceiverConfig, ReceiverProgress, ReceiverSession, ReceiverState,
    run_receiver,
};
pub use sender::{
    PlaybackScheduler, PreparedSession, RetryPolicy, SendOutcome, SenderConfig, SenderProgress,
    interval_for_fps, prepare_session, run_sender,
};

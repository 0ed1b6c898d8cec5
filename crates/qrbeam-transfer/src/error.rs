/// Error types shared by the sender and receiver pipelines.
use thiserror::Error;

/// Reasons a captured buffer is rejected before it reaches the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("malformed frame: {len} bytes, need at least {min}")]
    Malformed { len: usize, min: usize },

    #[error("checksum mismatch: frame says {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    #[error("invalid printable encoding: {0}")]
    Encoding(String),
}

/// Failures reported by a symbol codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("payload of {len} bytes exceeds symbol capacity of {capacity} bytes")]
    CapacityExceeded { len: usize, capacity: usize },
}

/// Session-level errors. Only configuration and device failures are fatal;
/// everything on the retransmission path is logged and retried instead.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("symbol codec: {0}")]
    Codec(#[from] CodecError),

    #[error("missing-set store unreadable: {0}")]
    StoreUnreadable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transfer logging trait for structured protocol events.
///
/// The sender and receiver loops report everything that matters for
/// debugging a lossy optical session through this trait, so an embedder can
/// route it to `tracing`, a UI overlay, or nowhere.

use std::fmt;

/// Structured log entry for a transfer operation.
#[derive(Debug, Clone)]
pub struct TransferLog {
    pub component: &'static str,
    pub event: TransferEvent,
}

/// Transfer events that can be logged.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Sender: file chunked and framed
    SessionPrepared {
        file_len: u64,
        data_chunks: u32,
        total_frames: u32,
        group_size: u16,
        sha256: String,
    },
    /// Sender: full pass started (or restarted)
    PassStarted { restarted: bool },
    /// Sender: one frame put on screen
    FrameShown { frame_id: u32, retransmit: bool },
    /// Sender: retransmission round started
    RetransmitRound { round: u32, missing_count: usize },
    /// Sender: poll interval grew because the missing set did not move
    Backoff { poll_ms: u64 },
    /// Sender: id in the missing set outside the session
    InvalidMissingId { frame_id: u32, total_frames: u32 },
    /// Sender: missing set could not be read this cycle
    StoreUnreadable { message: String },
    /// Sender: retry budget exhausted
    RetriesExhausted { rounds: u32, outstanding: usize },
    /// Sender: display or render failed mid-retransmission; `None` while waiting between rounds
    DisplayFailed { frame_id: Option<u32>, message: String },
    /// Receiver: first valid frame fixed the session shape
    TotalDiscovered { total_frames: u32, group_size: u16 },
    /// Receiver: frame stored
    FrameAccepted { frame_id: u32, received: u32, total_frames: u32 },
    /// Receiver: captured symbol failed to parse or verify
    FrameRejected { reason: String },
    /// Receiver: frame id outside the session
    UnknownFrameId { frame_id: u32, total_frames: u32 },
    /// Receiver: checksum-valid frame that contradicts the session
    ProtocolAnomaly { detail: String },
    /// Receiver: missing member rebuilt from parity
    GroupRepaired { group: u32, frame_id: u32 },
    /// Receiver: missing set written to the store
    MissingSetPersisted { missing_count: usize },
    /// Receiver: store write failed, retried later
    StoreWriteFailed { message: String },
    /// Receiver: chunk absent from the reconstructed file
    AssemblyGap { chunk_index: u32 },
    /// Receiver: writing the reconstructed file failed; frames are kept
    SaveFailed { path: String, message: String },
    /// Receiver: save requested before any valid frame arrived
    SaveSkipped { path: String },
    /// Receiver: reconstructed file written
    FileSaved {
        path: String,
        bytes: u64,
        verified: bool,
        sha256: String,
    },
    /// Session finished successfully
    TransferComplete { rounds: u32 },
    /// Session cancelled by the operator
    Cancelled,
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionPrepared { file_len, data_chunks, total_frames, group_size, sha256 } => {
                write!(f, "session_prepared bytes={} chunks={} frames={} group={} sha256={}", file_len, data_chunks, total_frames, group_size, sha256)
            }
            Self::PassStarted { restarted } => {
                write!(f, "pass_started restarted={}", restarted)
            }
            Self::FrameShown { frame_id, retransmit } => {
                write!(f, "frame_shown id={} retransmit={}", frame_id, retransmit)
            }
            Self::RetransmitRound { round, missing_count } => {
                write!(f, "retransmit_round round={} missing={}", round, missing_count)
            }
            Self::Backoff { poll_ms } => {
                write!(f, "backoff poll_ms={}", poll_ms)
            }
            Self::InvalidMissingId { frame_id, total_frames } => {
                write!(f, "invalid_missing_id id={} total={}", frame_id, total_frames)
            }
            Self::StoreUnreadable { message } => {
                write!(f, "store_unreadable: {}", message)
            }
            Self::RetriesExhausted { rounds, outstanding } => {
                write!(f, "retries_exhausted rounds={} outstanding={}", rounds, outstanding)
            }
            Self::DisplayFailed { frame_id: Some(id), message } => {
                write!(f, "display_failed id={}: {}", id, message)
            }
            Self::DisplayFailed { frame_id: None, message } => {
                write!(f, "display_failed id=-: {}", message)
            }
            Self::SaveFailed { path, message } => {
                write!(f, "save_failed path={}: {}", path, message)
            }
            Self::SaveSkipped { path } => {
                write!(f, "save_skipped path={} nothing received", path)
            }
            Self::TotalDiscovered { total_frames, group_size } => {
                write!(f, "total_discovered frames={} group={}", total_frames, group_size)
            }
            Self::FrameAccepted { frame_id, received, total_frames } => {
                write!(f, "frame_accepted id={} held={}/{}", frame_id, received, total_frames)
            }
            Self::FrameRejected { reason } => {
                write!(f, "frame_rejected: {}", reason)
            }
            Self::UnknownFrameId { frame_id, total_frames } => {
                write!(f, "unknown_frame_id id={} total={}", frame_id, total_frames)
            }
            Self::ProtocolAnomaly { detail } => {
                write!(f, "protocol_anomaly: {}", detail)
            }
            Self::GroupRepaired { group, frame_id } => {
                write!(f, "group_repaired group={} id={}", group, frame_id)
            }
            Self::MissingSetPersisted { missing_count } => {
                write!(f, "missing_set_persisted missing={}", missing_count)
            }
            Self::StoreWriteFailed { message } => {
                write!(f, "store_write_failed: {}", message)
            }
            Self::AssemblyGap { chunk_index } => {
                write!(f, "assembly_gap chunk={}", chunk_index)
            }
            Self::FileSaved { path, bytes, verified, sha256 } => {
                write!(f, "file_saved path={} bytes={} verified={} sha256={}", path, bytes, verified, sha256)
            }
            Self::TransferComplete { rounds } => {
                write!(f, "transfer_complete rounds={}", rounds)
            }
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Trait for transfer logging. Implementations can write to tracing, feed a
/// UI, or discard entries.
pub trait TransferLogger: Send + Sync {
    fn log(&self, entry: TransferLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn log(&self, entry: TransferLog) {
        // warn for anything an operator should look at, info for lifecycle,
        // debug for per-frame spam
        match &entry.event {
            TransferEvent::StoreUnreadable { .. }
            | TransferEvent::StoreWriteFailed { .. }
            | TransferEvent::RetriesExhausted { .. }
            | TransferEvent::UnknownFrameId { .. }
            | TransferEvent::ProtocolAnomaly { .. }
            | TransferEvent::InvalidMissingId { .. }
            | TransferEvent::DisplayFailed { .. }
            | TransferEvent::SaveFailed { .. }
            | TransferEvent::SaveSkipped { .. }
            | TransferEvent::AssemblyGap { .. } => {
                tracing::warn!(component = entry.component, "{}", entry.event);
            }
            TransferEvent::FileSaved { verified: false, .. } => {
                tracing::warn!(
                    component = entry.component,
                    "{} (integrity unverified)",
                    entry.event,
                );
            }
            TransferEvent::SessionPrepared { .. }
            | TransferEvent::PassStarted { .. }
            | TransferEvent::RetransmitRound { .. }
            | TransferEvent::TotalDiscovered { .. }
            | TransferEvent::GroupRepaired { .. }
            | TransferEvent::FileSaved { .. }
            | TransferEvent::TransferComplete { .. }
            | TransferEvent::Cancelled => {
                tracing::info!(component = entry.component, "{}", entry.event);
            }
            _ => {
                tracing::debug!(component = entry.component, "{}", entry.event);
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl TransferLogger for NullLogger {
    fn log(&self, _entry: TransferLog) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Collect(Mutex<Vec<String>>);

    impl TransferLogger for Collect {
        fn log(&self, entry: TransferLog) {
            self.0.lock().unwrap().push(format!("{}: {}", entry.component, entry.event));
        }
    }

    #[test]
    fn test_display_is_key_value() {
        let logger = Collect(Mutex::new(Vec::new()));
        logger.log(TransferLog {
            component: "receiver",
            event: TransferEvent::FrameAccepted {
                frame_id: 3,
                received: 2,
                total_frames: 7,
            },
        });
        logger.log(TransferLog {
            component: "sender",
            event: TransferEvent::RetransmitRound {
                round: 1,
                missing_count: 2,
            },
        });
        let lines = logger.0.lock().unwrap();
        assert_eq!(lines[0], "receiver: frame_accepted id=3 held=2/7");
        assert_eq!(lines[1], "sender: retransmit_round round=1 missing=2");
    }

    #[test]
    fn test_tracing_logger_accepts_every_level() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let logger = TracingLogger;
        for event in [
            TransferEvent::Cancelled,
            TransferEvent::FrameShown { frame_id: 1, retransmit: false },
            TransferEvent::AssemblyGap { chunk_index: 2 },
            TransferEvent::FileSaved {
                path: "out.bin".into(),
                bytes: 10,
                verified: false,
                sha256: String::new(),
            },
        ] {
            logger.log(TransferLog { component: "test", event });
        }
        NullLogger.log(TransferLog {
            component: "test",
            event: TransferEvent::Cancelled,
        });
    }
}

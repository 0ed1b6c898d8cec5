/// Optical receiver: capture loop feeding a receive session.
///
/// ```text
/// [Capture] ---> [Decode] ---> [Verify] ---> [Aggregate] ---> [Store]
/// next_image()   symbol →      base64 +      write-once       missing set
/// skip failures  text          CRC32         FEC repair       every N frames
/// ```
///
/// ```text
/// Idle → Listening(total unknown) → Listening(total known) → Complete → Saved
///                 └──────────────── Cancel ────────────────→ Aborted
/// ```
///
/// Single-threaded. Operator signals arrive on a channel and are drained
/// between captures.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use crossbeam_channel::Receiver;

use crate::aggregator::{Acceptance, ReceiveAggregator};
use crate::assembler::{Assembly, assemble, write_assembly};
use crate::device::{CaptureDevice, Signal, SymbolCodec};
use crate::error::{FrameError, TransferError};
use crate::fec::repair_for_frame;
use crate::logging::{TransferEvent, TransferLog, TransferLogger};
use crate::missing::{DEFAULT_PERSIST_EVERY, MissingSetTracker, MissingStore};
use crate::protocol::parse_symbol;

/// Receiver state constants.
pub const STATE_IDLE: u8 = 0;
pub const STATE_LISTENING: u8 = 1;
pub const STATE_COMPLETE: u8 = 3;
pub const STATE_SAVED: u8 = 4;
pub const STATE_CANCELLED: u8 = 5;

/// Receiver progress tracking.
pub struct ReceiverProgress {
    pub state: AtomicU8,
    pub cancelled: AtomicU8,
    pub frames_total: AtomicU64,
    pub frames_held: AtomicU64,
    pub frames_repaired: AtomicU64,
    pub frames_rejected: AtomicU64,
}

impl Default for ReceiverProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiverProgress {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_IDLE),
            cancelled: AtomicU8::new(0),
            frames_total: AtomicU64::new(0),
            frames_held: AtomicU64::new(0),
            frames_repaired: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(1, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed) != 0
    }
}

/// Where a receive session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    Listening { total: Option<u32> },
    /// Every data chunk is held, directly or repaired.
    Complete,
    Saved,
    Aborted,
}

impl ReceiverState {
    fn code(&self) -> u8 {
        match self {
            Self::Idle => STATE_IDLE,
            Self::Listening { .. } => STATE_LISTENING,
            Self::Complete => STATE_COMPLETE,
            Self::Saved => STATE_SAVED,
            Self::Aborted => STATE_CANCELLED,
        }
    }
}

/// Configuration for the receiver.
#[derive(Clone)]
pub struct ReceiverConfig {
    pub output_path: PathBuf,
    /// Newly held frames between missing-set writes.
    pub persist_every: u32,
    pub logger: Option<Arc<dyn TransferLogger>>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("received_output.bin"),
            persist_every: DEFAULT_PERSIST_EVERY,
            logger: None,
        }
    }
}

/// How a receive session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Saved(Assembly),
    Aborted,
}

/// One receive session: aggregation, repair, missing-set upkeep and saving.
pub struct ReceiverSession<S> {
    aggregator: ReceiveAggregator,
    tracker: MissingSetTracker<S>,
    state: ReceiverState,
    output_path: PathBuf,
    logger: Option<Arc<dyn TransferLogger>>,
    progress: Arc<ReceiverProgress>,
}

impl<S: MissingStore> ReceiverSession<S> {
    pub fn new(config: ReceiverConfig, store: S, progress: Arc<ReceiverProgress>) -> Self {
        Self {
            aggregator: ReceiveAggregator::new(),
            tracker: MissingSetTracker::new(store, config.persist_every),
            state: ReceiverState::Idle,
            output_path: config.output_path,
            logger: config.logger,
            progress,
        }
    }

    fn log(&self, event: TransferEvent) {
        if let Some(ref logger) = self.logger {
            logger.log(TransferLog {
                component: "receiver",
                event,
            });
        }
    }

    fn set_state(&mut self, state: ReceiverState) {
        self.state = state;
        self.progress.state.store(state.code(), Ordering::Relaxed);
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn aggregator(&self) -> &ReceiveAggregator {
        &self.aggregator
    }

    pub fn start(&mut self) {
        if self.state == ReceiverState::Idle {
            self.set_state(ReceiverState::Listening { total: None });
        }
    }

    /// Feed one decoded symbol. Rejected and ignored frames are logged and
    /// leave the session untouched; the caller just moves on.
    pub fn ingest(&mut self, text: &[u8]) -> Result<Acceptance, FrameError> {
        self.start();

        let frame = match parse_symbol(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.progress.frames_rejected.fetch_add(1, Ordering::Relaxed);
                self.log(TransferEvent::FrameRejected {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        let frame_id = frame.frame_id;
        let known_before = self.aggregator.total_frames().is_some();
        let acceptance = self.aggregator.accept(frame);

        // The first valid header fixes the session even if its own frame is refused.
        if !known_before {
            if let Some(total) = self.aggregator.total_frames() {
                self.progress.frames_total.store(total as u64, Ordering::Relaxed);
                self.log(TransferEvent::TotalDiscovered {
                    total_frames: total,
                    group_size: self.aggregator.manifest().unwrap_or_default().group_size,
                });
            }
        }

        match &acceptance {
            Acceptance::Accepted { .. } => {
                let total = self.aggregator.total_frames().unwrap_or(0);
                self.log(TransferEvent::FrameAccepted {
                    frame_id,
                    received: self.aggregator.received_count(),
                    total_frames: total,
                });
                if let Some(repaired) = repair_for_frame(&mut self.aggregator, frame_id) {
                    self.progress.frames_repaired.fetch_add(1, Ordering::Relaxed);
                    let group = self
                        .aggregator
                        .layout()
                        .and_then(|l| l.locate(repaired))
                        .and_then(|p| p.group)
                        .unwrap_or(0);
                    self.log(TransferEvent::GroupRepaired {
                        group,
                        frame_id: repaired,
                    });
                }
            }
            Acceptance::Duplicate => {}
            Acceptance::UnknownFrameId {
                frame_id,
                total_frames,
            } => {
                self.log(TransferEvent::UnknownFrameId {
                    frame_id: *frame_id,
                    total_frames: *total_frames,
                });
            }
            Acceptance::Anomaly(anomaly) => {
                self.log(TransferEvent::ProtocolAnomaly {
                    detail: format!("{:?}", anomaly),
                });
            }
        }

        self.progress
            .frames_held
            .store(self.aggregator.received_count() as u64, Ordering::Relaxed);

        if let Some(total) = self.aggregator.total_frames() {
            if self.aggregator.data_complete() {
                self.set_state(ReceiverState::Complete);
            } else {
                self.set_state(ReceiverState::Listening { total: Some(total) });
            }
        }

        match self.tracker.maybe_persist(&self.aggregator) {
            Ok(Some(missing_count)) => self.log(TransferEvent::MissingSetPersisted { missing_count }),
            Ok(None) => {}
            Err(e) => self.log(TransferEvent::StoreWriteFailed {
                message: e.to_string(),
            }),
        }

        Ok(acceptance)
    }

    /// Reconstruct and write the file. Always writes, even with gaps; the
    /// session only becomes `Saved` when the file is whole.
    /// Nothing is written before the first valid frame, so an early save
    /// never clobbers an existing file. A failed write is logged and
    /// returned; every held frame stays in the session.
    pub fn save(&mut self) -> Result<Assembly, TransferError> {
        let assembly = assemble(&self.aggregator);
        if assembly.data_chunks == 0 {
            self.log(TransferEvent::SaveSkipped {
                path: self.output_path.display().to_string(),
            });
            return Ok(assembly);
        }
        for &chunk_index in &assembly.gaps {
            self.log(TransferEvent::AssemblyGap { chunk_index });
        }
        if let Err(e) = write_assembly(&self.output_path, &assembly) {
            self.log(TransferEvent::SaveFailed {
                path: self.output_path.display().to_string(),
                message: e.to_string(),
            });
            return Err(e.into());
        }
        self.log(TransferEvent::FileSaved {
            path: self.output_path.display().to_string(),
            bytes: assembly.bytes.len() as u64,
            verified: assembly.is_verified(),
            sha256: assembly.sha256.clone(),
        });

        match self.tracker.persist(&self.aggregator) {
            Ok(missing_count) => self.log(TransferEvent::MissingSetPersisted { missing_count }),
            Err(e) => self.log(TransferEvent::StoreWriteFailed {
                message: e.to_string(),
            }),
        }

        if assembly.is_verified() {
            self.set_state(ReceiverState::Saved);
        }
        Ok(assembly)
    }

    pub fn abort(&mut self) {
        self.set_state(ReceiverState::Aborted);
        self.log(TransferEvent::Cancelled);
    }
}

/// Capture, decode and aggregate until the file is complete (auto-saved) or
/// the operator aborts. `Save` writes a best-effort file and keeps listening.
/// Failed saves are logged and never end the session; only losing the
/// capture device does.
pub fn run_receiver<C, K, S>(
    config: ReceiverConfig,
    codec: C,
    mut capture: K,
    store: S,
    signals: Receiver<Signal>,
    progress: Arc<ReceiverProgress>,
) -> Result<ReceiveOutcome, TransferError>
where
    C: SymbolCodec,
    K: CaptureDevice<Image = C::Image>,
    S: MissingStore,
{
    let mut session = ReceiverSession::new(config, store, progress.clone());
    session.start();
    let mut autosave_failed = false;

    loop {
        if progress.is_cancelled() {
            session.abort();
            return Ok(ReceiveOutcome::Aborted);
        }

        while let Ok(signal) = signals.try_recv() {
            match signal {
                Signal::Cancel => {
                    session.abort();
                    return Ok(ReceiveOutcome::Aborted);
                }
                Signal::Save => {
                    // Failures are logged by the session; keep listening.
                    if let Ok(assembly) = session.save() {
                        if session.state() == ReceiverState::Saved {
                            return Ok(ReceiveOutcome::Saved(assembly));
                        }
                    }
                }
                Signal::Restart | Signal::Continue => {}
            }
        }

        let Some(image) = capture.next_image()? else {
            continue;
        };
        let Some(text) = codec.decode(&image) else {
            continue;
        };
        if session.ingest(&text).is_err() {
            continue;
        }

        // One automatic attempt; after a failure the operator saves explicitly.
        if session.state() == ReceiverState::Complete && !autosave_failed {
            match session.save() {
                Ok(assembly) => return Ok(ReceiveOutcome::Saved(assembly)),
                Err(_) => autosave_failed = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::split;
    use crate::device::TextSymbolCodec;
    use crate::fec::{FecPolicy, encode_frames};
    use crate::missing::MemoryStore;
    use crate::protocol::{Frame, Manifest, encode_frame, to_printable};
    use std::collections::VecDeque;

    fn source() -> Vec<u8> {
        (0..1000u32).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn symbols(policy: FecPolicy) -> Vec<(u32, Vec<u8>)> {
        encode_frames(&split(&source(), 220).unwrap(), policy)
            .iter()
            .map(|f| (f.frame_id, to_printable(&encode_frame(f)).into_bytes()))
            .collect()
    }

    fn session(dir: &tempfile::TempDir) -> (ReceiverSession<MemoryStore>, MemoryStore) {
        let store = MemoryStore::new();
        let config = ReceiverConfig {
            output_path: dir.path().join("out.bin"),
            persist_every: 1,
            ..ReceiverConfig::default()
        };
        let session = ReceiverSession::new(config, store.clone(), Arc::new(ReceiverProgress::new()));
        (session, store)
    }

    #[test]
    fn test_single_loss_without_fec() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rx, store) = session(&dir);
        let all = symbols(FecPolicy::None);

        for (id, text) in &all {
            if *id != 3 {
                rx.ingest(text).unwrap();
            }
        }
        assert_eq!(rx.state(), ReceiverState::Listening { total: Some(5) });
        assert_eq!(store.load().unwrap(), Some(vec![3]));

        assert_eq!(rx.ingest(&all[2].1).unwrap(), Acceptance::Accepted { first: false });
        assert_eq!(rx.state(), ReceiverState::Complete);

        let saved = rx.save().unwrap();
        assert!(saved.is_verified());
        assert_eq!(rx.state(), ReceiverState::Saved);
        assert_eq!(std::fs::read(dir.path().join("out.bin")).unwrap(), source());
        assert_eq!(store.load().unwrap(), Some(vec![]));
    }

    #[test]
    fn test_single_loss_repaired_by_parity() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rx, store) = session(&dir);

        for (id, text) in symbols(FecPolicy::XorGroup(4)) {
            if id != 3 {
                rx.ingest(&text).unwrap();
            }
        }
        assert_eq!(rx.state(), ReceiverState::Complete);
        assert!(rx.aggregator().contains(3));
        assert_eq!(store.load().unwrap(), Some(vec![]));
        assert_eq!(rx.save().unwrap().bytes, source());
    }

    #[test]
    fn test_double_loss_waits_for_retransmit() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rx, store) = session(&dir);
        let all = symbols(FecPolicy::XorGroup(4));

        for (id, text) in &all {
            if *id != 3 && *id != 4 {
                rx.ingest(text).unwrap();
            }
        }
        assert_eq!(rx.state(), ReceiverState::Listening { total: Some(7) });
        assert_eq!(store.load().unwrap(), Some(vec![3, 4]));

        // One retransmitted member is enough; parity rebuilds the other.
        rx.ingest(&all[2].1).unwrap();
        assert_eq!(rx.state(), ReceiverState::Complete);
        assert!(rx.aggregator().contains(4));
    }

    #[test]
    fn test_first_frame_persists_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rx, store) = session(&dir);
        let all = symbols(FecPolicy::None);

        assert_eq!(rx.state(), ReceiverState::Idle);
        rx.ingest(&all[4].1).unwrap();
        assert_eq!(store.load().unwrap(), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_corrupt_symbol_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rx, _store) = session(&dir);
        let mut text = symbols(FecPolicy::None)[0].1.clone();
        text[10] = if text[10] == b'A' { b'B' } else { b'A' };

        assert!(rx.ingest(&text).is_err());
        assert!(rx.ingest(b"not base64 at all!").is_err());
        assert_eq!(rx.aggregator().total_frames(), None);
        assert_eq!(rx.progress.frames_rejected.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_explicit_save_keeps_listening() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rx, _store) = session(&dir);
        for (id, text) in symbols(FecPolicy::None) {
            if id != 2 {
                rx.ingest(&text).unwrap();
            }
        }
        let partial = rx.save().unwrap();
        assert_eq!(partial.gaps, vec![2]);
        assert!(!partial.is_verified());
        assert_eq!(rx.state(), ReceiverState::Listening { total: Some(5) });
        assert_eq!(std::fs::read(dir.path().join("out.bin")).unwrap().len(), 780);
    }

    #[test]
    fn test_total_discovered_from_refused_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rx, store) = session(&dir);
        let stray = Frame {
            total_frames: 5,
            frame_id: 9,
            is_parity: false,
            manifest: Manifest {
                group_size: 0,
                tail_len: 120,
            },
            payload: vec![0; 220],
        };
        let text = to_printable(&encode_frame(&stray)).into_bytes();

        assert_eq!(
            rx.ingest(&text).unwrap(),
            Acceptance::UnknownFrameId {
                frame_id: 9,
                total_frames: 5
            }
        );
        assert_eq!(rx.progress.frames_total.load(Ordering::Relaxed), 5);
        assert_eq!(rx.state(), ReceiverState::Listening { total: Some(5) });
        assert_eq!(store.load().unwrap(), Some(vec![1, 2, 3, 4, 5]));
    }

    #[test]
    fn test_early_save_leaves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rx, _store) = session(&dir);
        let out = dir.path().join("out.bin");
        std::fs::write(&out, b"previous run").unwrap();

        let assembly = rx.save().unwrap();
        assert_eq!(assembly.data_chunks, 0);
        assert_eq!(std::fs::read(&out).unwrap(), b"previous run");
        assert_eq!(rx.state(), ReceiverState::Idle);
    }

    #[test]
    fn test_failed_save_keeps_frames() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.bin");
        // A directory in the way makes the write fail.
        std::fs::create_dir(&out).unwrap();
        let (mut rx, _store) = session(&dir);
        for (_, text) in symbols(FecPolicy::None) {
            rx.ingest(&text).unwrap();
        }
        assert_eq!(rx.state(), ReceiverState::Complete);

        assert!(matches!(rx.save(), Err(TransferError::Io(_))));
        assert_eq!(rx.state(), ReceiverState::Complete);
        assert!(rx.aggregator().data_complete());

        std::fs::remove_dir(&out).unwrap();
        assert!(rx.save().unwrap().is_verified());
        assert_eq!(rx.state(), ReceiverState::Saved);
        assert_eq!(std::fs::read(&out).unwrap(), source());
    }

    struct QueueCapture(VecDeque<Option<Vec<u8>>>);

    /// Capture that can also press operator keys between images.
    struct OperatorCapture {
        steps: VecDeque<Result<Vec<u8>, Signal>>,
        keys: crossbeam_channel::Sender<Signal>,
    }

    impl CaptureDevice for OperatorCapture {
        type Image = Vec<u8>;

        fn next_image(&mut self) -> Result<Option<Vec<u8>>, TransferError> {
            match self.steps.pop_front() {
                Some(Ok(image)) => Ok(Some(image)),
                Some(Err(signal)) => {
                    self.keys.send(signal).unwrap();
                    Ok(None)
                }
                None => Err(TransferError::DeviceUnavailable("queue drained".into())),
            }
        }
    }

    #[test]
    fn test_run_receiver_survives_failed_saves() {
        let dir = tempfile::tempdir().unwrap();
        let all = symbols(FecPolicy::None);
        let mut steps: VecDeque<Result<Vec<u8>, Signal>> = VecDeque::new();
        steps.push_back(Ok(all[0].1.clone()));
        steps.push_back(Ok(all[1].1.clone()));
        steps.push_back(Err(Signal::Save));
        for (_, text) in &all[2..] {
            steps.push_back(Ok(text.clone()));
        }
        steps.push_back(Err(Signal::Cancel));
        let (keys, signals) = crossbeam_channel::unbounded();
        let progress = Arc::new(ReceiverProgress::new());

        // Output path is a directory: both the explicit save and the
        // automatic one on completion fail.
        let outcome = run_receiver(
            ReceiverConfig {
                output_path: dir.path().to_path_buf(),
                ..ReceiverConfig::default()
            },
            TextSymbolCodec::default(),
            OperatorCapture { steps, keys },
            MemoryStore::new(),
            signals,
            progress.clone(),
        )
        .unwrap();

        assert_eq!(outcome, ReceiveOutcome::Aborted);
        assert_eq!(progress.frames_held.load(Ordering::Relaxed), 5);
    }

    impl CaptureDevice for QueueCapture {
        type Image = Vec<u8>;

        fn next_image(&mut self) -> Result<Option<Vec<u8>>, TransferError> {
            self.0
                .pop_front()
                .ok_or_else(|| TransferError::DeviceUnavailable("queue drained".into()))
        }
    }

    #[test]
    fn test_run_receiver_autosaves() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue: VecDeque<Option<Vec<u8>>> = VecDeque::new();
        queue.push_back(None);
        queue.push_back(Some(b"garbage".to_vec()));
        for (_, text) in symbols(FecPolicy::XorGroup(2)) {
            queue.push_back(Some(text.clone()));
            queue.push_back(Some(text));
        }
        let (_tx, signals) = crossbeam_channel::unbounded();
        let progress = Arc::new(ReceiverProgress::new());

        let outcome = run_receiver(
            ReceiverConfig {
                output_path: dir.path().join("got.bin"),
                ..ReceiverConfig::default()
            },
            TextSymbolCodec::default(),
            QueueCapture(queue),
            MemoryStore::new(),
            signals,
            progress.clone(),
        )
        .unwrap();

        let ReceiveOutcome::Saved(assembly) = outcome else {
            panic!("expected a saved file");
        };
        assert_eq!(assembly.bytes, source());
        assert_eq!(std::fs::read(dir.path().join("got.bin")).unwrap(), source());
        assert_eq!(progress.state.load(Ordering::Relaxed), STATE_SAVED);
    }

    #[test]
    fn test_run_receiver_abort_and_partial_save() {
        let dir = tempfile::tempdir().unwrap();
        let all = symbols(FecPolicy::None);
        let queue: VecDeque<Option<Vec<u8>>> =
            all.iter().take(2).map(|(_, t)| Some(t.clone())).collect();
        let (tx, signals) = crossbeam_channel::unbounded();
        tx.send(Signal::Save).unwrap();
        tx.send(Signal::Cancel).unwrap();

        let outcome = run_receiver(
            ReceiverConfig {
                output_path: dir.path().join("partial.bin"),
                ..ReceiverConfig::default()
            },
            TextSymbolCodec::default(),
            QueueCapture(queue),
            MemoryStore::new(),
            signals,
            Arc::new(ReceiverProgress::new()),
        )
        .unwrap();

        assert_eq!(outcome, ReceiveOutcome::Aborted);
        // Save before anything valid arrived writes nothing.
        assert!(!dir.path().join("partial.bin").exists());
    }

    #[test]
    fn test_device_loss_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, signals) = crossbeam_channel::unbounded();
        let result = run_receiver(
            ReceiverConfig {
                output_path: dir.path().join("never.bin"),
                ..ReceiverConfig::default()
            },
            TextSymbolCodec::default(),
            QueueCapture(VecDeque::new()),
            MemoryStore::new(),
            signals,
            Arc::new(ReceiverProgress::new()),
        );
        assert!(matches!(result, Err(TransferError::DeviceUnavailable(_))));
    }
}

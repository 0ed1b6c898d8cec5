/// Optical sender: two-phase playback scheduler.
///
/// ```text
/// [Full pass] ---------------------------> [Retransmit loop]
/// frames 1..=total at primary interval      poll missing set
/// Restart → back to frame 1                 empty → done
/// Cancel  → abort                           else replay missing ids at
///                                           secondary interval, wait, repeat
/// ```
///
/// Single cooperative loop. Every suspension point is a display wait, so an
/// operator signal is seen within one frame interval.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::chunker;
use crate::device::{DisplaySurface, Signal, SymbolCodec};
use crate::error::TransferError;
use crate::fec::{FecPolicy, FrameLayout, encode_frames};
use crate::logging::{TransferEvent, TransferLog, TransferLogger};
use crate::missing::{FeedUpdate, MissingSetFeed, MissingStore};
use crate::protocol::*;

/// Sender state constants.
pub const STATE_IDLE: u8 = 0;
pub const STATE_FULL_PASS: u8 = 1;
pub const STATE_RETRANSMIT: u8 = 2;
pub const STATE_COMPLETE: u8 = 3;
pub const STATE_FAILED: u8 = 4;
pub const STATE_CANCELLED: u8 = 5;

/// Progress tracking for the sender, readable from another thread.
pub struct SenderProgress {
    pub state: AtomicU8,
    pub cancelled: AtomicU8,
    pub frames_total: AtomicU64,
    pub frames_shown: AtomicU64,
    pub retransmits: AtomicU64,
    pub rounds: AtomicU64,
}

impl Default for SenderProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl SenderProgress {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_IDLE),
            cancelled: AtomicU8::new(0),
            frames_total: AtomicU64::new(0),
            frames_shown: AtomicU64::new(0),
            retransmits: AtomicU64::new(0),
            rounds: AtomicU64::new(0),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(1, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed) != 0
    }
}

/// Bound on the retransmission loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retransmission rounds before giving up. 0 = retry until the receiver
    /// reports nothing missing.
    pub max_rounds: u32,
    /// Poll interval multiplier applied while the missing set is unchanged.
    pub backoff_factor: f64,
    /// Ceiling for the backed-off poll interval.
    pub max_poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_rounds: 600,
            backoff_factor: 1.5,
            max_poll_interval: Duration::from_secs(10),
        }
    }
}

/// Configuration for the sender.
#[derive(Clone)]
pub struct SenderConfig {
    pub chunk_size: usize,
    pub fec: FecPolicy,
    /// Time each frame stays up during the full pass.
    pub primary_interval: Duration,
    /// Time each frame stays up during retransmission.
    pub secondary_interval: Duration,
    /// Wait between retransmission rounds.
    pub poll_interval: Duration,
    /// Show frame 1 and wait for a key before the full pass.
    pub start_gate: bool,
    pub retry: RetryPolicy,
    pub logger: Option<Arc<dyn TransferLogger>>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            fec: FecPolicy::None,
            primary_interval: Duration::from_millis(125),
            secondary_interval: Duration::from_millis(250),
            poll_interval: Duration::from_secs(1),
            start_gate: false,
            retry: RetryPolicy::default(),
            logger: None,
        }
    }
}

/// Frame interval for a frame rate given in frames per second.
pub fn interval_for_fps(fps: f64) -> Result<Duration, TransferError> {
    if !(fps.is_finite() && fps > 0.0) {
        return Err(TransferError::Config(format!(
            "frame rate must be positive, got {}",
            fps
        )));
    }
    Ok(Duration::from_secs_f64(1.0 / fps))
}

/// A file cut into frames, ready for playback.
#[derive(Debug, Clone)]
pub struct PreparedSession {
    pub frames: Vec<Frame>,
    pub layout: FrameLayout,
    pub file_len: u64,
    /// Hex SHA-256 of the source file, for comparing with the receiver's log.
    pub sha256: String,
}

/// Chunk and frame `data`. Rejects empty input, chunk sizes that would not fit
/// in one symbol of `capacity` bytes, and sessions too large for the wire.
pub fn prepare_session(
    data: &[u8],
    chunk_size: usize,
    fec: FecPolicy,
    capacity: usize,
) -> Result<PreparedSession, TransferError> {
    if data.is_empty() {
        return Err(TransferError::Config("nothing to send: file is empty".into()));
    }
    let max = max_chunk_size(capacity);
    if chunk_size > max {
        return Err(TransferError::Config(format!(
            "chunk size {} exceeds {} bytes, the most one symbol of {} bytes can carry",
            chunk_size, max, capacity
        )));
    }

    let chunks = chunker::split(data, chunk_size)?;
    let layout = FrameLayout::for_chunks(chunks.len() as u32, fec)
        .filter(|l| l.total_frames() <= MAX_TOTAL_FRAMES)
        .ok_or_else(|| {
            TransferError::Config(format!(
                "{} chunks exceed the {} frame limit",
                chunks.len(),
                MAX_TOTAL_FRAMES
            ))
        })?;
    let frames = encode_frames(&chunks, fec);

    Ok(PreparedSession {
        frames,
        layout,
        file_len: data.len() as u64,
        sha256: hex::encode(Sha256::digest(data)),
    })
}

/// How a send session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Receiver reported nothing missing after `rounds` retransmission rounds.
    Completed { rounds: u32 },
    /// Operator cancelled.
    Cancelled,
    /// Retry budget exhausted with frames still outstanding.
    Failed { rounds: u32, outstanding: Vec<u32> },
}

enum Step {
    Continue,
    Cancelled,
}

/// Drives a display through the full pass and the retransmission loop.
pub struct PlaybackScheduler<C, D, S> {
    config: SenderConfig,
    codec: C,
    display: D,
    feed: MissingSetFeed<S>,
    progress: Arc<SenderProgress>,
}

impl<C, D, S> PlaybackScheduler<C, D, S>
where
    C: SymbolCodec,
    D: DisplaySurface<Image = C::Image>,
    S: MissingStore,
{
    pub fn new(
        config: SenderConfig,
        codec: C,
        display: D,
        store: S,
        progress: Arc<SenderProgress>,
    ) -> Self {
        Self {
            config,
            codec,
            display,
            feed: MissingSetFeed::new(store),
            progress,
        }
    }

    fn log(&self, event: TransferEvent) {
        if let Some(ref logger) = self.config.logger {
            logger.log(TransferLog {
                component: "sender",
                event,
            });
        }
    }

    fn finish(&self, state: u8, outcome: SendOutcome) -> Result<SendOutcome, TransferError> {
        self.progress.state.store(state, Ordering::Relaxed);
        if outcome == SendOutcome::Cancelled {
            self.log(TransferEvent::Cancelled);
        }
        Ok(outcome)
    }

    fn render(&self, frame: &Frame) -> Result<C::Image, TransferError> {
        let text = to_printable(&encode_frame(frame));
        Ok(self.codec.encode(text.as_bytes())?)
    }

    /// Run both phases for `session`. Blocks until done, cancelled or failed.
    pub fn run(&mut self, session: &PreparedSession) -> Result<SendOutcome, TransferError> {
        self.progress
            .frames_total
            .store(session.frames.len() as u64, Ordering::Relaxed);

        if self.config.start_gate {
            if let Step::Cancelled = self.start_gate(session)? {
                return self.finish(STATE_CANCELLED, SendOutcome::Cancelled);
            }
        }

        self.progress.state.store(STATE_FULL_PASS, Ordering::Relaxed);
        if let Step::Cancelled = self.full_pass(session)? {
            return self.finish(STATE_CANCELLED, SendOutcome::Cancelled);
        }

        self.progress.state.store(STATE_RETRANSMIT, Ordering::Relaxed);
        self.retransmit_loop(session)
    }

    fn start_gate(&mut self, session: &PreparedSession) -> Result<Step, TransferError> {
        let Some(first) = session.frames.first() else {
            return Ok(Step::Continue);
        };
        let image = self.render(first)?;
        let signal = self
            .display
            .show(&image, "Press any key to start full playback", None)?;
        Ok(match signal {
            Some(Signal::Cancel) => Step::Cancelled,
            _ => Step::Continue,
        })
    }

    /// Phase 1: every frame in order. Restart goes back to frame 1.
    fn full_pass(&mut self, session: &PreparedSession) -> Result<Step, TransferError> {
        self.log(TransferEvent::PassStarted { restarted: false });
        let mut i = 0;
        while i < session.frames.len() {
            if self.progress.is_cancelled() {
                return Ok(Step::Cancelled);
            }
            let frame = &session.frames[i];
            let image = self.render(frame)?;
            let caption = format!("Frame #{}", frame.frame_id);
            let signal = self
                .display
                .show(&image, &caption, Some(self.config.primary_interval))?;
            self.progress.frames_shown.fetch_add(1, Ordering::Relaxed);
            self.log(TransferEvent::FrameShown {
                frame_id: frame.frame_id,
                retransmit: false,
            });

            match signal {
                Some(Signal::Cancel) => return Ok(Step::Cancelled),
                Some(Signal::Restart) => {
                    self.log(TransferEvent::PassStarted { restarted: true });
                    i = 0;
                }
                _ => i += 1,
            }
        }
        Ok(Step::Continue)
    }

    /// Phase 2: replay whatever the receiver still reports missing.
    fn retransmit_loop(&mut self, session: &PreparedSession) -> Result<SendOutcome, TransferError> {
        let total = session.layout.total_frames();
        let retry = self.config.retry;
        let mut poll = self.config.poll_interval;
        let mut previous: Option<Vec<u32>> = None;
        let mut round = 0u32;

        loop {
            if self.progress.is_cancelled() {
                return self.finish(STATE_CANCELLED, SendOutcome::Cancelled);
            }

            if let FeedUpdate::Unreadable(message) = self.feed.poll() {
                self.log(TransferEvent::StoreUnreadable { message });
            }
            let missing = self.feed.current().to_vec();

            if missing.is_empty() {
                self.log(TransferEvent::TransferComplete { rounds: round });
                return self.finish(STATE_COMPLETE, SendOutcome::Completed { rounds: round });
            }
            if retry.max_rounds > 0 && round >= retry.max_rounds {
                self.log(TransferEvent::RetriesExhausted {
                    rounds: round,
                    outstanding: missing.len(),
                });
                return self.finish(
                    STATE_FAILED,
                    SendOutcome::Failed {
                        rounds: round,
                        outstanding: missing,
                    },
                );
            }

            round += 1;
            self.progress.rounds.store(round as u64, Ordering::Relaxed);
            self.log(TransferEvent::RetransmitRound {
                round,
                missing_count: missing.len(),
            });

            for &id in &missing {
                if id == 0 || id > total {
                    self.log(TransferEvent::InvalidMissingId {
                        frame_id: id,
                        total_frames: total,
                    });
                    continue;
                }
                if self.progress.is_cancelled() {
                    return self.finish(STATE_CANCELLED, SendOutcome::Cancelled);
                }
                let frame = &session.frames[(id - 1) as usize];
                let caption = format!("Missing Frame #{}", id);
                let shown = self.render(frame).and_then(|image| {
                    self.display
                        .show(&image, &caption, Some(self.config.secondary_interval))
                });
                // A failed frame stays in the missing set and comes back next round.
                let signal = match shown {
                    Ok(signal) => signal,
                    Err(e) => {
                        self.log(TransferEvent::DisplayFailed {
                            frame_id: Some(id),
                            message: e.to_string(),
                        });
                        continue;
                    }
                };
                self.progress.retransmits.fetch_add(1, Ordering::Relaxed);
                self.log(TransferEvent::FrameShown {
                    frame_id: id,
                    retransmit: true,
                });
                if signal == Some(Signal::Cancel) {
                    return self.finish(STATE_CANCELLED, SendOutcome::Cancelled);
                }
            }

            // Back off while the receiver makes no progress.
            if previous.as_deref() == Some(missing.as_slice()) {
                poll = poll
                    .mul_f64(retry.backoff_factor)
                    .min(retry.max_poll_interval.max(self.config.poll_interval));
                self.log(TransferEvent::Backoff {
                    poll_ms: poll.as_millis() as u64,
                });
            } else {
                poll = self.config.poll_interval;
            }
            previous = Some(missing);

            match self.display.wait(poll) {
                Ok(Some(Signal::Cancel)) => {
                    return self.finish(STATE_CANCELLED, SendOutcome::Cancelled);
                }
                Ok(_) => {}
                Err(e) => {
                    self.log(TransferEvent::DisplayFailed {
                        frame_id: None,
                        message: e.to_string(),
                    });
                    thread::sleep(poll);
                }
            }
        }
    }
}

/// Read `file_path`, frame it, and run a full playback session.
pub fn run_sender<C, D, S>(
    config: SenderConfig,
    file_path: &Path,
    codec: C,
    display: D,
    store: S,
    progress: Arc<SenderProgress>,
) -> Result<SendOutcome, TransferError>
where
    C: SymbolCodec,
    D: DisplaySurface<Image = C::Image>,
    S: MissingStore,
{
    let data = std::fs::read(file_path)?;
    let session = prepare_session(&data, config.chunk_size, config.fec, codec.capacity())?;

    if let Some(ref logger) = config.logger {
        logger.log(TransferLog {
            component: "sender",
            event: TransferEvent::SessionPrepared {
                file_len: session.file_len,
                data_chunks: session.layout.data_chunks(),
                total_frames: session.layout.total_frames(),
                group_size: session.layout.group_size(),
                sha256: session.sha256.clone(),
            },
        });
    }

    let mut scheduler = PlaybackScheduler::new(config, codec, display, store, progress);
    scheduler.run(&session)
}

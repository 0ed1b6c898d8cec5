/// Seams to the outside world: symbol codec, display surface, capture device,
/// and operator signals.
///
/// The protocol core only talks to these traits. The headless
/// implementations here stand in for a screen/camera pair with a spool
/// directory:
///
/// ```text
/// [SpoolDisplay] --atomic replace--> <spool>/current.sym <--poll-- [SpoolCapture]
/// ```

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use tempfile::NamedTempFile;

use crate::error::{CodecError, TransferError};
use crate::protocol::SYMBOL_CAPACITY;

/// File inside the spool directory holding the symbol currently on "screen".
pub const SPOOL_SYMBOL_FILE: &str = "current.sym";

/// Operator input, decoupled from physical key codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Abort the session.
    Cancel,
    /// Restart the full pass from frame 1.
    Restart,
    /// Write the reconstructed file now.
    Save,
    /// Any other key.
    Continue,
}

/// Turns printable frame text into a scannable image and back.
pub trait SymbolCodec {
    type Image;

    /// Largest text the codec can place in one symbol.
    fn capacity(&self) -> usize;

    fn encode(&self, text: &[u8]) -> Result<Self::Image, CodecError>;

    /// `None` when no symbol was found or it could not be read. Callers must
    /// still verify the frame checksum.
    fn decode(&self, image: &Self::Image) -> Option<Vec<u8>>;
}

/// Something that can put an image in front of the camera.
pub trait DisplaySurface {
    type Image;

    /// Render `image` and wait up to `wait` (forever when `None`) for an
    /// operator signal.
    fn show(
        &mut self,
        image: &Self::Image,
        caption: &str,
        wait: Option<Duration>,
    ) -> Result<Option<Signal>, TransferError>;

    /// Keep the current image up for `timeout` and collect any signal.
    fn wait(&mut self, timeout: Duration) -> Result<Option<Signal>, TransferError>;
}

/// Source of captured images.
pub trait CaptureDevice {
    type Image;

    /// Block for the next image. `Ok(None)` means this acquisition failed and
    /// should be skipped; `Err` means the device is gone.
    fn next_image(&mut self) -> Result<Option<Self::Image>, TransferError>;
}

/// Codec whose "image" is the printable text itself. Enforces the byte
/// capacity of the symbol it stands in for.
#[derive(Debug, Clone, Copy)]
pub struct TextSymbolCodec {
    capacity: usize,
}

impl TextSymbolCodec {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }
}

impl Default for TextSymbolCodec {
    fn default() -> Self {
        Self::new(SYMBOL_CAPACITY)
    }
}

impl SymbolCodec for TextSymbolCodec {
    type Image = Vec<u8>;

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn encode(&self, text: &[u8]) -> Result<Vec<u8>, CodecError> {
        if text.len() > self.capacity {
            return Err(CodecError::CapacityExceeded {
                len: text.len(),
                capacity: self.capacity,
            });
        }
        Ok(text.to_vec())
    }

    fn decode(&self, image: &Vec<u8>) -> Option<Vec<u8>> {
        if image.is_empty() {
            None
        } else {
            Some(image.clone())
        }
    }
}

/// Display that writes each symbol into a spool directory and takes operator
/// signals from a channel.
pub struct SpoolDisplay {
    dir: PathBuf,
    signals: Receiver<Signal>,
}

impl SpoolDisplay {
    pub fn open(dir: impl Into<PathBuf>, signals: Receiver<Signal>) -> Result<Self, TransferError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            TransferError::DeviceUnavailable(format!("spool dir {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir, signals })
    }

    pub fn symbol_path(&self) -> PathBuf {
        self.dir.join(SPOOL_SYMBOL_FILE)
    }
}

impl DisplaySurface for SpoolDisplay {
    type Image = Vec<u8>;

    fn show(
        &mut self,
        image: &Vec<u8>,
        caption: &str,
        wait: Option<Duration>,
    ) -> Result<Option<Signal>, TransferError> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(image)?;
        tmp.flush()?;
        tmp.persist(self.symbol_path()).map_err(|e| e.error)?;
        tracing::trace!(caption, bytes = image.len(), "symbol displayed");

        match wait {
            Some(timeout) => self.wait(timeout),
            None => Ok(Some(self.signals.recv().unwrap_or(Signal::Continue))),
        }
    }

    fn wait(&mut self, timeout: Duration) -> Result<Option<Signal>, TransferError> {
        match self.signals.recv_timeout(timeout) {
            Ok(signal) => Ok(Some(signal)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                // No operator attached: still honor the interval.
                thread::sleep(timeout);
                Ok(None)
            }
        }
    }
}

/// Capture that polls the spool directory's symbol file at a fixed rate.
pub struct SpoolCapture {
    path: PathBuf,
    interval: Duration,
    last: Option<Vec<u8>>,
}

impl SpoolCapture {
    /// Fails with `DeviceUnavailable` if the spool directory does not exist.
    pub fn open(dir: &Path, interval: Duration) -> Result<Self, TransferError> {
        if !dir.is_dir() {
            return Err(TransferError::DeviceUnavailable(format!(
                "spool dir {} does not exist",
                dir.display()
            )));
        }
        Ok(Self {
            path: dir.join(SPOOL_SYMBOL_FILE),
            interval,
            last: None,
        })
    }
}

impl CaptureDevice for SpoolCapture {
    type Image = Vec<u8>;

    fn next_image(&mut self) -> Result<Option<Vec<u8>>, TransferError> {
        thread::sleep(self.interval);
        match std::fs::read(&self.path) {
            Ok(bytes) if self.last.as_ref() != Some(&bytes) => {
                self.last = Some(bytes.clone());
                Ok(Some(bytes))
            }
            // Same symbol still on screen.
            Ok(_) => Ok(None),
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::debug!(error = %e, "capture skipped");
                }
                Ok(None)
            }
        }
    }
}

/// Read operator keys from stdin, one per line, on a side thread. `map`
/// turns a trimmed line into a signal; unmapped lines are dropped.
pub fn spawn_stdin_signals<F>(map: F) -> Receiver<Signal>
where
    F: Fn(&str) -> Option<Signal> + Send + 'static,
{
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if let Some(signal) = map(line.trim()) {
                if tx.send(signal).is_err() {
                    break;
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_codec_capacity() {
        let codec = TextSymbolCodec::new(4);
        assert_eq!(codec.encode(b"abcd").unwrap(), b"abcd".to_vec());
        assert_eq!(
            codec.encode(b"abcde"),
            Err(CodecError::CapacityExceeded { len: 5, capacity: 4 })
        );
        assert_eq!(codec.decode(&b"abcd".to_vec()), Some(b"abcd".to_vec()));
        assert_eq!(codec.decode(&Vec::new()), None);
    }

    #[test]
    fn test_spool_display_feeds_capture() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = unbounded();
        let mut display = SpoolDisplay::open(dir.path(), rx).unwrap();
        let mut capture = SpoolCapture::open(dir.path(), Duration::from_millis(1)).unwrap();

        assert_eq!(capture.next_image().unwrap(), None);

        let shown = display
            .show(&b"frame-1".to_vec(), "Frame #1", Some(Duration::from_millis(1)))
            .unwrap();
        assert_eq!(shown, None);
        assert_eq!(capture.next_image().unwrap(), Some(b"frame-1".to_vec()));
        // Unchanged screen yields nothing new.
        assert_eq!(capture.next_image().unwrap(), None);

        tx.send(Signal::Cancel).unwrap();
        let shown = display
            .show(&b"frame-2".to_vec(), "Frame #2", Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(shown, Some(Signal::Cancel));
        assert_eq!(capture.next_image().unwrap(), Some(b"frame-2".to_vec()));
    }

    #[test]
    fn test_capture_requires_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            SpoolCapture::open(&missing, Duration::ZERO),
            Err(TransferError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn test_untimed_wait_without_operator_continues() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = unbounded::<Signal>();
        drop(tx);
        let mut display = SpoolDisplay::open(dir.path(), rx).unwrap();
        assert_eq!(
            display.show(&b"x".to_vec(), "start", None).unwrap(),
            Some(Signal::Continue)
        );
    }
}

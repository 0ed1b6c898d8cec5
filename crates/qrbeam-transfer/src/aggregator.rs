/// Receiver-side store of checksum-valid frames, keyed by frame id.
///
/// The first valid frame of a session fixes `total_frames` and the manifest.
/// From then on membership is a dense [`FrameBitfield`] and payloads live in a
/// slot vector indexed by `frame_id - 1`. Inserts are write-once: the first
/// arrival wins and later copies of the same id are ignored.

use crate::bitfield::FrameBitfield;
use crate::fec::{FrameLayout, FrameRole};
use crate::protocol::{Frame, MAX_TOTAL_FRAMES, Manifest};

/// A frame that passed its checksum but disagrees with the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// Header describes a frame count no sender could produce.
    InvalidLayout { total_frames: u32, group_size: u16 },
    /// Header reports a different total than the one fixed for this session.
    TotalMismatch { expected: u32, got: u32 },
    /// Header reports a different group size or tail length.
    ManifestMismatch { expected: Manifest, got: Manifest },
    /// Parity flag contradicts the frame's position in its group.
    RoleMismatch { frame_id: u32, is_parity: bool },
}

/// Outcome of offering a frame to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acceptance {
    /// Stored. `first` is set when this frame fixed the session's total.
    Accepted { first: bool },
    /// Id already held; state unchanged.
    Duplicate,
    /// Id outside `1..=total_frames`.
    UnknownFrameId { frame_id: u32, total_frames: u32 },
    /// Protocol anomaly; frame ignored.
    Anomaly(Anomaly),
}

/// Accumulates frames for one receive session.
#[derive(Debug)]
pub struct ReceiveAggregator {
    layout: Option<FrameLayout>,
    manifest: Option<Manifest>,
    present: FrameBitfield,
    payloads: Vec<Option<Vec<u8>>>,
}

impl Default for ReceiveAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveAggregator {
    pub fn new() -> Self {
        Self {
            layout: None,
            manifest: None,
            present: FrameBitfield::new(0),
            payloads: Vec::new(),
        }
    }

    /// Offer a checksum-valid frame.
    pub fn accept(&mut self, frame: Frame) -> Acceptance {
        let mut first = false;
        let layout = match (self.layout, self.manifest) {
            (Some(layout), Some(manifest)) => {
                if frame.total_frames != layout.total_frames() {
                    return Acceptance::Anomaly(Anomaly::TotalMismatch {
                        expected: layout.total_frames(),
                        got: frame.total_frames,
                    });
                }
                if frame.manifest != manifest {
                    return Acceptance::Anomaly(Anomaly::ManifestMismatch {
                        expected: manifest,
                        got: frame.manifest,
                    });
                }
                layout
            }
            _ => {
                let invalid = Anomaly::InvalidLayout {
                    total_frames: frame.total_frames,
                    group_size: frame.manifest.group_size,
                };
                if frame.total_frames > MAX_TOTAL_FRAMES {
                    return Acceptance::Anomaly(invalid);
                }
                let Some(layout) =
                    FrameLayout::from_total(frame.total_frames, frame.manifest.group_size)
                else {
                    return Acceptance::Anomaly(invalid);
                };
                self.layout = Some(layout);
                self.manifest = Some(frame.manifest);
                self.present = FrameBitfield::new(layout.total_frames());
                self.payloads = vec![None; layout.total_frames() as usize];
                first = true;
                layout
            }
        };

        let Some(position) = layout.locate(frame.frame_id) else {
            return Acceptance::UnknownFrameId {
                frame_id: frame.frame_id,
                total_frames: layout.total_frames(),
            };
        };
        if (position.role == FrameRole::Parity) != frame.is_parity {
            return Acceptance::Anomaly(Anomaly::RoleMismatch {
                frame_id: frame.frame_id,
                is_parity: frame.is_parity,
            });
        }

        if self.insert(frame.frame_id, frame.payload) {
            Acceptance::Accepted { first }
        } else {
            Acceptance::Duplicate
        }
    }

    /// Store `payload` under `frame_id` unless already held. Used directly by
    /// FEC repair. Returns true if stored.
    pub fn insert(&mut self, frame_id: u32, payload: Vec<u8>) -> bool {
        if !self.present.set(frame_id) {
            return false;
        }
        self.payloads[(frame_id - 1) as usize] = Some(payload);
        true
    }

    pub fn contains(&self, frame_id: u32) -> bool {
        self.present.get(frame_id)
    }

    pub fn get(&self, frame_id: u32) -> Option<&[u8]> {
        if !self.present.get(frame_id) {
            return None;
        }
        self.payloads[(frame_id - 1) as usize].as_deref()
    }

    /// Frames held, received directly or repaired.
    pub fn received_count(&self) -> u32 {
        self.present.received()
    }

    pub fn total_frames(&self) -> Option<u32> {
        self.layout.map(|l| l.total_frames())
    }

    pub fn layout(&self) -> Option<FrameLayout> {
        self.layout
    }

    pub fn manifest(&self) -> Option<Manifest> {
        self.manifest
    }

    /// Missing frame ids, ascending. Empty while the total is unknown.
    pub fn missing_frames(&self) -> Vec<u32> {
        self.present.missing_frames()
    }

    /// True once every frame id is held.
    pub fn is_complete(&self) -> bool {
        self.layout.is_some() && self.present.is_complete()
    }

    /// True once every data chunk is held, whether or not parity frames are.
    pub fn data_complete(&self) -> bool {
        let Some(layout) = self.layout else {
            return false;
        };
        (1..=layout.data_chunks())
            .all(|chunk| layout.frame_for_chunk(chunk).is_some_and(|id| self.contains(id)))
    }
}

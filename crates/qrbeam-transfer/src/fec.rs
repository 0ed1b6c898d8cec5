/// XOR-parity forward error correction over fixed-size chunk groups.
///
/// ```text
/// group 0: [chunk 1][chunk 2] .. [chunk G][parity]   frames 1 ..= G+1
/// group 1: [chunk G+1] ..        [chunk 2G][parity]  frames G+2 ..= 2G+2
/// last:    [chunk ..][chunk N][parity]               may hold fewer than G chunks
/// ```
///
/// Parity is the XOR of every member zero-padded on the right to the longest
/// member, so any single missing member of a group can be rebuilt from the
/// other `G`. Group boundaries follow data-chunk index, which makes the
/// position of every frame a pure function of `frame_id`, `total_frames` and
/// the group size.

use std::ops::RangeInclusive;

use crate::aggregator::ReceiveAggregator;
use crate::chunker::Chunk;
use crate::protocol::{Frame, Manifest};

/// Forward error correction policy, fixed for a session at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FecPolicy {
    /// Every frame carries one data chunk; frame id == chunk index.
    #[default]
    None,
    /// One parity frame after every `group_size` data frames.
    XorGroup(u16),
}

impl FecPolicy {
    /// Group size 0 disables FEC, matching the wire encoding.
    pub fn from_group_size(group_size: u16) -> Self {
        if group_size == 0 {
            FecPolicy::None
        } else {
            FecPolicy::XorGroup(group_size)
        }
    }

    pub fn group_size(&self) -> u16 {
        match self {
            FecPolicy::None => 0,
            FecPolicy::XorGroup(g) => *g,
        }
    }
}

/// What a frame id carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRole {
    Data { chunk_index: u32 },
    Parity,
}

/// Position of a frame inside the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePosition {
    /// `None` when FEC is disabled.
    pub group: Option<u32>,
    pub role: FrameRole,
}

/// Mapping between frame ids, data chunks and groups for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    total_frames: u32,
    data_chunks: u32,
    group_size: u16,
    group_count: u32,
}

impl FrameLayout {
    /// Layout the sender produces for `data_chunks` chunks. `None` if the frame
    /// count would not fit in a u32.
    pub fn for_chunks(data_chunks: u32, policy: FecPolicy) -> Option<Self> {
        let group_size = policy.group_size();
        let group_count = if group_size == 0 {
            0
        } else {
            data_chunks.div_ceil(group_size as u32)
        };
        Some(Self {
            total_frames: data_chunks.checked_add(group_count)?,
            data_chunks,
            group_size,
            group_count,
        })
    }

    /// Layout recovered from a received header. `None` when `total_frames`
    /// cannot be produced by any chunk count at this group size.
    pub fn from_total(total_frames: u32, group_size: u16) -> Option<Self> {
        if total_frames == 0 {
            return None;
        }
        if group_size == 0 {
            return Some(Self {
                total_frames,
                data_chunks: total_frames,
                group_size: 0,
                group_count: 0,
            });
        }
        let per_group = group_size as u64 + 1;
        let total = total_frames as u64;
        let group_count = total.div_ceil(per_group);
        // The last group needs at least one data chunk plus its parity.
        if total - (group_count - 1) * per_group < 2 {
            return None;
        }
        Some(Self {
            total_frames,
            data_chunks: (total - group_count) as u32,
            group_size,
            group_count: group_count as u32,
        })
    }

    pub fn total_frames(&self) -> u32 {
        self.total_frames
    }

    pub fn data_chunks(&self) -> u32 {
        self.data_chunks
    }

    pub fn group_size(&self) -> u16 {
        self.group_size
    }

    pub fn group_count(&self) -> u32 {
        self.group_count
    }

    pub fn policy(&self) -> FecPolicy {
        FecPolicy::from_group_size(self.group_size)
    }

    /// Number of data chunks in `group`.
    fn data_in_group(&self, group: u32) -> u32 {
        let g = self.group_size as u32;
        (self.data_chunks - group * g).min(g)
    }

    /// Where `frame_id` sits, or `None` if it is outside `1..=total_frames`.
    pub fn locate(&self, frame_id: u32) -> Option<FramePosition> {
        if frame_id == 0 || frame_id > self.total_frames {
            return None;
        }
        if self.group_size == 0 {
            return Some(FramePosition {
                group: None,
                role: FrameRole::Data {
                    chunk_index: frame_id,
                },
            });
        }
        let per_group = self.group_size as u32 + 1;
        let group = (frame_id - 1) / per_group;
        let pos = (frame_id - 1) % per_group;
        let role = if pos == self.data_in_group(group) {
            FrameRole::Parity
        } else {
            FrameRole::Data {
                chunk_index: group * self.group_size as u32 + pos + 1,
            }
        };
        Some(FramePosition {
            group: Some(group),
            role,
        })
    }

    /// Frame id carrying data chunk `chunk_index` (1-based).
    pub fn frame_for_chunk(&self, chunk_index: u32) -> Option<u32> {
        if chunk_index == 0 || chunk_index > self.data_chunks {
            return None;
        }
        if self.group_size == 0 {
            return Some(chunk_index);
        }
        Some(chunk_index + (chunk_index - 1) / self.group_size as u32)
    }

    /// Frame ids of every member of `group`, parity last.
    pub fn group_frames(&self, group: u32) -> Option<RangeInclusive<u32>> {
        if self.group_size == 0 || group >= self.group_count {
            return None;
        }
        let first = group * (self.group_size as u32 + 1) + 1;
        Some(first..=first + self.data_in_group(group))
    }
}

/// XOR `members` together, zero-padding each to the longest one.
pub fn xor_padded<'a>(members: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut acc: Vec<u8> = Vec::new();
    for member in members {
        if member.len() > acc.len() {
            acc.resize(member.len(), 0);
        }
        for (a, b) in acc.iter_mut().zip(member) {
            *a ^= b;
        }
    }
    acc
}

/// Turn chunks into the session's frames: data members in order, each group
/// followed by its parity, ids assigned globally from 1.
pub fn encode_frames(chunks: &[Chunk], policy: FecPolicy) -> Vec<Frame> {
    let Some(last) = chunks.last() else {
        return Vec::new();
    };
    let Some(layout) = FrameLayout::for_chunks(chunks.len() as u32, policy) else {
        return Vec::new();
    };
    let manifest = Manifest {
        group_size: policy.group_size(),
        tail_len: last.bytes.len() as u32,
    };
    let total_frames = layout.total_frames();

    let mut frames = Vec::with_capacity(total_frames as usize);
    let mut next_id = 1u32;
    let mut push = |is_parity: bool, payload: Vec<u8>, frames: &mut Vec<Frame>| {
        frames.push(Frame {
            total_frames,
            frame_id: next_id,
            is_parity,
            manifest,
            payload,
        });
        next_id += 1;
    };

    match policy {
        FecPolicy::None => {
            for chunk in chunks {
                push(false, chunk.bytes.clone(), &mut frames);
            }
        }
        FecPolicy::XorGroup(g) => {
            for group in chunks.chunks(g as usize) {
                for chunk in group {
                    push(false, chunk.bytes.clone(), &mut frames);
                }
                let parity = xor_padded(group.iter().map(|c| c.bytes.as_slice()));
                push(true, parity, &mut frames);
            }
        }
    }
    frames
}

/// Recovery state of one group on the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupState {
    Complete,
    Repairable { missing: u32 },
    Unrecoverable { missing: Vec<u32> },
}

/// State of `group`, or `None` if the layout is unknown or has no such group.
pub fn group_state(aggregator: &ReceiveAggregator, group: u32) -> Option<GroupState> {
    let frames = aggregator.layout()?.group_frames(group)?;
    let missing: Vec<u32> = frames.filter(|&id| !aggregator.contains(id)).collect();
    Some(match missing.len() {
        0 => GroupState::Complete,
        1 => GroupState::Repairable {
            missing: missing[0],
        },
        _ => GroupState::Unrecoverable { missing },
    })
}

/// Rebuild the single missing member of `group` and insert it as if it had
/// been received. Returns the repaired frame id. A no-op for Complete and
/// Unrecoverable groups, so re-running is harmless.
pub fn repair_group(aggregator: &mut ReceiveAggregator, group: u32) -> Option<u32> {
    let GroupState::Repairable { missing } = group_state(aggregator, group)? else {
        return None;
    };
    let frames = aggregator.layout()?.group_frames(group)?;
    let rebuilt = xor_padded(frames.filter_map(|id| aggregator.get(id)));
    aggregator.insert(missing, rebuilt).then_some(missing)
}

/// Repair the group `frame_id` belongs to, if FEC is on.
pub fn repair_for_frame(aggregator: &mut ReceiveAggregator, frame_id: u32) -> Option<u32> {
    let group = aggregator.layout()?.locate(frame_id)?.group?;
    repair_group(aggregator, group)
}

/// Repair every repairable group. Returns the repaired frame ids.
pub fn repair_all(aggregator: &mut ReceiveAggregator) -> Vec<u32> {
    let Some(layout) = aggregator.layout() else {
        return Vec::new();
    };
    (0..layout.group_count())
        .filter_map(|group| repair_group(aggregator, group))
        .collect()
}

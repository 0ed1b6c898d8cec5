/// Session-wide frame tracking using a compact bitfield.
///
/// Allocated once `total_frames` is known: one bit per frame id, so a
/// 16M-frame session costs 2 MB. Frame ids are 1-based; bit `id - 1` is used.

/// Compact bitfield tracking which frame ids have been received or repaired.
#[derive(Debug, Clone)]
pub struct FrameBitfield {
    bits: Vec<u64>,
    frame_count: u32,
    received_count: u32,
}

impl FrameBitfield {
    /// Create a new bitfield for a session with `frame_count` frames.
    pub fn new(frame_count: u32) -> Self {
        Self {
            bits: vec![0u64; (frame_count as usize).div_ceil(64)],
            frame_count,
            received_count: 0,
        }
    }

    #[inline]
    fn slot(&self, frame_id: u32) -> Option<(usize, u64)> {
        if frame_id == 0 || frame_id > self.frame_count {
            return None;
        }
        let idx = (frame_id - 1) as usize;
        Some((idx / 64, 1u64 << (idx % 64)))
    }

    /// Mark a frame as held. Returns true if it was newly set (not a duplicate).
    #[inline]
    pub fn set(&mut self, frame_id: u32) -> bool {
        let Some((word, mask)) = self.slot(frame_id) else {
            return false;
        };
        if self.bits[word] & mask != 0 {
            return false; // already set
        }
        self.bits[word] |= mask;
        self.received_count += 1;
        true
    }

    /// Check if a frame is held.
    #[inline]
    pub fn get(&self, frame_id: u32) -> bool {
        match self.slot(frame_id) {
            Some((word, mask)) => self.bits[word] & mask != 0,
            None => false,
        }
    }

    /// Returns true if every frame is held.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.received_count >= self.frame_count
    }

    /// Number of frames held.
    #[inline]
    pub fn received(&self) -> u32 {
        self.received_count
    }

    /// Total frame count.
    #[inline]
    pub fn total(&self) -> u32 {
        self.frame_count
    }

    /// Collect ids of all missing frames, ascending.
    pub fn missing_frames(&self) -> Vec<u32> {
        let mut missing = Vec::with_capacity(self.missing_count() as usize);
        for (w, &word) in self.bits.iter().enumerate() {
            if word == u64::MAX {
                continue;
            }
            for bit in 0..64 {
                let id = (w * 64 + bit) as u32 + 1;
                if id > self.frame_count {
                    break;
                }
                if word & (1u64 << bit) == 0 {
                    missing.push(id);
                }
            }
        }
        missing
    }

    /// Number of missing frames.
    #[inline]
    pub fn missing_count(&self) -> u32 {
        self.frame_count - self.received_count
    }
}

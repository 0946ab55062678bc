// SPDX-License-Identifier: CEPL-1.0

pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// What a single iteration of the frame loop ended up doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Presented, but the surface reported it is stale and was rebuilt.
    PresentedAndRecreated,
    /// Nothing was drawn this tick (paused, minimized or surface rebuilt on acquire).
    Skipped,
}

/// Ring position over the per-frame synchronization slots.
///
/// `frames` counts completed frames since startup and is never reset, not even
/// when the surface is recreated; the slot index is always `frames % slots`.
#[derive(Clone, Copy, Debug)]
pub struct FrameCursor {
    slots: usize,
    frames: u64,
}

impl FrameCursor {
    pub fn new(slots: usize) -> Self {
        Self {
            slots: slots.max(1),
            frames: 0,
        }
    }

    pub fn slot(&self) -> usize {
        (self.frames % self.slots as u64) as usize
    }

    pub fn slot_count(&self) -> usize {
        self.slots
    }

    pub fn frames_completed(&self) -> u64 {
        self.frames
    }

    pub fn advance(&mut self) {
        self.frames += 1;
    }
}

impl Default for FrameCursor {
    fn default() -> Self {
        Self::new(DEFAULT_FRAMES_IN_FLIGHT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_cycles_with_slot_count_period() {
        let mut cursor = FrameCursor::default();
        for k in 0..10u64 {
            assert_eq!(cursor.frames_completed(), k);
            assert_eq!(cursor.slot() as u64, k % 2);
            cursor.advance();
        }
    }

    #[test]
    fn three_slots() {
        let mut cursor = FrameCursor::new(3);
        let seen: Vec<usize> = (0..7)
            .map(|_| {
                let s = cursor.slot();
                cursor.advance();
                s
            })
            .collect();
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn zero_slots_is_clamped_to_one() {
        let mut cursor = FrameCursor::new(0);
        assert_eq!(cursor.slot_count(), 1);
        cursor.advance();
        assert_eq!(cursor.slot(), 0);
    }
}

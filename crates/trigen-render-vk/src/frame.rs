// SPDX-License-Identifier: CEPL-1.0
//! Per-slot synchronisation for the render loop.
//!
//! Each slot owns a fence (signalled when the slot's last submission finished)
//! and the acquire / render-complete semaphore pair threaded through
//! acquire → submit → present. A slot's command buffer may only be recorded
//! after [`FrameDirector::wait_for_slot`] handed out a [`FrameSlot`] for it.
use std::sync::Arc;

use tracing::{debug, info};

use crate::device::Device;
use crate::error::{VkError, VkResult};
use crate::sync::{Fence, Semaphore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// The fence may still be pending; wait before touching the slot.
    Pending,
    /// Waited on and reset; the slot may be recorded and submitted once.
    Claimed,
}

/// Host-side bookkeeping of the wait → record → submit order per slot.
#[derive(Clone, Debug)]
pub struct SlotTracker {
    states: Vec<SlotState>,
}

impl SlotTracker {
    pub fn new(count: usize) -> Self {
        Self {
            states: vec![SlotState::Pending; count],
        }
    }

    /// A claimed slot was already waited on and its fence reset; waiting again
    /// would block forever.
    pub fn needs_wait(&self, index: usize) -> bool {
        self.states[index] == SlotState::Pending
    }

    pub fn claim(&mut self, index: usize) {
        self.states[index] = SlotState::Claimed;
    }

    pub fn ensure_recordable(&self, index: usize) -> VkResult<()> {
        match self.states[index] {
            SlotState::Claimed => Ok(()),
            SlotState::Pending => Err(VkError::SlotNotClaimed(index)),
        }
    }

    pub fn submitted(&mut self, index: usize) -> VkResult<()> {
        self.ensure_recordable(index)?;
        self.states[index] = SlotState::Pending;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

pub struct FrameSync {
    pub render_fence: Fence,
    pub image_acquired: Semaphore,
    pub render_complete: Semaphore,
}

/// Proof that a slot's previous submission has completed.
#[derive(Debug)]
pub struct FrameSlot {
    index: usize,
}

impl FrameSlot {
    pub fn index(&self) -> usize {
        self.index
    }
}

pub struct FrameDirector {
    frames: Vec<FrameSync>,
    tracker: SlotTracker,
}

impl FrameDirector {
    pub fn new(device: &Arc<Device>, count: usize) -> VkResult<Self> {
        let frames = (0..count)
            .map(|_| {
                Ok(FrameSync {
                    // Signalled so the first wait on each slot returns at once.
                    render_fence: Fence::new(device, true)?,
                    image_acquired: Semaphore::new(device)?,
                    render_complete: Semaphore::new(device)?,
                })
            })
            .collect::<VkResult<Vec<_>>>()?;
        info!("Created frame director with {count} slots");
        Ok(Self {
            frames,
            tracker: SlotTracker::new(count),
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Blocks until slot `index` finished its last submission, then resets its fence.
    pub fn wait_for_slot(&mut self, index: usize) -> VkResult<FrameSlot> {
        if self.tracker.needs_wait(index) {
            self.frames[index].render_fence.wait_and_reset()?;
            self.tracker.claim(index);
        } else {
            debug!("slot {index} still claimed from a skipped frame");
        }
        Ok(FrameSlot { index })
    }

    pub fn sync(&self, slot: &FrameSlot) -> &FrameSync {
        &self.frames[slot.index]
    }

    pub fn ensure_recordable(&self, slot: &FrameSlot) -> VkResult<()> {
        self.tracker.ensure_recordable(slot.index)
    }

    /// Marks the slot in flight; its fence was handed to the queue submit.
    pub fn submitted(&mut self, slot: FrameSlot) -> VkResult<()> {
        self.tracker.submitted(slot.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slots_must_be_waited_on() {
        let tracker = SlotTracker::new(3);
        for i in 0..3 {
            assert!(tracker.needs_wait(i));
            assert!(matches!(
                tracker.ensure_recordable(i),
                Err(VkError::SlotNotClaimed(n)) if n == i
            ));
        }
    }

    #[test]
    fn wait_then_record_then_submit() {
        let mut tracker = SlotTracker::new(2);
        tracker.claim(0);
        assert!(tracker.ensure_recordable(0).is_ok());
        assert!(tracker.ensure_recordable(1).is_err());
        tracker.submitted(0).unwrap();
        assert!(tracker.needs_wait(0));
        assert!(tracker.ensure_recordable(0).is_err());
    }

    #[test]
    fn submit_without_claim_is_rejected() {
        let mut tracker = SlotTracker::new(1);
        assert!(tracker.submitted(0).is_err());
        assert!(tracker.needs_wait(0));
    }

    #[test]
    fn skipped_frame_keeps_claim() {
        let mut tracker = SlotTracker::new(2);
        tracker.claim(1);
        // frame dropped before submit: no second wait on a reset fence
        assert!(!tracker.needs_wait(1));
        assert!(tracker.ensure_recordable(1).is_ok());
    }

    #[test]
    fn ring_of_slots() {
        let mut tracker = SlotTracker::new(3);
        let mut idx = 0;
        for _ in 0..10 {
            assert!(tracker.needs_wait(idx));
            tracker.claim(idx);
            tracker.submitted(idx).unwrap();
            idx = (idx + 1) % tracker.len();
        }
        assert!((0..3).all(|i| tracker.needs_wait(i)));
    }

    #[test]
    fn claim_survives_restart_from_first_slot() {
        let mut tracker = SlotTracker::new(3);
        for i in 0..2 {
            tracker.claim(i);
            tracker.submitted(i).unwrap();
        }
        // slot 2 is waited on, then the frame is dropped for a rebuild
        tracker.claim(2);
        let mut idx = 0;
        for _ in 0..3 {
            if tracker.needs_wait(idx) {
                tracker.claim(idx);
            } else {
                assert_eq!(idx, 2);
            }
            tracker.ensure_recordable(idx).unwrap();
            tracker.submitted(idx).unwrap();
            idx = (idx + 1) % tracker.len();
        }
        assert!((0..3).all(|i| tracker.needs_wait(i)));
    }
}

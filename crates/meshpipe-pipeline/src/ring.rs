//! Buffer slot rings for single/double/multi buffering.
//!
//! Each pipeline stage owns two small rings (input tiles, output images).
//! A slot is exclusively owned by exactly one side at any instant and
//! ownership moves only through the explicit transitions below — never by
//! implicit memory visibility. Depth 2 reproduces the firmware's
//! `buffer_id` parity toggle; deeper rings generalize it.

use crate::error::{PipelineError, Result};
use std::fmt;

/// Lifecycle of one buffer slot.
///
/// The firmware tracked three states {free, filled, in-use}; `Filling`
/// refines it so a slot with an in-flight transfer can never be handed out
/// twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nobody owns the slot; the producer may claim it.
    Free,
    /// A producer transfer into the slot is in flight.
    Filling,
    /// The producer finished; the consumer may claim it.
    Filled,
    /// The consumer is reading the slot.
    InUse,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Free => "free",
            Self::Filling => "filling",
            Self::Filled => "filled",
            Self::InUse => "in-use",
        };
        f.write_str(s)
    }
}

/// A small ring of buffer slots with strict FIFO fill/consume order.
#[derive(Debug)]
pub struct BufferRing {
    slots: Vec<SlotState>,
    fill_cursor: usize,
    consume_cursor: usize,
}

impl BufferRing {
    /// Create a ring of `depth` free slots. Depth is validated by the
    /// topology (1..=4); the ring itself only requires it be non-zero.
    pub fn new(depth: usize) -> Self {
        assert!(depth > 0, "ring depth must be non-zero");
        Self {
            slots: vec![SlotState::Free; depth],
            fill_cursor: 0,
            consume_cursor: 0,
        }
    }

    /// Ring depth.
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Claim the next slot for filling, in ring order.
    ///
    /// Returns `None` when the next slot is not free — that is
    /// backpressure, not an error: the producer retries after the consumer
    /// releases. A non-free slot can never be handed out, which is the
    /// no-double-write guarantee.
    pub fn begin_fill(&mut self) -> Option<usize> {
        let slot = self.fill_cursor;
        if self.slots[slot] != SlotState::Free {
            return None;
        }
        self.slots[slot] = SlotState::Filling;
        self.fill_cursor = (slot + 1) % self.slots.len();
        Some(slot)
    }

    /// Mark an in-flight fill as complete.
    ///
    /// # Errors
    ///
    /// [`PipelineError::SlotStateViolation`] if the slot was not filling.
    pub fn complete_fill(&mut self, slot: usize) -> Result<()> {
        self.transition(slot, SlotState::Filling, SlotState::Filled)
    }

    /// Claim the oldest filled slot for consumption, in ring order.
    ///
    /// Returns `None` when the next slot in order is not yet filled.
    pub fn begin_consume(&mut self) -> Option<usize> {
        let slot = self.consume_cursor;
        if self.slots[slot] != SlotState::Filled {
            return None;
        }
        self.slots[slot] = SlotState::InUse;
        self.consume_cursor = (slot + 1) % self.slots.len();
        Some(slot)
    }

    /// Return a consumed slot to the free pool. Only the consumer that
    /// holds the slot in-use may do this.
    ///
    /// # Errors
    ///
    /// [`PipelineError::SlotStateViolation`] if the slot was not in use.
    pub fn release(&mut self, slot: usize) -> Result<()> {
        self.transition(slot, SlotState::InUse, SlotState::Free)
    }

    /// Current state of one slot.
    pub fn state(&self, slot: usize) -> SlotState {
        self.slots[slot]
    }

    /// How many slots are in `state`.
    pub fn count(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|&&s| s == state).count()
    }

    /// Whether every slot is free (nothing buffered, nothing in flight).
    pub fn is_drained(&self) -> bool {
        self.slots.iter().all(|&s| s == SlotState::Free)
    }

    /// Reset every slot to free and rewind the cursors.
    pub fn reset(&mut self) {
        self.slots.fill(SlotState::Free);
        self.fill_cursor = 0;
        self.consume_cursor = 0;
    }

    fn transition(&mut self, slot: usize, from: SlotState, to: SlotState) -> Result<()> {
        let found = self.slots[slot];
        if found != from {
            return Err(PipelineError::SlotStateViolation {
                slot,
                found,
                wanted: from,
            });
        }
        self.slots[slot] = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_lifecycle() {
        let mut ring = BufferRing::new(2);
        let a = ring.begin_fill().unwrap();
        assert_eq!(a, 0);
        assert_eq!(ring.state(a), SlotState::Filling);
        ring.complete_fill(a).unwrap();
        let c = ring.begin_consume().unwrap();
        assert_eq!(c, a);
        ring.release(c).unwrap();
        assert!(ring.is_drained());
    }

    #[test]
    fn double_buffer_alternates() {
        let mut ring = BufferRing::new(2);
        assert_eq!(ring.begin_fill(), Some(0));
        assert_eq!(ring.begin_fill(), Some(1));
        // Both slots claimed: the producer stalls.
        assert_eq!(ring.begin_fill(), None);
        ring.complete_fill(0).unwrap();
        let c = ring.begin_consume().unwrap();
        ring.release(c).unwrap();
        // Slot 0 is free again and comes back in ring order.
        assert_eq!(ring.begin_fill(), Some(0));
    }

    #[test]
    fn producer_cannot_reclaim_unreleased_slot() {
        let mut ring = BufferRing::new(1);
        let s = ring.begin_fill().unwrap();
        ring.complete_fill(s).unwrap();
        // Consumer has not released — no double write possible.
        assert_eq!(ring.begin_fill(), None);
        let c = ring.begin_consume().unwrap();
        assert_eq!(ring.begin_fill(), None);
        ring.release(c).unwrap();
        assert_eq!(ring.begin_fill(), Some(0));
    }

    #[test]
    fn consume_waits_for_fill_completion() {
        let mut ring = BufferRing::new(2);
        let s = ring.begin_fill().unwrap();
        // In flight, not yet consumable.
        assert_eq!(ring.begin_consume(), None);
        ring.complete_fill(s).unwrap();
        assert_eq!(ring.begin_consume(), Some(s));
    }

    #[test]
    fn illegal_transitions_are_typed_errors() {
        let mut ring = BufferRing::new(2);
        let err = ring.complete_fill(0).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SlotStateViolation {
                found: SlotState::Free,
                wanted: SlotState::Filling,
                ..
            }
        ));
        let err = ring.release(1).unwrap_err();
        assert!(matches!(err, PipelineError::SlotStateViolation { .. }));
    }

    #[test]
    fn reset_frees_everything() {
        let mut ring = BufferRing::new(3);
        ring.begin_fill().unwrap();
        ring.begin_fill().unwrap();
        ring.reset();
        assert!(ring.is_drained());
        assert_eq!(ring.begin_fill(), Some(0));
    }
}

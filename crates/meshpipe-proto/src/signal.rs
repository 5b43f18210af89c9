//! The `Signal` wire unit.

use crate::id::{AcceleratorId, ClusterId};
use crate::kind::{CommandKind, KindSet, SignalKind};
use std::fmt;

/// One signal as it sits in a receiver's mailbox.
///
/// On the testbed hardware this was a FIFO write: the line number carried
/// the kind and a single data word carried the payload. The portable form
/// keeps all three fields explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    /// The cluster that raised the signal.
    pub sender: ClusterId,
    /// Classification — what the receiver can select on.
    pub kind: SignalKind,
    /// The data word: reporting cluster id for arrivals, accelerator id
    /// for commands.
    pub payload: u32,
}

impl Signal {
    /// A barrier arrival report carrying the sender's own id.
    #[must_use]
    pub const fn arrival(sender: ClusterId) -> Self {
        Self {
            sender,
            kind: SignalKind::Arrival,
            payload: sender.0,
        }
    }

    /// A barrier release (payload unused).
    #[must_use]
    pub const fn release(sender: ClusterId) -> Self {
        Self {
            sender,
            kind: SignalKind::Release,
            payload: 0,
        }
    }

    /// A point-to-point command carrying the accelerator id.
    #[must_use]
    pub const fn command(sender: ClusterId, kind: CommandKind, accelerator: AcceleratorId) -> Self {
        Self {
            sender,
            kind: SignalKind::Command(kind),
            payload: accelerator.raw(),
        }
    }

    /// Whether this signal matches a wait mask.
    #[must_use]
    pub const fn matches(&self, mask: KindSet) -> bool {
        mask.contains(self.kind)
    }

    /// The payload viewed as an accelerator id (commands only).
    #[must_use]
    pub const fn accelerator(&self) -> AcceleratorId {
        AcceleratorId(self.payload)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} payload={}", self.sender, self.kind, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrival_carries_own_id() {
        let sig = Signal::arrival(ClusterId(3));
        assert_eq!(sig.payload, 3);
        assert_eq!(sig.kind, SignalKind::Arrival);
    }

    #[test]
    fn command_carries_accelerator() {
        let sig = Signal::command(ClusterId(1), CommandKind::StageInvocation, AcceleratorId(2));
        assert_eq!(sig.accelerator(), AcceleratorId(2));
        assert!(sig.matches(KindSet::all_commands()));
        assert!(!sig.matches(KindSet::of(SignalKind::Release)));
    }
}

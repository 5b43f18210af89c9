//! Command kinds, signal classification, and wait masks.

use std::fmt;

/// The closed set of point-to-point command kinds.
///
/// On the testbed hardware each kind occupied one of the 8 event lines and
/// the line number *was* the kind. Here the kind is an ordinary message
/// field; the enum can grow without touching the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Upstream tells downstream a new unit of work is ready to start.
    StageInvocation,
    /// A consumer has started reading a producer's output buffer.
    DmaInStart,
    /// A consumer has finished reading a producer's output buffer — the
    /// producer may reuse the slot (backpressure release).
    DmaInTerminate,
    /// A stage has started writing a tile to the shared staging area.
    DmaOutStart,
    /// A stage has finished writing a tile to the shared staging area.
    DmaOutTerminate,
    /// Pipeline-wide lifecycle: a measurement job is starting.
    ClusterStart,
    /// Pipeline-wide lifecycle: a measurement job is complete.
    ClusterTerminate,
}

impl CommandKind {
    /// Every command kind, in line order.
    pub const ALL: [Self; 7] = [
        Self::StageInvocation,
        Self::DmaInStart,
        Self::DmaInTerminate,
        Self::DmaOutStart,
        Self::DmaOutTerminate,
        Self::ClusterStart,
        Self::ClusterTerminate,
    ];
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StageInvocation => "STAGE_INVOCATION",
            Self::DmaInStart => "DMA_IN_START",
            Self::DmaInTerminate => "DMA_IN_TERMINATE",
            Self::DmaOutStart => "DMA_OUT_START",
            Self::DmaOutTerminate => "DMA_OUT_TERMINATE",
            Self::ClusterStart => "CLUSTER_START",
            Self::ClusterTerminate => "CLUSTER_TERMINATE",
        };
        f.write_str(s)
    }
}

/// Full classification of a signal a mailbox can select on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Barrier arrival report, addressed to the collector. Payload is the
    /// reporting cluster's id.
    Arrival,
    /// Barrier release, fanned out by the collector.
    Release,
    /// Point-to-point command. Payload is the accelerator (sub-resource) id.
    Command(CommandKind),
}

impl SignalKind {
    /// Historical event-line index of this kind, for diagnostics only.
    ///
    /// The portable transport matches on the enum, not on this number.
    #[must_use]
    pub const fn line(self) -> u8 {
        match self {
            Self::Arrival => 0,
            Self::Release => 1,
            Self::Command(CommandKind::StageInvocation) => 2,
            Self::Command(CommandKind::DmaInStart) => 3,
            Self::Command(CommandKind::DmaInTerminate) => 4,
            Self::Command(CommandKind::DmaOutStart) => 5,
            Self::Command(CommandKind::DmaOutTerminate) => 6,
            Self::Command(CommandKind::ClusterStart) => 7,
            Self::Command(CommandKind::ClusterTerminate) => 8,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arrival => f.write_str("ARRIVAL"),
            Self::Release => f.write_str("RELEASE"),
            Self::Command(kind) => kind.fmt(f),
        }
    }
}

/// A set of [`SignalKind`]s — the mask a cluster arms before blocking.
///
/// Backed by one bit per kind, in [`SignalKind::line`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSet(u16);

impl KindSet {
    /// The empty mask (matches nothing).
    pub const EMPTY: Self = Self(0);

    /// A mask containing exactly one kind.
    #[must_use]
    pub const fn of(kind: SignalKind) -> Self {
        Self(1 << kind.line())
    }

    /// This mask plus one more kind.
    #[must_use]
    pub const fn with(self, kind: SignalKind) -> Self {
        Self(self.0 | (1 << kind.line()))
    }

    /// Set union.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether `kind` is in the mask.
    #[must_use]
    pub const fn contains(self, kind: SignalKind) -> bool {
        self.0 & (1 << kind.line()) != 0
    }

    /// Whether the mask matches nothing.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Every command kind, no barrier classes — the mask a command port
    /// waits on.
    #[must_use]
    pub const fn all_commands() -> Self {
        let mut set = Self::EMPTY;
        let mut i = 0;
        while i < CommandKind::ALL.len() {
            set = set.with(SignalKind::Command(CommandKind::ALL[i]));
            i += 1;
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_numbers_are_unique() {
        let mut seen = 0u16;
        for kind in CommandKind::ALL {
            let bit = 1u16 << SignalKind::Command(kind).line();
            assert_eq!(seen & bit, 0, "duplicate line for {kind}");
            seen |= bit;
        }
        assert_eq!(seen & (1 << SignalKind::Arrival.line()), 0);
        assert_eq!(seen & (1 << SignalKind::Release.line()), 0);
    }

    #[test]
    fn mask_membership() {
        let mask = KindSet::of(SignalKind::Arrival).with(SignalKind::Release);
        assert!(mask.contains(SignalKind::Arrival));
        assert!(mask.contains(SignalKind::Release));
        assert!(!mask.contains(SignalKind::Command(CommandKind::DmaInStart)));
    }

    #[test]
    fn all_commands_excludes_barrier_classes() {
        let mask = KindSet::all_commands();
        for kind in CommandKind::ALL {
            assert!(mask.contains(SignalKind::Command(kind)));
        }
        assert!(!mask.contains(SignalKind::Arrival));
        assert!(!mask.contains(SignalKind::Release));
    }

    #[test]
    fn empty_mask() {
        assert!(KindSet::EMPTY.is_empty());
        assert!(!KindSet::of(SignalKind::Release).is_empty());
    }
}

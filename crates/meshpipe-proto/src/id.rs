//! Identifier newtypes for clusters, accelerators, and pipeline stages.

use std::fmt;

/// Identifier of one execution context ("cluster").
///
/// Valid ids are `[0, N)` for a fabric of `N` clusters. Cluster 0 is the
/// distinguished collector for global barriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterId(pub u32);

impl ClusterId {
    /// The distinguished barrier collector.
    pub const MASTER: Self = Self(0);

    /// Index form for table lookups.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether this cluster is the barrier collector.
    #[must_use]
    pub const fn is_master(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cl{}", self.0)
    }
}

/// Sub-resource identifier carried in command payloads.
///
/// Names one accelerator instance within a cluster. The protocol itself
/// never interprets it — it rides along so a receiving controller can
/// route the command to the right accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AcceleratorId(pub u32);

impl AcceleratorId {
    /// Raw payload representation.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for AcceleratorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acc{}", self.0)
    }
}

/// Identifier of one pipeline stage (an accelerator bound to a cluster).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub u32);

impl StageId {
    /// Index form for table lookups.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_is_cluster_zero() {
        assert!(ClusterId::MASTER.is_master());
        assert!(!ClusterId(1).is_master());
        assert_eq!(ClusterId::MASTER.index(), 0);
    }

    #[test]
    fn display_forms() {
        assert_eq!(ClusterId(3).to_string(), "cl3");
        assert_eq!(AcceleratorId(1).to_string(), "acc1");
        assert_eq!(StageId(2).to_string(), "stage2");
    }
}

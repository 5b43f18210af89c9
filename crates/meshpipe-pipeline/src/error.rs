//! Error types for pipeline operations.

use crate::ring::SlotState;
use meshpipe_fabric::FabricError;
use meshpipe_proto::StageId;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while orchestrating a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A buffer slot was driven through an illegal state transition.
    #[error("Slot {slot} state violation: found {found}, wanted {wanted}")]
    SlotStateViolation {
        /// Ring slot index.
        slot: usize,
        /// State the slot was actually in.
        found: SlotState,
        /// State the transition required.
        wanted: SlotState,
    },

    /// Buffer slot accounting between producer and consumer broke down.
    #[error("Slot capacity violation at {stage}: {detail}")]
    SlotCapacityViolation {
        /// The stage whose ring accounting failed.
        stage: StageId,
        /// What went wrong.
        detail: String,
    },

    /// A progress counter moved backwards or crossed its bound.
    #[error("Counter regression at {stage}: {detail}")]
    CounterRegression {
        /// The offending stage.
        stage: StageId,
        /// The broken relation.
        detail: String,
    },

    /// The stage topology is not a valid pipeline.
    #[error("Bad topology: {reason}")]
    BadTopology {
        /// Why validation failed.
        reason: String,
    },

    /// An external collaborator (accelerator or DMA engine) failed.
    #[error("Collaborator failure: {reason}")]
    Collaborator {
        /// Reason reported by the collaborator.
        reason: String,
    },

    /// A fabric operation failed underneath the controller.
    #[error("Fabric error: {0}")]
    Fabric(#[from] FabricError),
}

impl PipelineError {
    /// Create a capacity-violation error.
    pub fn capacity(stage: StageId, detail: impl Into<String>) -> Self {
        Self::SlotCapacityViolation {
            stage,
            detail: detail.into(),
        }
    }

    /// Create a counter-regression error.
    pub fn regression(stage: StageId, detail: impl Into<String>) -> Self {
        Self::CounterRegression {
            stage,
            detail: detail.into(),
        }
    }

    /// Create a bad-topology error.
    pub fn topology(reason: impl Into<String>) -> Self {
        Self::BadTopology {
            reason: reason.into(),
        }
    }

    /// Create a collaborator-failure error.
    pub fn collaborator(reason: impl Into<String>) -> Self {
        Self::Collaborator {
            reason: reason.into(),
        }
    }
}

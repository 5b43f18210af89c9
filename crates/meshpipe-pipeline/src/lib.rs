//! Pipeline orchestration for meshpipe.
//!
//! One [`StageController`] per stage (an accelerator bound to a cluster)
//! moves tiles through a producer/consumer chain with double-buffered
//! transfers and explicit backpressure:
//!
//! ```text
//! source ─▶ [stage 0] ─STAGE_INVOCATION─▶ [stage 1] ─▶ ... ─▶ staging area
//!              ▲                              │
//!              └────────DMA_IN_TERMINATE──────┘   (buffer slot freed)
//! ```
//!
//! Accelerator programming and DMA issuance are external collaborators
//! behind the [`Accelerator`] and [`DmaEngine`] traits; the in-process
//! [`SoftwareAccelerator`] and [`SoftwareDma`] implement them with
//! deterministic poll-count latencies, so every pipeline configuration
//! runs and is tested without hardware.
//!
//! The controller round is non-blocking; a cluster thread suspends only in
//! the runner, on the command mailbox, when a round makes no progress and
//! nothing is in flight. Single-threaded round-robin stepping of several
//! controllers over one fabric is fully deterministic and is how the
//! invariant simulations in `tests/` work.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod collaborator;
mod counters;
mod error;
mod ring;
mod runner;
mod stage;
mod topology;

pub use collaborator::{
    Accelerator, DmaEngine, DmaHandle, SoftwareAccelerator, SoftwareDma, TileParams,
    TransferDirection, TransferRequest,
};
pub use counters::StageCounters;
pub use error::{PipelineError, Result};
pub use ring::{BufferRing, SlotState};
pub use runner::{run_job, JobConfig, JobReport};
pub use stage::StageController;
pub use topology::{StageConfig, Topology};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        run_job, Accelerator, DmaEngine, JobConfig, JobReport, PipelineError, Result,
        SoftwareAccelerator, SoftwareDma, StageConfig, StageController, StageCounters, Topology,
    };
    pub use meshpipe_proto::{AcceleratorId, ClusterId, StageId};
}

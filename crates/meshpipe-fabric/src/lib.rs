//! Runtime cluster fabric for meshpipe.
//!
//! One logical thread of control per cluster, no preemptive scheduler:
//! a cluster runs to a blocking wait point and resumes only when woken.
//! The fabric provides the three coordination primitives that the
//! pipeline layer is built on:
//!
//! ```text
//! Mailbox   — per-cluster tagged-signal queue
//!             signal(target, kind, payload)   fire-and-forget send
//!             wait_and_clear(mask)            selective blocking receive
//!
//! Barrier   — all-to-one-to-all checkpoint with cluster 0 as collector
//!             barrier()  /  restart()
//!
//! Commands  — point-to-point command channel, demultiplexed per
//!             (sender, kind) pair
//!             send(target, accel, kind)  /  recv(from, kind)
//! ```
//!
//! # Guarantees
//!
//! - FIFO delivery per (sender, receiver, kind) triple; no ordering across
//!   senders or kinds.
//! - Every blocking wait honors the fabric deadline and surfaces
//!   [`FabricError::Timeout`] instead of hanging.
//! - Protocol violations (duplicate barrier arrivals, out-of-range
//!   reporters) are hard typed errors, not log lines.
//!
//! # Quick start
//!
//! ```
//! use meshpipe_fabric::Fabric;
//! use std::time::Duration;
//!
//! # fn main() -> meshpipe_fabric::Result<()> {
//! let fabric = Fabric::with_deadline(2, Duration::from_secs(1));
//! let master = fabric.endpoint(meshpipe_proto::ClusterId(0))?;
//! let worker = fabric.endpoint(meshpipe_proto::ClusterId(1))?;
//!
//! let t = std::thread::spawn(move || worker.barrier());
//! master.barrier()?;
//! t.join().unwrap()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod barrier;
mod command;
mod error;
mod mailbox;

pub use command::CommandPort;
pub use error::{FabricError, Result};
pub use mailbox::{Endpoint, Fabric, DEFAULT_MAILBOX_CAPACITY};

/// Commonly used types.
pub mod prelude {
    pub use crate::{CommandPort, Endpoint, Fabric, FabricError, Result};
    pub use meshpipe_proto::{
        AcceleratorId, ClusterId, CommandKind, KindSet, Signal, SignalKind, StageId,
    };
}

//! External collaborator contracts and their software twins.
//!
//! The controller never inspects an accelerator's or DMA engine's
//! internals — only their completion signals, exactly the contracts the
//! hardware exposes. The software implementations mirror the same
//! interaction shape with deterministic poll-count latencies, so every
//! pipeline configuration runs in CI without hardware and single-threaded
//! simulations are reproducible.

use crate::error::{PipelineError, Result};
use meshpipe_proto::StageId;
use std::collections::HashMap;
use tracing::debug;

/// Parameters handed to `Accelerator::program` for one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileParams {
    /// The stage issuing the compute.
    pub stage: StageId,
    /// Zero-based tile index within the job.
    pub tile: u64,
    /// Input ring slot holding the tile.
    pub slot: usize,
}

/// One accelerator instance bound to a stage.
///
/// `compute` is fire-and-forget; completion is observed by polling
/// `is_finished`. The poll takes `&mut self` so software implementations
/// can advance their latency model on each poll.
pub trait Accelerator: Send {
    /// Load tile parameters into the accelerator's registers.
    ///
    /// # Errors
    ///
    /// Collaborator-specific; programming a busy accelerator is always an
    /// error.
    fn program(&mut self, params: &TileParams) -> Result<()>;

    /// Kick off the programmed computation. Never blocks.
    fn compute(&mut self);

    /// Poll for completion of the in-flight computation.
    fn is_finished(&mut self) -> bool;
}

/// Opaque handle for an asynchronous DMA transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DmaHandle(pub u64);

/// Transfer direction relative to the issuing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Fetch a tile into an input ring slot.
    In,
    /// Write a computed tile out to the staging area.
    Out,
}

/// One asynchronous transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    /// The issuing stage.
    pub stage: StageId,
    /// Direction relative to that stage.
    pub direction: TransferDirection,
    /// Zero-based tile index within the job.
    pub tile: u64,
    /// Ring slot involved (input slot for `In`, output image slot for `Out`).
    pub slot: usize,
}

/// The DMA collaborator: asynchronous copies with per-handle completion.
pub trait DmaEngine: Send {
    /// Issue an asynchronous transfer and return its handle.
    ///
    /// # Errors
    ///
    /// Collaborator-specific (descriptor exhaustion, bad request).
    fn copy_async(&mut self, req: TransferRequest) -> Result<DmaHandle>;

    /// Poll whether `handle` has completed. Non-blocking.
    ///
    /// # Errors
    ///
    /// Collaborator-specific.
    fn is_complete(&mut self, handle: DmaHandle) -> Result<bool>;

    /// Block until `handle` completes.
    ///
    /// # Errors
    ///
    /// Collaborator-specific.
    fn wait(&mut self, handle: DmaHandle) -> Result<()>;
}

/// Software accelerator: completes `latency` polls after `compute`.
///
/// Latency 0 finishes on the first poll. Tracks invocation and tile
/// counts for assertions and reports.
#[derive(Debug)]
pub struct SoftwareAccelerator {
    latency: u32,
    programmed: Option<TileParams>,
    remaining: Option<u32>,
    invocations: u64,
    tiles_computed: u64,
}

impl SoftwareAccelerator {
    /// Create with a poll-count latency.
    pub fn new(latency: u32) -> Self {
        Self {
            latency,
            programmed: None,
            remaining: None,
            invocations: 0,
            tiles_computed: 0,
        }
    }

    /// Completed compute invocations.
    pub fn tiles_computed(&self) -> u64 {
        self.tiles_computed
    }

    /// Total compute invocations (including the in-flight one).
    pub fn invocations(&self) -> u64 {
        self.invocations
    }
}

impl Accelerator for SoftwareAccelerator {
    fn program(&mut self, params: &TileParams) -> Result<()> {
        if self.remaining.is_some() {
            return Err(PipelineError::collaborator(format!(
                "{}: program while computing tile {:?}",
                params.stage, self.programmed
            )));
        }
        self.programmed = Some(*params);
        Ok(())
    }

    fn compute(&mut self) {
        debug_assert!(self.programmed.is_some(), "compute without program");
        self.invocations += 1;
        self.remaining = Some(self.latency);
    }

    fn is_finished(&mut self) -> bool {
        match self.remaining {
            None => true,
            Some(0) => {
                self.remaining = None;
                self.tiles_computed += 1;
                if let Some(p) = self.programmed.take() {
                    debug!("{}: computed tile {}", p.stage, p.tile);
                }
                true
            }
            Some(left) => {
                self.remaining = Some(left - 1);
                false
            }
        }
    }
}

/// Software DMA engine: each transfer completes after `latency` polls.
#[derive(Debug)]
pub struct SoftwareDma {
    latency: u32,
    next_handle: u64,
    active: HashMap<DmaHandle, u32>,
    completed: u64,
}

impl SoftwareDma {
    /// Create with a poll-count latency per transfer.
    pub fn new(latency: u32) -> Self {
        Self {
            latency,
            next_handle: 0,
            active: HashMap::new(),
            completed: 0,
        }
    }

    /// Transfers completed so far.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Transfers still in flight.
    pub fn in_flight(&self) -> usize {
        self.active.len()
    }
}

impl DmaEngine for SoftwareDma {
    fn copy_async(&mut self, req: TransferRequest) -> Result<DmaHandle> {
        let handle = DmaHandle(self.next_handle);
        self.next_handle += 1;
        self.active.insert(handle, self.latency);
        debug!(
            "{}: dma {:?} tile {} slot {} -> {:?}",
            req.stage, req.direction, req.tile, req.slot, handle
        );
        Ok(handle)
    }

    fn is_complete(&mut self, handle: DmaHandle) -> Result<bool> {
        match self.active.get_mut(&handle) {
            // Unknown handle: already completed and retired.
            None => Ok(true),
            Some(0) => {
                self.active.remove(&handle);
                self.completed += 1;
                Ok(true)
            }
            Some(left) => {
                *left -= 1;
                Ok(false)
            }
        }
    }

    fn wait(&mut self, handle: DmaHandle) -> Result<()> {
        if self.active.remove(&handle).is_some() {
            self.completed += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accelerator_latency_model() {
        let mut acc = SoftwareAccelerator::new(2);
        let params = TileParams {
            stage: StageId(0),
            tile: 0,
            slot: 0,
        };
        acc.program(&params).unwrap();
        acc.compute();
        assert!(!acc.is_finished());
        assert!(!acc.is_finished());
        assert!(acc.is_finished());
        assert_eq!(acc.tiles_computed(), 1);
    }

    #[test]
    fn programming_a_busy_accelerator_fails() {
        let mut acc = SoftwareAccelerator::new(5);
        let params = TileParams {
            stage: StageId(0),
            tile: 0,
            slot: 0,
        };
        acc.program(&params).unwrap();
        acc.compute();
        let err = acc.program(&params).unwrap_err();
        assert!(matches!(err, PipelineError::Collaborator { .. }));
    }

    #[test]
    fn dma_completes_in_issue_order_at_equal_latency() {
        let mut dma = SoftwareDma::new(1);
        let req = TransferRequest {
            stage: StageId(0),
            direction: TransferDirection::In,
            tile: 0,
            slot: 0,
        };
        let a = dma.copy_async(req).unwrap();
        let b = dma.copy_async(TransferRequest { tile: 1, ..req }).unwrap();
        assert!(!dma.is_complete(a).unwrap());
        assert!(dma.is_complete(a).unwrap());
        assert!(!dma.is_complete(b).unwrap());
        assert!(dma.is_complete(b).unwrap());
        assert_eq!(dma.completed(), 2);
        assert_eq!(dma.in_flight(), 0);
    }

    #[test]
    fn wait_retires_a_transfer() {
        let mut dma = SoftwareDma::new(10);
        let req = TransferRequest {
            stage: StageId(0),
            direction: TransferDirection::Out,
            tile: 0,
            slot: 0,
        };
        let h = dma.copy_async(req).unwrap();
        dma.wait(h).unwrap();
        assert!(dma.is_complete(h).unwrap());
        assert_eq!(dma.completed(), 1);
    }
}

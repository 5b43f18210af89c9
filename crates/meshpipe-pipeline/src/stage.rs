//! The pipeline stage controller state machine.
//!
//! One controller per stage replaces the firmware's hand-unrolled
//! per-stage variants. A `round()` is non-blocking and advances whichever of the
//! five phases can make progress:
//!
//! ```text
//! 1. intake issue       fetch next tile into a free input slot
//! 2. intake complete    tile landed; image boundary releases upstream
//! 3. compute launch     program + fire the accelerator on a filled slot
//! 4. compute complete   poll; buffer swap to the next (free) slot
//! 5. output issue/complete
//!                       write tile out; image boundary invokes downstream
//! ```
//!
//! Backpressure is carried entirely by explicit ownership transfer:
//! a producer's output image slot stays claimed until the consumer's
//! `DMA_IN_TERMINATE` releases it, so a stage can never run more than
//! `buffer_depth` images ahead of its consumer.

use crate::collaborator::{
    Accelerator, DmaEngine, DmaHandle, TileParams, TransferDirection, TransferRequest,
};
use crate::counters::StageCounters;
use crate::error::{PipelineError, Result};
use crate::ring::BufferRing;
use crate::topology::StageConfig;
use meshpipe_fabric::CommandPort;
use meshpipe_proto::{ClusterId, CommandKind};
use std::collections::VecDeque;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy)]
struct OutTransfer {
    handle: DmaHandle,
    slot: usize,
    final_tile: bool,
}

/// The per-stage controller: all state is owned by the stage's cluster
/// thread, mutated nowhere else.
#[derive(Debug)]
pub struct StageController<A, D> {
    cfg: StageConfig,
    port: CommandPort,
    accel: A,
    dma: D,
    counters: StageCounters,
    input_ring: BufferRing,
    output_ring: BufferRing,
    /// In-flight input transfers, issue order.
    pending_in: VecDeque<(DmaHandle, usize)>,
    /// In-flight output transfers, issue order.
    pending_out: VecDeque<OutTransfer>,
    /// Input slot the accelerator is currently computing from.
    compute_slot: Option<usize>,
    /// Output image slots currently held by the consumer, oldest first.
    consumer_slots: VecDeque<usize>,
    /// Output image slot tiles are currently being written into.
    out_slot: Option<usize>,
    /// Images the upstream stage has announced via `STAGE_INVOCATION`.
    upstream_images_ready: u64,
    /// Fetches issued so far (>= counters.tiles_in).
    tiles_fetch_issued: u64,
    /// Output transfers issued so far (>= counters.tiles_out).
    tiles_out_issued: u64,
    /// Staging-area images announced by the tail (observer stage only).
    staged_images: u64,
    target_images: u64,
}

impl<A: Accelerator, D: DmaEngine> StageController<A, D> {
    /// Create a controller for one measurement job of `target_images`.
    pub fn new(cfg: StageConfig, port: CommandPort, accel: A, dma: D, target_images: u64) -> Self {
        let depth = cfg.buffer_depth;
        Self {
            cfg,
            port,
            accel,
            dma,
            counters: StageCounters::default(),
            input_ring: BufferRing::new(depth),
            output_ring: BufferRing::new(depth),
            pending_in: VecDeque::new(),
            pending_out: VecDeque::new(),
            compute_slot: None,
            consumer_slots: VecDeque::new(),
            out_slot: None,
            upstream_images_ready: 0,
            tiles_fetch_issued: 0,
            tiles_out_issued: 0,
            staged_images: 0,
            target_images,
        }
    }

    /// This stage's configuration.
    pub fn config(&self) -> &StageConfig {
        &self.cfg
    }

    /// Current progress counters.
    pub fn counters(&self) -> StageCounters {
        self.counters
    }

    /// The command port, for lifecycle traffic around the measurement
    /// window.
    pub fn port_mut(&mut self) -> &mut CommandPort {
        &mut self.port
    }

    /// Staging-area images the observer has been told about.
    pub fn staged_images(&self) -> u64 {
        self.staged_images
    }

    /// Total tiles this job moves through the stage.
    pub fn target_tiles(&self) -> u64 {
        self.target_images * self.cfg.tiles_per_image
    }

    /// Whether the stage has finished the job and drained everything:
    /// all tiles written out, no transfers or computes in flight, and both
    /// rings fully released (the last output image acknowledged).
    pub fn is_done(&self) -> bool {
        self.counters.tiles_out == self.target_tiles()
            && self.counters.drained()
            && self.compute_slot.is_none()
            && self.input_ring.is_drained()
            && self.output_ring.is_drained()
    }

    /// Whether the only thing that can unblock this stage is an incoming
    /// command (nothing in flight to poll).
    pub fn awaits_commands_only(&self) -> bool {
        self.pending_in.is_empty() && self.pending_out.is_empty() && self.compute_slot.is_none()
    }

    /// Run one non-blocking round; returns whether any phase progressed.
    ///
    /// # Errors
    ///
    /// Protocol violations (slot misuse, counter regression), collaborator
    /// failures, or fabric errors.
    pub fn round(&mut self) -> Result<bool> {
        self.pump_commands()?;
        let mut progress = false;
        progress |= self.intake_issue()?;
        progress |= self.intake_complete()?;
        progress |= self.compute_launch()?;
        progress |= self.compute_complete()?;
        progress |= self.output_issue()?;
        progress |= self.output_complete()?;
        self.counters.check(self.cfg.stage)?;
        Ok(progress)
    }

    /// Drive rounds to completion, suspending on the command mailbox when
    /// a round is fully idle and nothing is in flight.
    ///
    /// # Errors
    ///
    /// Anything a round can raise, plus `Timeout` if the stage idles past
    /// the fabric deadline (a peer died or the protocol wedged).
    pub fn run_to_completion(&mut self) -> Result<()> {
        while !self.is_done() {
            if !self.round()? {
                if self.awaits_commands_only() {
                    self.port.wait_any()?;
                } else {
                    // In-flight DMA or compute: poll again next round.
                    std::thread::yield_now();
                }
            }
        }
        debug!(
            "{}: job done, {} tiles out",
            self.cfg.stage, self.counters.tiles_out
        );
        Ok(())
    }

    /// Zero all job state for the next measurement window. Counters from
    /// a finished job must be read out before calling this.
    pub fn reset(&mut self) {
        self.counters.reset();
        self.input_ring.reset();
        self.output_ring.reset();
        self.pending_in.clear();
        self.pending_out.clear();
        self.compute_slot = None;
        self.consumer_slots.clear();
        self.out_slot = None;
        self.upstream_images_ready = 0;
        self.tiles_fetch_issued = 0;
        self.tiles_out_issued = 0;
        self.staged_images = 0;
    }

    /// Tear down into the final counters.
    pub fn into_counters(self) -> StageCounters {
        self.counters
    }

    /// Drain pending commands into local credits. Non-blocking.
    fn pump_commands(&mut self) -> Result<()> {
        if let Some(up) = self.cfg.upstream {
            while self
                .port
                .try_recv(up, CommandKind::StageInvocation)?
                .is_some()
            {
                self.upstream_images_ready += 1;
                trace!(
                    "{}: upstream ready {}",
                    self.cfg.stage,
                    self.upstream_images_ready
                );
            }
        }
        if let Some(down) = self.cfg.downstream {
            while self.port.try_recv(down, CommandKind::DmaInStart)?.is_some() {
                let slot = self.output_ring.begin_consume().ok_or_else(|| {
                    PipelineError::capacity(
                        self.cfg.stage,
                        "consumer started reading an image that was never staged",
                    )
                })?;
                self.consumer_slots.push_back(slot);
            }
            while self
                .port
                .try_recv(down, CommandKind::DmaInTerminate)?
                .is_some()
            {
                let slot = self.consumer_slots.pop_front().ok_or_else(|| {
                    PipelineError::capacity(
                        self.cfg.stage,
                        "consumer released more images than it claimed",
                    )
                })?;
                self.output_ring.release(slot)?;
                trace!("{}: output slot {slot} freed by consumer", self.cfg.stage);
            }
        }
        if let Some(tail) = self.cfg.staging_feed {
            while self.port.try_recv(tail, CommandKind::DmaOutStart)?.is_some() {}
            while self
                .port
                .try_recv(tail, CommandKind::DmaOutTerminate)?
                .is_some()
            {
                self.staged_images += 1;
            }
        }
        Ok(())
    }

    /// Step 1: issue the next tile fetch if budget and a slot allow.
    fn intake_issue(&mut self) -> Result<bool> {
        if !self.intake_budget() {
            return Ok(false);
        }
        let Some(slot) = self.input_ring.begin_fill() else {
            return Ok(false);
        };
        let tile = self.tiles_fetch_issued;
        if tile % self.cfg.tiles_per_image == 0 {
            if let Some(up) = self.cfg.upstream {
                // Tell the producer we are starting on its staged image.
                self.port
                    .send(up, self.cfg.accelerator, CommandKind::DmaInStart)?;
            }
        }
        let handle = self.dma.copy_async(TransferRequest {
            stage: self.cfg.stage,
            direction: TransferDirection::In,
            tile,
            slot,
        })?;
        self.pending_in.push_back((handle, slot));
        self.tiles_fetch_issued += 1;
        self.counters.in_flight_in += 1;
        Ok(true)
    }

    fn intake_budget(&self) -> bool {
        if self.tiles_fetch_issued >= self.target_tiles() {
            return false;
        }
        match self.cfg.upstream {
            // Never consume an image upstream has not finished producing.
            Some(_) => {
                self.tiles_fetch_issued < self.upstream_images_ready * self.cfg.tiles_per_image
            }
            // The head stage pulls from the external source at will.
            None => true,
        }
    }

    /// Step 2: retire completed fetches, oldest first.
    fn intake_complete(&mut self) -> Result<bool> {
        let mut progress = false;
        while let Some(&(handle, slot)) = self.pending_in.front() {
            if !self.dma.is_complete(handle)? {
                break;
            }
            self.pending_in.pop_front();
            self.input_ring.complete_fill(slot)?;
            self.counters.in_flight_in -= 1;
            self.counters.tiles_in += 1;
            if self.counters.tiles_in % self.cfg.tiles_per_image == 0 {
                if let Some(up) = self.cfg.upstream {
                    // Whole image read: the producer may reuse its slot.
                    self.port
                        .send(up, self.cfg.accelerator, CommandKind::DmaInTerminate)?;
                }
            }
            progress = true;
        }
        Ok(progress)
    }

    /// Step 3: hand the oldest filled tile to the accelerator.
    fn compute_launch(&mut self) -> Result<bool> {
        if self.compute_slot.is_some() || self.counters.tiles_in <= self.counters.tiles_compute {
            return Ok(false);
        }
        let Some(slot) = self.input_ring.begin_consume() else {
            return Ok(false);
        };
        let params = TileParams {
            stage: self.cfg.stage,
            tile: self.counters.tiles_compute,
            slot,
        };
        self.accel.program(&params)?;
        self.accel.compute();
        self.compute_slot = Some(slot);
        Ok(true)
    }

    /// Step 4: poll the accelerator; on completion swap buffers by
    /// releasing the consumed slot (the next fill target must be free —
    /// the ring enforces it).
    fn compute_complete(&mut self) -> Result<bool> {
        let Some(slot) = self.compute_slot else {
            return Ok(false);
        };
        if !self.accel.is_finished() {
            return Ok(false);
        }
        self.compute_slot = None;
        self.input_ring.release(slot)?;
        self.counters.tiles_compute += 1;
        Ok(true)
    }

    /// Step 5a: write the next computed tile out, claiming an output image
    /// slot at each image boundary (backpressure point).
    fn output_issue(&mut self) -> Result<bool> {
        if self.tiles_out_issued >= self.counters.tiles_compute {
            return Ok(false);
        }
        let tile = self.tiles_out_issued;
        if self.out_slot.is_none() {
            debug_assert_eq!(tile % self.cfg.tiles_per_image, 0);
            let Some(slot) = self.output_ring.begin_fill() else {
                // All image slots still held downstream: stall.
                return Ok(false);
            };
            self.out_slot = Some(slot);
            if self.cfg.is_tail() {
                self.port.send(
                    ClusterId::MASTER,
                    self.cfg.accelerator,
                    CommandKind::DmaOutStart,
                )?;
            }
        }
        let slot = self.out_slot.ok_or_else(|| {
            PipelineError::capacity(self.cfg.stage, "output issue without an image slot")
        })?;
        let handle = self.dma.copy_async(TransferRequest {
            stage: self.cfg.stage,
            direction: TransferDirection::Out,
            tile,
            slot,
        })?;
        let final_tile = (tile + 1) % self.cfg.tiles_per_image == 0;
        self.pending_out.push_back(OutTransfer {
            handle,
            slot,
            final_tile,
        });
        self.tiles_out_issued += 1;
        self.counters.in_flight_out += 1;
        if final_tile {
            self.out_slot = None;
        }
        Ok(true)
    }

    /// Step 5b: retire completed output transfers; image boundaries invoke
    /// the consumer or, on the tail, free the slot and notify the observer.
    fn output_complete(&mut self) -> Result<bool> {
        let mut progress = false;
        while let Some(front) = self.pending_out.front().copied() {
            if !self.dma.is_complete(front.handle)? {
                break;
            }
            self.pending_out.pop_front();
            self.counters.in_flight_out -= 1;
            self.counters.tiles_out += 1;
            if front.final_tile {
                self.output_ring.complete_fill(front.slot)?;
                match self.cfg.downstream {
                    Some(down) => {
                        self.port
                            .send(down, self.cfg.accelerator, CommandKind::StageInvocation)?;
                    }
                    None => {
                        // Tail: the external staging area is the consumer;
                        // the slot frees immediately and the observer learns
                        // an image landed.
                        let slot = self.output_ring.begin_consume().ok_or_else(|| {
                            PipelineError::capacity(
                                self.cfg.stage,
                                "tail staged image not consumable",
                            )
                        })?;
                        self.output_ring.release(slot)?;
                        self.port.send(
                            ClusterId::MASTER,
                            self.cfg.accelerator,
                            CommandKind::DmaOutTerminate,
                        )?;
                    }
                }
            }
            progress = true;
        }
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::{SoftwareAccelerator, SoftwareDma};
    use crate::topology::Topology;
    use meshpipe_fabric::{CommandPort, Fabric};

    fn single_stage(
        depth: usize,
        tiles_per_image: u64,
        images: u64,
    ) -> StageController<SoftwareAccelerator, SoftwareDma> {
        let topo = Topology::linear(1, depth, tiles_per_image).unwrap();
        let fabric = Fabric::new(1);
        let port = CommandPort::new(fabric.endpoint(ClusterId(0)).unwrap());
        StageController::new(
            topo.stages()[0].clone(),
            port,
            SoftwareAccelerator::new(0),
            SoftwareDma::new(0),
            images,
        )
    }

    #[test]
    fn single_stage_runs_to_completion() {
        let mut ctl = single_stage(2, 4, 4);
        let mut rounds = 0;
        while !ctl.is_done() {
            ctl.round().unwrap();
            rounds += 1;
            assert!(rounds < 10_000, "controller wedged");
        }
        let c = ctl.counters();
        assert_eq!(c.tiles_out, 16);
        assert_eq!(c.tiles_in, 16);
        assert_eq!(c.tiles_compute, 16);
        assert!(c.drained());
    }

    #[test]
    fn observer_sees_staged_images_after_pump() {
        let mut ctl = single_stage(2, 2, 3);
        while !ctl.is_done() {
            ctl.round().unwrap();
        }
        // One more round pumps the self-addressed DMA_OUT_TERMINATE signals.
        ctl.round().unwrap();
        assert_eq!(ctl.staged_images(), 3);
    }

    #[test]
    fn monotone_chain_holds_every_round() {
        let mut ctl = single_stage(2, 4, 4);
        while !ctl.is_done() {
            ctl.round().unwrap();
            let c = ctl.counters();
            assert!(c.tiles_in >= c.tiles_compute);
            assert!(c.tiles_compute >= c.tiles_out);
        }
    }

    #[test]
    fn latency_does_not_change_totals() {
        for (dma_lat, acc_lat) in [(0u32, 3u32), (2, 0), (3, 5)] {
            let topo = Topology::linear(1, 2, 4).unwrap();
            let fabric = Fabric::new(1);
            let port = CommandPort::new(fabric.endpoint(ClusterId(0)).unwrap());
            let mut ctl = StageController::new(
                topo.stages()[0].clone(),
                port,
                SoftwareAccelerator::new(acc_lat),
                SoftwareDma::new(dma_lat),
                2,
            );
            let mut rounds = 0;
            while !ctl.is_done() {
                ctl.round().unwrap();
                rounds += 1;
                assert!(rounds < 100_000, "wedged at latencies {dma_lat}/{acc_lat}");
            }
            assert_eq!(ctl.counters().tiles_out, 8);
        }
    }

    #[test]
    fn reset_restarts_the_job() {
        let mut ctl = single_stage(1, 1, 2);
        while !ctl.is_done() {
            ctl.round().unwrap();
        }
        assert_eq!(ctl.counters().tiles_out, 2);
        ctl.reset();
        assert_eq!(ctl.counters(), StageCounters::default());
        assert!(!ctl.is_done());
        while !ctl.is_done() {
            ctl.round().unwrap();
        }
        assert_eq!(ctl.counters().tiles_out, 2);
    }
}

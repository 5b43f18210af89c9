//! Measurement job runner: one OS thread per cluster.
//!
//! The runner owns the lifecycle around the measurement window: the master
//! broadcasts `CLUSTER_START`, the opening barrier starts the clock, the
//! controllers run, the tail reports `CLUSTER_TERMINATE`, and the closing
//! barrier stops the clock. Every stage must be fully drained before it
//! enters the closing barrier, or the next job's counters would start
//! dirty.

use crate::collaborator::{SoftwareAccelerator, SoftwareDma};
use crate::counters::StageCounters;
use crate::error::{PipelineError, Result};
use crate::stage::StageController;
use crate::topology::Topology;
use meshpipe_fabric::{CommandPort, Fabric};
use meshpipe_proto::{ClusterId, CommandKind};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Configuration of one measurement job.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Images to move through the whole pipeline.
    pub images: u64,
    /// Tiles per image.
    pub tiles_per_image: u64,
    /// Poll-count latency of the software DMA engines.
    pub dma_latency: u32,
    /// Poll-count latency of the software accelerators.
    pub compute_latency: u32,
    /// Fabric wait deadline; a wedged stage surfaces `Timeout` instead of
    /// hanging the job.
    pub deadline: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            images: 4,
            tiles_per_image: 4,
            dma_latency: 0,
            compute_latency: 0,
            deadline: Duration::from_secs(10),
        }
    }
}

/// Final per-stage counters and timing for one job.
#[derive(Debug, Clone)]
pub struct JobReport {
    /// Wall time of the measurement window (barrier to barrier).
    pub elapsed: Duration,
    /// Images the job was configured for.
    pub images: u64,
    /// Tiles per image.
    pub tiles_per_image: u64,
    /// Final counters, in stage order.
    pub stages: Vec<StageCounters>,
}

impl JobReport {
    /// Tiles the tail stage wrote out.
    pub fn tiles_out(&self) -> u64 {
        self.stages.last().map_or(0, |c| c.tiles_out)
    }

    /// End-to-end throughput in tiles per second.
    pub fn tiles_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.tiles_out() as f64 / secs
    }

    /// End-to-end throughput in images per second.
    pub fn images_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.stages
            .last()
            .map_or(0, |c| c.images_out(self.tiles_per_image)) as f64
            / secs
    }
}

/// Run one measurement job over `topology`, one thread per cluster,
/// software collaborators throughout.
///
/// # Errors
///
/// The first error from any cluster thread aborts the report; a panicked
/// cluster thread surfaces as a collaborator failure.
pub fn run_job(topology: &Topology, cfg: &JobConfig) -> Result<JobReport> {
    topology.validate()?;
    if cfg.images == 0 {
        return Err(PipelineError::topology("job with zero images"));
    }
    let n = topology.cluster_count();
    let fabric = Fabric::with_deadline(n, cfg.deadline);
    let tail_cluster = topology.tail().cluster;
    debug!(
        "job: {} stages, depth {}, {} images x {} tiles",
        topology.stage_count(),
        topology.stages()[0].buffer_depth,
        cfg.images,
        cfg.tiles_per_image
    );

    // Workers: every stage except the master's.
    let workers: Vec<_> = topology.stages()[1..]
        .iter()
        .map(|stage_cfg| {
            let stage_cfg = stage_cfg.clone();
            let port = CommandPort::new(fabric.endpoint(stage_cfg.cluster)?);
            let mut ctl = StageController::new(
                stage_cfg,
                port,
                SoftwareAccelerator::new(cfg.compute_latency),
                SoftwareDma::new(cfg.dma_latency),
                cfg.images,
            );
            let is_tail = ctl.config().is_tail();
            Ok(std::thread::spawn(move || -> Result<StageCounters> {
                ctl.port_mut()
                    .recv(ClusterId::MASTER, CommandKind::ClusterStart)?;
                ctl.port_mut().endpoint().barrier()?;
                ctl.run_to_completion()?;
                if is_tail {
                    let accel = ctl.config().accelerator;
                    ctl.port_mut()
                        .send(ClusterId::MASTER, accel, CommandKind::ClusterTerminate)?;
                }
                ctl.port_mut().endpoint().barrier()?;
                Ok(ctl.into_counters())
            }))
        })
        .collect::<Result<Vec<_>>>()?;

    // Master: stage 0 on the calling thread.
    let master_cfg = topology.stages()[0].clone();
    let master_accel = master_cfg.accelerator;
    let master_is_tail = master_cfg.is_tail();
    let port = CommandPort::new(fabric.endpoint(ClusterId::MASTER)?);
    let mut master = StageController::new(
        master_cfg,
        port,
        SoftwareAccelerator::new(cfg.compute_latency),
        SoftwareDma::new(cfg.dma_latency),
        cfg.images,
    );

    for stage_cfg in &topology.stages()[1..] {
        master
            .port_mut()
            .send(stage_cfg.cluster, master_accel, CommandKind::ClusterStart)?;
    }
    master.port_mut().endpoint().barrier()?;
    let started = Instant::now();

    let master_result = master.run_to_completion().and_then(|()| {
        if master_is_tail {
            master
                .port_mut()
                .send(ClusterId::MASTER, master_accel, CommandKind::ClusterTerminate)?;
        }
        master
            .port_mut()
            .recv(tail_cluster, CommandKind::ClusterTerminate)?;
        Ok(())
    });

    // Enter the closing barrier even on a master-side error only if the
    // protocol is still healthy; otherwise fail fast and let workers time
    // out against the fabric deadline.
    master_result?;
    master.port_mut().endpoint().barrier()?;
    let elapsed = started.elapsed();

    let mut stages = vec![master.into_counters()];
    for handle in workers {
        let counters = handle
            .join()
            .map_err(|_| PipelineError::collaborator("cluster thread panicked"))??;
        stages.push(counters);
    }

    let report = JobReport {
        elapsed,
        images: cfg.images,
        tiles_per_image: cfg.tiles_per_image,
        stages,
    };
    info!(
        "job complete: {} tiles out in {:?} ({:.0} tiles/s)",
        report.tiles_out(),
        report.elapsed,
        report.tiles_per_second()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_stage_job() {
        let topo = Topology::linear(1, 2, 4).unwrap();
        let report = run_job(&topo, &JobConfig::default()).unwrap();
        assert_eq!(report.tiles_out(), 16);
        assert!(report.stages[0].drained());
    }

    #[test]
    fn zero_image_job_is_rejected() {
        let topo = Topology::linear(1, 2, 4).unwrap();
        let cfg = JobConfig {
            images: 0,
            ..Default::default()
        };
        assert!(run_job(&topo, &cfg).is_err());
    }

    #[test]
    fn two_stage_job_moves_every_tile() {
        let topo = Topology::linear(2, 2, 4).unwrap();
        let cfg = JobConfig {
            images: 10,
            tiles_per_image: 4,
            ..Default::default()
        };
        let report = run_job(&topo, &cfg).unwrap();
        assert_eq!(report.tiles_out(), 40);
        for c in &report.stages {
            assert_eq!(c.tiles_in, 40);
            assert_eq!(c.tiles_compute, 40);
            assert_eq!(c.tiles_out, 40);
            assert!(c.drained());
        }
    }
}

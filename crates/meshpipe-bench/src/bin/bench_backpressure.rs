//! Backpressure behavior under a slow consumer.
//!
//! Steps a two-stage chain round-robin on one thread with a compute-bound
//! consumer and records the peak image lead the producer reaches for each
//! ring depth. The lead is bounded by the depth regardless of how slow the
//! consumer is; a depth-D ring buys exactly D images of slack.

use anyhow::Result;
use meshpipe_fabric::{CommandPort, Fabric};
use meshpipe_pipeline::{SoftwareAccelerator, SoftwareDma, StageController, Topology};
use tracing_subscriber::EnvFilter;

const IMAGES: u64 = 20;
const TILES_PER_IMAGE: u64 = 4;
const CONSUMER_COMPUTE_LATENCY: u32 = 8;

fn peak_lead(depth: usize) -> Result<(u64, u64)> {
    let topo = Topology::linear(2, depth, TILES_PER_IMAGE)?;
    let fabric = Fabric::new(topo.cluster_count());
    let mut chain: Vec<StageController<SoftwareAccelerator, SoftwareDma>> = topo
        .stages()
        .iter()
        .map(|cfg| {
            // Stage 0 computes instantly; stage 1 drags each tile out.
            let latency = if cfg.is_tail() { CONSUMER_COMPUTE_LATENCY } else { 0 };
            let port = CommandPort::new(fabric.endpoint(cfg.cluster)?);
            Ok(StageController::new(
                cfg.clone(),
                port,
                SoftwareAccelerator::new(latency),
                SoftwareDma::new(0),
                IMAGES,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut peak = 0u64;
    let mut rounds = 0u64;
    while !chain.iter().all(StageController::is_done) {
        for ctl in chain.iter_mut() {
            ctl.round()?;
        }
        let produced = chain[0].counters().images_out(TILES_PER_IMAGE);
        let consumed = chain[1].counters().tiles_in / TILES_PER_IMAGE;
        peak = peak.max(produced.saturating_sub(consumed));
        rounds += 1;
    }
    Ok((peak, rounds))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    println!(
        "Producer lead vs ring depth ({IMAGES} images x {TILES_PER_IMAGE} tiles, \
         consumer compute latency {CONSUMER_COMPUTE_LATENCY} polls/tile)"
    );
    println!("==============================================================");
    println!();
    println!(
        "  {:>10}  {:>12}  {:>10}",
        "depth", "peak lead", "rounds"
    );
    println!("  {:-<10}  {:-<12}  {:-<10}", "", "", "");

    for depth in 1..=4usize {
        let (peak, rounds) = peak_lead(depth)?;
        println!("  {depth:>10}  {peak:>12}  {rounds:>10}");
    }

    println!();
    println!("Reference: peak lead == ring depth; the producer stalls on the");
    println!("first unreleased image slot, never on a counter check");

    Ok(())
}

//! Pipeline throughput sweep: stages x ring depth.
//!
//! Runs full threaded jobs over the software collaborators and tabulates
//! end-to-end tile throughput. With nonzero collaborator latencies, depth 2
//! should recover most of the transfer time that depth 1 serializes.

use anyhow::Result;
use meshpipe_pipeline::{run_job, JobConfig, Topology};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let cfg = JobConfig {
        images: 32,
        tiles_per_image: 4,
        dma_latency: 2,
        compute_latency: 3,
        deadline: Duration::from_secs(30),
    };

    println!(
        "Pipeline throughput ({} images x {} tiles, dma latency {}, compute latency {})",
        cfg.images, cfg.tiles_per_image, cfg.dma_latency, cfg.compute_latency
    );
    println!("==============================================================");
    println!();
    println!(
        "  {:>8}  {:>8}  {:>12}  {:>12}  {:>10}",
        "stages", "depth", "ms total", "tiles/s", "vs depth 1"
    );
    println!(
        "  {:-<8}  {:-<8}  {:-<12}  {:-<12}  {:-<10}",
        "", "", "", "", ""
    );

    for &stages in &[1usize, 2, 3, 4] {
        let mut baseline: Option<f64> = None;
        for depth in 1..=4usize {
            let topo = Topology::linear(stages, depth, cfg.tiles_per_image)?;
            let report = run_job(&topo, &cfg)?;
            let rate = report.tiles_per_second();
            let base = *baseline.get_or_insert(rate);
            println!(
                "  {:>8}  {:>8}  {:>12.1}  {:>12.0}  {:>9.2}x",
                stages,
                depth,
                report.elapsed.as_secs_f64() * 1e3,
                rate,
                rate / base
            );
        }
        println!();
    }

    println!("Reference: gains flatten past depth 2 once transfers fully overlap compute");

    Ok(())
}

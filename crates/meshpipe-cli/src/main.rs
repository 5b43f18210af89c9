//! `meshpipe` — command-line interface for pipeline jobs.
//!
//! ```text
//! USAGE:
//!   meshpipe run [--stages N] [--depth D] [--images I]   Run a job, print the report
//!   meshpipe barrier [--clusters N] [--iters K]          Time barrier cycles
//!   meshpipe topology [--stages N] [--depth D]           Print a validated topology
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use meshpipe_fabric::Fabric;
use meshpipe_pipeline::{run_job, JobConfig, Topology};
use meshpipe_proto::ClusterId;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "meshpipe", about = "Cluster pipeline orchestration CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run a pipeline job over the software collaborators.
    Run {
        /// Number of pipeline stages (one cluster each).
        #[arg(long, default_value_t = 2)]
        stages: usize,
        /// Ring depth per stage (1..=4).
        #[arg(long, default_value_t = 2)]
        depth: usize,
        /// Images to move through the pipeline.
        #[arg(long, default_value_t = 8)]
        images: u64,
        /// Tiles per image.
        #[arg(long, default_value_t = 4)]
        tiles_per_image: u64,
        /// DMA latency in polls per transfer.
        #[arg(long, default_value_t = 0)]
        dma_latency: u32,
        /// Accelerator latency in polls per tile.
        #[arg(long, default_value_t = 0)]
        compute_latency: u32,
    },
    /// Time barrier cycles across a cluster count.
    Barrier {
        /// Number of clusters.
        #[arg(long, default_value_t = 4)]
        clusters: usize,
        /// Barrier cycles to run.
        #[arg(long, default_value_t = 1000)]
        iters: usize,
    },
    /// Build and print a linear topology without running it.
    Topology {
        /// Number of pipeline stages.
        #[arg(long, default_value_t = 3)]
        stages: usize,
        /// Ring depth per stage (1..=4).
        #[arg(long, default_value_t = 2)]
        depth: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Run {
            stages,
            depth,
            images,
            tiles_per_image,
            dma_latency,
            compute_latency,
        } => cmd_run(stages, depth, images, tiles_per_image, dma_latency, compute_latency)?,
        Cmd::Barrier { clusters, iters } => cmd_barrier(clusters, iters)?,
        Cmd::Topology { stages, depth } => cmd_topology(stages, depth)?,
    }

    Ok(())
}

fn cmd_run(
    stages: usize,
    depth: usize,
    images: u64,
    tiles_per_image: u64,
    dma_latency: u32,
    compute_latency: u32,
) -> Result<()> {
    let topo = Topology::linear(stages, depth, tiles_per_image)?;
    let cfg = JobConfig {
        images,
        tiles_per_image,
        dma_latency,
        compute_latency,
        deadline: Duration::from_secs(30),
    };
    let report = run_job(&topo, &cfg)?;

    println!(
        "Job: {stages} stages, depth {depth}, {images} images x {tiles_per_image} tiles"
    );
    println!(
        "Done in {:.2} ms  ({:.0} tiles/s, {:.0} images/s)",
        report.elapsed.as_secs_f64() * 1e3,
        report.tiles_per_second(),
        report.images_per_second()
    );
    println!();
    println!(
        "  {:>6}  {:>10}  {:>12}  {:>10}",
        "stage", "tiles in", "tiles compute", "tiles out"
    );
    for (i, c) in report.stages.iter().enumerate() {
        println!(
            "  {:>6}  {:>10}  {:>12}  {:>10}",
            i, c.tiles_in, c.tiles_compute, c.tiles_out
        );
    }
    Ok(())
}

fn cmd_barrier(clusters: usize, iters: usize) -> Result<()> {
    let fabric = Fabric::with_deadline(clusters, Duration::from_secs(10));
    let workers: Vec<_> = (1..clusters)
        .map(|i| {
            let endpoint = fabric.endpoint(ClusterId(i as u32))?;
            Ok(std::thread::spawn(move || -> meshpipe_fabric::Result<()> {
                for _ in 0..iters {
                    endpoint.barrier()?;
                }
                Ok(())
            }))
        })
        .collect::<Result<Vec<_>>>()?;

    let master = fabric.endpoint(ClusterId::MASTER)?;
    let t0 = Instant::now();
    for _ in 0..iters {
        master.barrier()?;
    }
    let elapsed = t0.elapsed();
    for w in workers {
        w.join().expect("barrier worker panicked")?;
    }

    println!(
        "{iters} barrier cycles over {clusters} clusters: {:.2} ms ({:.1} µs/cycle)",
        elapsed.as_secs_f64() * 1e3,
        elapsed.as_micros() as f64 / iters as f64
    );
    Ok(())
}

fn cmd_topology(stages: usize, depth: usize) -> Result<()> {
    let topo = Topology::linear(stages, depth, 4)?;
    println!("Linear pipeline, {} clusters:", topo.cluster_count());
    for cfg in topo.stages() {
        let up = cfg
            .upstream
            .map_or_else(|| "source".to_owned(), |c| c.to_string());
        let down = cfg
            .downstream
            .map_or_else(|| "staging".to_owned(), |c| c.to_string());
        let feed = cfg
            .staging_feed
            .map(|c| format!("  (observes {c})"))
            .unwrap_or_default();
        println!(
            "  {} on {} / {}  depth {}  {up} -> {down}{feed}",
            cfg.stage, cfg.cluster, cfg.accelerator, cfg.buffer_depth
        );
    }
    Ok(())
}

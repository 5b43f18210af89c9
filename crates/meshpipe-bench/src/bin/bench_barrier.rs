//! Barrier latency benchmark.
//!
//! Measures the all-to-one-to-all barrier cycle across cluster counts, on
//! OS threads over the in-process fabric. The second table adds a fixed
//! straggler delay to one participant and confirms the barrier cost is the
//! slowest arrival plus the collector fan-out, not a function of N.

use anyhow::Result;
use meshpipe_fabric::Fabric;
use meshpipe_proto::ClusterId;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const CYCLES: usize = 500;

fn barrier_cycles(clusters: usize, straggle: Option<Duration>) -> Result<Duration> {
    let fabric = Fabric::with_deadline(clusters, Duration::from_secs(10));
    let workers: Vec<_> = (1..clusters)
        .map(|i| {
            let endpoint = fabric.endpoint(ClusterId(i as u32))?;
            let delay = (i == clusters - 1).then_some(straggle).flatten();
            Ok(std::thread::spawn(move || -> meshpipe_fabric::Result<()> {
                for _ in 0..CYCLES {
                    if let Some(d) = delay {
                        std::thread::sleep(d);
                    }
                    endpoint.barrier()?;
                }
                Ok(())
            }))
        })
        .collect::<Result<Vec<_>>>()?;

    let master = fabric.endpoint(ClusterId::MASTER)?;
    let t0 = Instant::now();
    for _ in 0..CYCLES {
        master.barrier()?;
    }
    let elapsed = t0.elapsed();
    for w in workers {
        w.join().expect("barrier worker panicked")?;
    }
    Ok(elapsed)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    println!("Barrier cycle latency ({CYCLES} cycles per row)");
    println!("==============================================================");
    println!();
    println!("  {:>10}  {:>12}  {:>12}", "clusters", "µs/cycle", "cycles/s");
    println!("  {:-<10}  {:-<12}  {:-<12}", "", "", "");

    for &clusters in &[2usize, 4, 8, 16, 32] {
        let elapsed = barrier_cycles(clusters, None)?;
        let us = elapsed.as_micros() as f64 / CYCLES as f64;
        println!("  {:>10}  {:>12.1}  {:>12.0}", clusters, us, 1e6 / us);
    }

    println!();
    println!("With one 100 µs straggler (cost is the slowest arrival, not N):");
    println!();
    println!("  {:>10}  {:>12}", "clusters", "µs/cycle");
    println!("  {:-<10}  {:-<12}", "", "");

    let straggle = Duration::from_micros(100);
    for &clusters in &[2usize, 8, 32] {
        let elapsed = barrier_cycles(clusters, Some(straggle))?;
        let us = elapsed.as_micros() as f64 / CYCLES as f64;
        println!("  {:>10}  {:>12.1}", clusters, us);
    }

    println!();
    println!("Reference: one condvar wake per participant per cycle");

    Ok(())
}

//! Exchange latency benchmark — grid-size sweep.
//!
//! Measures wall-clock latency of a full all-gather per grid shape,
//! including bring-up (channels, signals, endpoint table) and thread
//! spawn, since that is what a caller pays per run. Tile volume grows
//! as N² per run: every unit receives N-1 tiles plus its own.
//!
//! Usage:
//!   cargo run --release --bin bench_exchange
//!   cargo run --release --bin bench_exchange -- --iterations 200 --block-bytes 16384

use anyhow::Result;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use tilecast_core::{ExchangeConfig, GridCoordinator, Tile};
use tilecast_grid::GridTopology;

const DEFAULT_ITERATIONS: usize = 100;
const DEFAULT_BLOCK_BYTES: usize = 4096; // one 32x32 f32 tile
const GRIDS: &[(u32, u32)] = &[(1, 1), (2, 1), (2, 2), (3, 2), (3, 3), (4, 4)];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let iterations = parse_arg(&args, "--iterations", DEFAULT_ITERATIONS);
    let block_bytes = parse_arg(&args, "--block-bytes", DEFAULT_BLOCK_BYTES);

    println!("Exchange latency benchmark");
    println!("==========================");
    println!("Tile size  : {block_bytes} bytes");
    println!("Iterations : {iterations} per grid");
    println!();
    println!("{:>6} {:>6} {:>10} {:>10} {:>10} {:>12}", "grid", "units", "mean", "p50", "p95", "tiles/s");

    for &(x, y) in GRIDS {
        let topology = GridTopology::new(x, y);
        let coordinator = GridCoordinator::new(ExchangeConfig::new(topology, block_bytes))?;
        let tiles: Vec<Tile> = topology
            .unit_ids()
            .map(|i| Tile::splat_f32(i as f32, block_bytes / 4))
            .collect();

        // Warmup
        for _ in 0..5 {
            coordinator.run_exchange(tiles.clone())?;
        }

        let mut latencies_us = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            let t0 = Instant::now();
            coordinator.run_exchange(tiles.clone())?;
            latencies_us.push(t0.elapsed().as_micros() as f64);
        }

        latencies_us.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mean = latencies_us.iter().sum::<f64>() / iterations as f64;
        let p50 = latencies_us[iterations / 2];
        let p95 = latencies_us[(iterations as f64 * 0.95) as usize];

        // Tiles landed per run: every unit gathers N tiles.
        let n = f64::from(topology.unit_count());
        let tiles_per_sec = n * n / (mean / 1_000_000.0);

        println!(
            "{:>6} {:>6} {:>9.0}µ {:>9.0}µ {:>9.0}µ {:>12.0}",
            format!("{x}x{y}"),
            topology.unit_count(),
            mean,
            p50,
            p95,
            tiles_per_sec
        );
    }

    Ok(())
}

/// Parse `--flag value` from raw args, falling back to a default.
fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

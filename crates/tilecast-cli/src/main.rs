//! `tilecast` — command-line runner for the grid exchange patterns.
//!
//! ```text
//! USAGE:
//!   tilecast loopback  [--grid 2x2]             Stage every unit's tile through its own channel
//!   tilecast broadcast [--grid 2x2] [--root 0]  One root multicasts its tile to every unit
//!   tilecast exchange  [--grid 4x4]             Full all-gather: every unit ends with every tile
//! ```
//!
//! Each command feeds the grid synthetic tiles, runs the pattern on one
//! thread per unit, verifies the result and reports PASS or FAIL.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tilecast_core::{ExchangeConfig, GridCoordinator, Tile, TileChannel};
use tilecast_grid::{GridTopology, UnitId};

/// Tile payload size used by every demo, in bytes (1024 f32 elements —
/// one 32x32 tile of the hardware this models).
const BLOCK_BYTES: usize = 4096;

#[derive(Parser)]
#[command(name = "tilecast", about = "Grid tile-exchange demo runner", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Stage every unit's tile through its own channel and read it back.
    Loopback {
        /// Grid shape, e.g. 2x2.
        #[arg(long, default_value = "2x2")]
        grid: String,
    },
    /// Broadcast one root unit's tile to every other unit.
    Broadcast {
        /// Grid shape, e.g. 2x2.
        #[arg(long, default_value = "2x2")]
        grid: String,
        /// Broadcasting unit.
        #[arg(long, default_value_t = 0)]
        root: UnitId,
    },
    /// Run the full exchange: every unit ends holding every tile.
    Exchange {
        /// Grid shape, e.g. 4x4.
        #[arg(long, default_value = "4x4")]
        grid: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let pass = match cli.command {
        Cmd::Loopback { grid } => cmd_loopback(parse_grid(&grid)?)?,
        Cmd::Broadcast { grid, root } => cmd_broadcast(parse_grid(&grid)?, root)?,
        Cmd::Exchange { grid } => cmd_exchange(parse_grid(&grid)?)?,
    };

    if !pass {
        std::process::exit(1);
    }
    Ok(())
}

/// Parse a `XxY` grid shape.
fn parse_grid(spec: &str) -> Result<GridTopology> {
    let Some((x, y)) = spec.split_once('x') else {
        bail!("grid must look like 2x2, got '{spec}'");
    };
    let topology = GridTopology::new(x.trim().parse()?, y.trim().parse()?);
    if topology.unit_count() == 0 {
        bail!("grid '{spec}' holds no units");
    }
    Ok(topology)
}

/// Synthetic input tile for one unit: all elements `(id + 1) * 10`.
fn input_tile(unit: UnitId) -> Tile {
    Tile::splat_f32((unit as f32 + 1.0) * 10.0, BLOCK_BYTES / 4)
}

fn report(name: &str, topology: GridTopology, pass: bool) -> bool {
    if pass {
        println!("-- PASS: {name} on {}x{} --", topology.x, topology.y);
    } else {
        println!("-- FAIL: {name} on {}x{} --", topology.x, topology.y);
    }
    pass
}

/// Every unit stages its tile through its own channel and reads it
/// back, concurrently. Exercises the channel discipline alone.
fn cmd_loopback(topology: GridTopology) -> Result<bool> {
    let config = ExchangeConfig::new(topology, BLOCK_BYTES);
    info!(units = topology.unit_count(), "loopback start");

    let mut outputs: Vec<Option<tilecast_core::Result<Tile>>> =
        (0..topology.unit_count()).map(|_| None).collect();
    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for unit in topology.unit_ids() {
            handles.push(scope.spawn(move || -> tilecast_core::Result<Tile> {
                let own = TileChannel::new("own", unit, BLOCK_BYTES, 1, config.wait_timeout);
                own.reserve_write()?;
                own.stage(input_tile(unit))?;
                own.commit_write()?;
                own.wait_nonempty()?;
                own.pop_read()
            }));
        }
        for (unit, handle) in handles.into_iter().enumerate() {
            outputs[unit] = Some(handle.join().expect("loopback worker panicked"));
        }
    });

    let mut pass = true;
    for (unit, result) in outputs.into_iter().enumerate() {
        let tile = result.expect("one output per unit")?;
        if tile != input_tile(unit as UnitId) {
            println!("unit {unit}: loopback output differs from input");
            pass = false;
        }
    }
    Ok(report("loopback", topology, pass))
}

/// One root unit's tile lands on every unit.
fn cmd_broadcast(topology: GridTopology, root: UnitId) -> Result<bool> {
    let config = ExchangeConfig::new(topology, BLOCK_BYTES);
    let coordinator = GridCoordinator::new(config)?;
    info!(units = topology.unit_count(), root, "broadcast start");

    let outputs = coordinator.run_broadcast(root, input_tile(root))?;

    let mut pass = true;
    for (unit, tile) in outputs.iter().enumerate() {
        if *tile != input_tile(root) {
            println!("unit {unit}: broadcast tile differs from root tile");
            pass = false;
        }
    }
    Ok(report("broadcast", topology, pass))
}

/// Full all-gather, verified the way the hardware demo verifies it:
/// every unit's gathered region must equal the whole input set.
fn cmd_exchange(topology: GridTopology) -> Result<bool> {
    let config = ExchangeConfig::new(topology, BLOCK_BYTES);
    let coordinator = GridCoordinator::new(config)?;
    info!(units = topology.unit_count(), "exchange start");

    let inputs: Vec<Tile> = topology.unit_ids().map(input_tile).collect();
    let outputs = coordinator.run_exchange(inputs.clone())?;

    let mut pass = true;
    for (unit, gathered) in outputs.iter().enumerate() {
        if gathered != &inputs {
            println!("unit {unit}: gathered set differs from the input set");
            pass = false;
        }
    }
    Ok(report("exchange", topology, pass))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_spec_parsing() {
        let grid = parse_grid("3x2").unwrap();
        assert_eq!((grid.x, grid.y), (3, 2));
        assert!(parse_grid("3by2").is_err());
        assert!(parse_grid("0x4").is_err());
    }
}

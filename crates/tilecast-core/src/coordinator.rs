// SPDX-License-Identifier: AGPL-3.0-only

//! Grid bring-up and run orchestration.
//!
//! The coordinator owns everything the units themselves must not:
//! identity assignment, the endpoint table, configuration validation,
//! and the thread-per-unit run loop. It validates every configuration
//! error *before* the first round executes — a bad destination count or
//! tile size aborts the run with the offending parameters, it never
//! surfaces as a mid-protocol stall.
//!
//! Progress failures are aggregated: a stuck run has no well-defined
//! partial result, so the caller gets a single [`ExchangeError::Stalled`]
//! naming every unit that failed to complete and the peer each one was
//! waiting on.

use std::sync::Arc;
use std::thread;

use crossbeam_channel as channel;
use tracing::{debug, info};

use tilecast_grid::UnitId;

use crate::channel::TileChannel;
use crate::error::{ExchangeError, Result, StallReport};
use crate::exchange::{ExchangeConfig, ExchangeUnit};
use crate::interconnect::{Interconnect, UnitEndpoint};
use crate::signal::Signal;
use crate::tile::Tile;

/// Per-unit channel capacity, in tiles. One slot per channel suffices:
/// a receiver drains its inbox slot before reserving the next, and the
/// own channel holds exactly the unit's one tile.
const CHANNEL_CAPACITY: usize = 1;

/// Assigns identities and coordinates, brings up the interconnect, and
/// runs grid-wide operations.
#[derive(Debug)]
pub struct GridCoordinator {
    config: ExchangeConfig,
}

impl GridCoordinator {
    /// Create a coordinator for a validated configuration.
    ///
    /// # Errors
    ///
    /// `EmptyGrid` when the topology holds no units.
    pub fn new(config: ExchangeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration this coordinator runs with.
    #[must_use]
    pub const fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Bring up the grid: one channel pair and signal pair per unit, the
    /// endpoint table, and one [`ExchangeUnit`] per identity.
    ///
    /// Exposed so callers (and tests) can drive units on their own
    /// threads; [`Self::run_exchange`] is the packaged form.
    ///
    /// # Errors
    ///
    /// Currently infallible after construction-time validation, but the
    /// signature leaves room for endpoint-table failures.
    pub fn build_units(&self) -> Result<Vec<ExchangeUnit>> {
        let config = self.config;
        let topology = config.topology;

        let mut owns = Vec::new();
        let mut inboxes = Vec::new();
        let mut ready = Vec::new();
        let mut delivery = Vec::new();
        for unit in topology.unit_ids() {
            owns.push(TileChannel::new(
                "own",
                unit,
                config.block_size,
                CHANNEL_CAPACITY,
                config.wait_timeout,
            ));
            inboxes.push(TileChannel::new(
                "inbox",
                unit,
                config.block_size,
                CHANNEL_CAPACITY,
                config.wait_timeout,
            ));
            ready.push(Signal::new("sender-ready"));
            delivery.push(Signal::new("delivery"));
        }

        let endpoints = topology
            .unit_ids()
            .map(|unit| {
                let i = unit as usize;
                UnitEndpoint {
                    own: owns[i].port(),
                    inbox: inboxes[i].port(),
                    sender_ready: ready[i].handle(),
                    delivery: delivery[i].handle(),
                }
            })
            .collect();
        let fabric = Arc::new(Interconnect::new(topology, endpoints)?);

        let mut units = Vec::with_capacity(topology.unit_count() as usize);
        for unit in topology.unit_ids().rev() {
            units.push(ExchangeUnit::new(
                unit,
                config,
                owns.pop().expect("one channel per unit"),
                inboxes.pop().expect("one channel per unit"),
                ready.pop().expect("one signal per unit"),
                delivery.pop().expect("one signal per unit"),
                fabric.port(unit),
            ));
        }
        units.reverse();

        debug!(
            units = topology.unit_count(),
            grid_x = topology.x,
            grid_y = topology.y,
            "grid brought up"
        );
        Ok(units)
    }

    /// Run the all-gather: unit `i` starts with `tiles[i]`; on success
    /// every unit's output is the full tile set in id order.
    ///
    /// # Errors
    ///
    /// Configuration errors (`TileCountMismatch`, `TileSizeMismatch`)
    /// before any round executes; `Stalled` when one or more units
    /// never completed.
    pub fn run_exchange(&self, tiles: Vec<Tile>) -> Result<Vec<Vec<Tile>>> {
        self.validate_inputs(&tiles)?;
        let units = self.build_units()?;
        let n = units.len();
        info!(units = n, block_size = self.config.block_size, "exchange start");

        let results = run_on_threads(units, tiles, ExchangeUnit::run);
        let outputs = collect(results)?;
        info!(units = n, "exchange complete");
        Ok(outputs)
    }

    /// Run one broadcast round with `root` as sender. Every unit emits
    /// one tile; on success they are all copies of `tile`.
    ///
    /// # Errors
    ///
    /// `UnknownUnit` for a root outside the grid, `TileSizeMismatch`
    /// for a bad payload, `Stalled` on progress failure.
    pub fn run_broadcast(&self, root: UnitId, tile: Tile) -> Result<Vec<Tile>> {
        let topology = self.config.topology;
        if root >= topology.unit_count() {
            return Err(ExchangeError::UnknownUnit {
                unit: root,
                x: topology.x,
                y: topology.y,
            });
        }
        self.validate_tile(&tile, "broadcast root input")?;
        let units = self.build_units()?;

        // Non-root units never read their input; hand everyone the
        // same payload to keep the per-thread closure uniform.
        let tiles = vec![tile; units.len()];
        let results = run_on_threads(units, tiles, move |unit, t| unit.run_broadcast(root, t));
        let outputs = collect(results)?;
        Ok(outputs)
    }

    fn validate_inputs(&self, tiles: &[Tile]) -> Result<()> {
        let expected = self.config.topology.unit_count() as usize;
        if tiles.len() != expected {
            return Err(ExchangeError::TileCountMismatch {
                expected,
                actual: tiles.len(),
            });
        }
        for (unit, tile) in tiles.iter().enumerate() {
            self.validate_tile(tile, &format!("unit {unit} input"))?;
        }
        Ok(())
    }

    fn validate_tile(&self, tile: &Tile, context: &str) -> Result<()> {
        if tile.len() != self.config.block_size {
            return Err(ExchangeError::TileSizeMismatch {
                expected: self.config.block_size,
                actual: tile.len(),
                context: context.to_string(),
            });
        }
        Ok(())
    }
}

/// Run one unit per thread, draining per-unit results through a channel
/// sink. Returns results in unit-id order.
fn run_on_threads<T, F>(units: Vec<ExchangeUnit>, tiles: Vec<Tile>, op: F) -> Vec<Result<T>>
where
    T: Send,
    F: Fn(ExchangeUnit, Tile) -> Result<T> + Send + Sync,
{
    let n = units.len();
    let (tx, rx) = channel::bounded(n);
    let mut results: Vec<Option<Result<T>>> = (0..n).map(|_| None).collect();

    thread::scope(|scope| {
        for (unit, tile) in units.into_iter().zip(tiles) {
            let tx = tx.clone();
            let op = &op;
            scope.spawn(move || {
                let id = unit.id();
                let result = op(unit, tile);
                // The sink outlives the scope; a send cannot fail.
                let _ = tx.send((id, result));
            });
        }
        drop(tx);
        for (id, result) in rx.iter().take(n) {
            results[id as usize] = Some(result);
        }
    });

    results
        .into_iter()
        .map(|slot| slot.expect("every unit reports exactly once"))
        .collect()
}

/// Separate successes from failures, aggregating stalls per the
/// one-failure-per-run policy.
fn collect<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    let mut outputs = Vec::with_capacity(results.len());
    let mut reports: Vec<StallReport> = Vec::new();
    for result in results {
        match result {
            Ok(value) => outputs.push(value),
            Err(err) => match err.stall_report() {
                Some(report) => reports.push(report),
                // A non-stall failure mid-run is a bug in the caller's
                // setup or in the engine; report it directly.
                None => return Err(err),
            },
        }
    }
    if reports.is_empty() {
        Ok(outputs)
    } else {
        Err(ExchangeError::Stalled { reports })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tilecast_grid::GridTopology;

    const BLOCK: usize = 64;

    fn tiles(n: u32) -> Vec<Tile> {
        (0..n).map(|i| Tile::splat_f32(i as f32 * 10.0, BLOCK / 4)).collect()
    }

    #[test]
    fn tile_count_is_validated_before_running() {
        let config = ExchangeConfig::new(GridTopology::new(2, 2), BLOCK);
        let coordinator = GridCoordinator::new(config).unwrap();
        let err = coordinator.run_exchange(tiles(3)).unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::TileCountMismatch {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn tile_size_is_validated_before_running() {
        let config = ExchangeConfig::new(GridTopology::new(1, 2), BLOCK);
        let coordinator = GridCoordinator::new(config).unwrap();
        let bad = vec![
            Tile::splat_f32(1.0, BLOCK / 4),
            Tile::splat_f32(2.0, BLOCK / 2),
        ];
        let err = coordinator.run_exchange(bad).unwrap_err();
        match err {
            ExchangeError::TileSizeMismatch {
                expected, context, ..
            } => {
                assert_eq!(expected, BLOCK);
                assert!(context.contains("unit 1"));
            }
            other => panic!("expected size mismatch, got {other}"),
        }
    }

    #[test]
    fn small_grid_round_trip() {
        let config = ExchangeConfig::new(GridTopology::new(2, 1), BLOCK)
            .with_wait_timeout(Duration::from_secs(2));
        let coordinator = GridCoordinator::new(config).unwrap();
        let outputs = coordinator.run_exchange(tiles(2)).unwrap();
        for gathered in &outputs {
            let firsts: Vec<_> = gathered.iter().map(|t| t.first_f32().unwrap()).collect();
            assert_eq!(firsts, vec![0.0, 10.0]);
        }
    }

    #[test]
    fn empty_grid_never_constructs() {
        let config = ExchangeConfig::new(GridTopology::new(0, 0), BLOCK);
        assert!(GridCoordinator::new(config).is_err());
    }
}

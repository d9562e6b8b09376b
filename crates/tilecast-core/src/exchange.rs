// SPDX-License-Identifier: AGPL-3.0-only

//! The round-based exchange scheduler.
//!
//! Every unit runs [`ExchangeUnit::run`] concurrently. The run is N
//! global rounds, one per unit id in ascending order; in round `r` unit
//! `r` broadcasts its tile to everyone else. A unit's own code is
//! straight-line: receive from every lower-id peer, broadcast, then
//! receive from every higher-id peer. There is no shared clock and no
//! central coordinator; the total order falls out of the signal
//! pattern alone.
//!
//! Why no cycle of waits exists: a unit reaches "declare ready to peer
//! `i`" without waiting on anything round `i` produces, so the senders
//! that satisfy each wait form a disjoint acyclic set. The readiness
//! barrier is satisfied once by N-1 monotone increments, and the
//! delivery wait is satisfied once by that round's unique sender. Each
//! unit broadcasts at most once and receives from each peer exactly
//! once.
//!
//! The sender must fence its multicast before it sets any delivery
//! signal. That ordering carries the whole protocol: a receiver that
//! passes its delivery wait may read its inbox slot without any
//! further handshake, because the payload landed before the signal
//! left the sender.

use std::time::Duration;

use tracing::debug;

use tilecast_grid::{CoreRange, GridTopology, UnitId};

use crate::channel::TileChannel;
use crate::error::{ExchangeError, Result};
use crate::interconnect::{ChannelId, NocPort, SignalId};
use crate::signal::Signal;
use crate::tile::Tile;

/// Default deadline for every blocking wait in a run.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration of one exchange run, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeConfig {
    /// Grid the exchange runs on.
    pub topology: GridTopology,
    /// Tile size in bytes, identical for every unit.
    pub block_size: usize,
    /// Deadline for every blocking wait; expiry converts a missing peer
    /// into a reported failure instead of a hang.
    pub wait_timeout: Duration,
}

impl ExchangeConfig {
    /// Configuration with the default wait deadline.
    #[must_use]
    pub const fn new(topology: GridTopology, block_size: usize) -> Self {
        Self {
            topology,
            block_size,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    /// Override the wait deadline.
    #[must_use]
    pub const fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    /// Reject configurations that cannot run at all.
    ///
    /// # Errors
    ///
    /// `EmptyGrid` when the topology holds no units.
    pub fn validate(&self) -> Result<()> {
        if self.topology.unit_count() == 0 {
            return Err(ExchangeError::EmptyGrid {
                x: self.topology.x,
                y: self.topology.y,
            });
        }
        Ok(())
    }

    pub(crate) fn wait_timeout_ms(&self) -> u64 {
        u64::try_from(self.wait_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

/// One unit's scheduler state: its channels, its signals, and its
/// window onto the interconnect.
#[derive(Debug)]
pub struct ExchangeUnit {
    pub(crate) id: UnitId,
    pub(crate) unit_count: u32,
    pub(crate) grid_rect: CoreRange,
    pub(crate) config: ExchangeConfig,
    pub(crate) own: TileChannel,
    pub(crate) inbox: TileChannel,
    pub(crate) sender_ready: Signal,
    pub(crate) delivery: Signal,
    pub(crate) port: NocPort,
}

impl ExchangeUnit {
    /// Assemble a unit from its exclusively-owned resources.
    ///
    /// The coordinator is the usual caller; tests drive units (or
    /// deliberately broken variants) directly through the same parts.
    ///
    /// # Panics
    ///
    /// Panics if the configuration's topology holds no units; the
    /// coordinator validates before building.
    #[must_use]
    pub fn new(
        id: UnitId,
        config: ExchangeConfig,
        own: TileChannel,
        inbox: TileChannel,
        sender_ready: Signal,
        delivery: Signal,
        port: NocPort,
    ) -> Self {
        let grid_rect = config
            .topology
            .full_range()
            .expect("validated topology holds at least one unit");
        Self {
            id,
            unit_count: config.topology.unit_count(),
            grid_rect,
            config,
            own,
            inbox,
            sender_ready,
            delivery,
            port,
        }
    }

    /// Unit id in `[0, N)`.
    #[must_use]
    pub const fn id(&self) -> UnitId {
        self.id
    }

    /// Run the exchange: start with `tile`, finish with every unit's
    /// tile in id order.
    ///
    /// # Errors
    ///
    /// `PeerUnresponsive` / `ReadinessStall` when a wait deadline
    /// expires; configuration errors if the tile disagrees with the
    /// configured block size.
    pub fn run(mut self, tile: Tile) -> Result<Vec<Tile>> {
        // Step 1: stage the unit's own tile through its own channel.
        self.own.reserve_write()?;
        self.own.stage(tile)?;
        self.own.commit_write()?;

        let n = self.unit_count;
        if n == 1 {
            // Single unit: zero signal waits, zero transfers.
            return Ok(vec![self.own.pop_read()?]);
        }

        let mut gathered = Vec::with_capacity(n as usize);

        // Rounds before ours: act as receiver.
        for peer in 0..self.id {
            gathered.push(self.receive_from(peer)?);
        }

        // Our round: broadcast the own tile to everyone else.
        gathered.push(self.broadcast_own()?);

        // Rounds after ours: act as receiver again.
        for peer in self.id + 1..n {
            gathered.push(self.receive_from(peer)?);
        }

        debug!(unit = self.id, tiles = gathered.len(), "exchange complete");
        Ok(gathered)
    }

    /// One receiver round: declare readiness to `peer`, then block until
    /// its broadcast lands in the inbox.
    fn receive_from(&mut self, peer: UnitId) -> Result<Tile> {
        // Reset before declaring readiness: the delivery flag must not
        // carry a stale 1 from the previous round into this wait.
        self.delivery.set(0);
        self.inbox.reserve_write()?;
        self.port.signal_increment(peer, SignalId::SenderReady, 1)?;
        debug!(unit = self.id, peer, "ready, awaiting broadcast");

        self.delivery
            .wait_at_least(1, self.config.wait_timeout)
            .map_err(|_| ExchangeError::PeerUnresponsive {
                unit: self.id,
                waiting_on: peer,
                timeout_ms: self.config.wait_timeout_ms(),
            })?;

        // The sender fenced the payload before setting delivery, so the
        // reserved slot is fully written; publish and drain it.
        self.inbox.commit_write()?;
        self.inbox.pop_read()
    }

    /// Our round as sender: barrier on N-1 readiness declarations, then
    /// multicast, fence, and deliver the receipt notification.
    fn broadcast_own(&mut self) -> Result<Tile> {
        let expected = self.unit_count - 1;
        self.sender_ready
            .wait_at_least(expected, self.config.wait_timeout)
            .map_err(|stuck| ExchangeError::ReadinessStall {
                unit: self.id,
                observed: stuck.observed,
                expected,
            })?;
        // No further broadcasts from this unit; reset for cleanliness.
        self.sender_ready.set(0);

        let mine = self.own.pop_read()?;
        self.port
            .multicast(self.grid_rect, ChannelId::Inbox, mine.clone(), expected)?;
        self.port.await_completion()?;
        self.port
            .signal_set_range(self.grid_rect, SignalId::Delivery, 1)?;
        debug!(unit = self.id, receivers = expected, "broadcast complete");
        Ok(mine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interconnect::{Interconnect, UnitEndpoint};
    use std::sync::Arc;
    use std::thread;

    const BLOCK: usize = 32;

    /// Build the full per-unit resource set for a grid, by hand.
    fn build_units(config: ExchangeConfig) -> Vec<ExchangeUnit> {
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
                1,
                config.wait_timeout,
            ));
            inboxes.push(TileChannel::new(
                "inbox",
                unit,
                config.block_size,
                1,
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
        let fabric = Arc::new(Interconnect::new(topology, endpoints).unwrap());

        let mut units = Vec::new();
        for unit in topology.unit_ids().rev() {
            units.push(ExchangeUnit::new(
                unit,
                config,
                owns.pop().unwrap(),
                inboxes.pop().unwrap(),
                ready.pop().unwrap(),
                delivery.pop().unwrap(),
                fabric.port(unit),
            ));
        }
        units.reverse();
        units
    }

    #[test]
    fn single_unit_emits_only_its_own_tile() {
        let config = ExchangeConfig::new(GridTopology::new(1, 1), BLOCK);
        let unit = build_units(config).pop().unwrap();
        let out = unit.run(Tile::splat_f32(9.0, BLOCK / 4)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].first_f32(), Some(9.0));
    }

    #[test]
    fn two_units_swap_tiles() {
        let config = ExchangeConfig::new(GridTopology::new(2, 1), BLOCK)
            .with_wait_timeout(Duration::from_secs(2));
        let units = build_units(config);
        let workers: Vec<_> = units
            .into_iter()
            .enumerate()
            .map(|(i, unit)| {
                thread::spawn(move || unit.run(Tile::splat_f32(i as f32 + 1.0, BLOCK / 4)))
            })
            .collect();
        for (i, worker) in workers.into_iter().enumerate() {
            let gathered = worker.join().unwrap().unwrap();
            let firsts: Vec<_> = gathered.iter().map(|t| t.first_f32().unwrap()).collect();
            assert_eq!(firsts, vec![1.0, 2.0], "unit {i} gathered out of order");
        }
    }

    #[test]
    fn empty_grid_is_rejected() {
        let config = ExchangeConfig::new(GridTopology::new(0, 3), BLOCK);
        assert!(matches!(
            config.validate(),
            Err(ExchangeError::EmptyGrid { x: 0, y: 3 })
        ));
    }
}

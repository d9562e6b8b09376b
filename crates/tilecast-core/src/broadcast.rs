//! Single-root broadcast.
//!
//! The one-round special case of the exchange: one fixed root unit
//! multicasts its tile to every other unit, with the same
//! readiness-barrier / multicast / fence / delivery handshake the full
//! exchange uses per round. Useful on its own for distributing shared
//! operands, and as the smallest pattern that exercises Signal and the
//! transfer fence together.

use tracing::debug;

use tilecast_grid::UnitId;

use crate::error::{ExchangeError, Result};
use crate::exchange::ExchangeUnit;
use crate::interconnect::{ChannelId, SignalId};
use crate::tile::Tile;

impl ExchangeUnit {
    /// Run one broadcast round with `root` as the sender.
    ///
    /// The root stages and sends `tile`; every other unit ignores its
    /// `tile` argument and emits what the root delivered. Every unit
    /// returns exactly one tile.
    ///
    /// # Errors
    ///
    /// `UnknownUnit` if `root` is outside the grid; `ReadinessStall` /
    /// `PeerUnresponsive` when a wait deadline expires.
    pub fn run_broadcast(mut self, root: UnitId, tile: Tile) -> Result<Tile> {
        if root >= self.unit_count {
            let topology = self.config.topology;
            return Err(ExchangeError::UnknownUnit {
                unit: root,
                x: topology.x,
                y: topology.y,
            });
        }

        if self.id != root {
            self.delivery.set(0);
            self.inbox.reserve_write()?;
            self.port.signal_increment(root, SignalId::SenderReady, 1)?;
            debug!(unit = self.id, root, "ready, awaiting root broadcast");
            self.delivery
                .wait_at_least(1, self.config.wait_timeout)
                .map_err(|_| ExchangeError::PeerUnresponsive {
                    unit: self.id,
                    waiting_on: root,
                    timeout_ms: self.config.wait_timeout_ms(),
                })?;
            self.inbox.commit_write()?;
            return self.inbox.pop_read();
        }

        // Root: stage the tile, wait for every receiver, send, fence,
        // then deliver the notification.
        self.own.reserve_write()?;
        self.own.stage(tile)?;
        self.own.commit_write()?;

        let receivers = self.unit_count - 1;
        if receivers > 0 {
            self.sender_ready
                .wait_at_least(receivers, self.config.wait_timeout)
                .map_err(|stuck| ExchangeError::ReadinessStall {
                    unit: self.id,
                    observed: stuck.observed,
                    expected: receivers,
                })?;
            self.sender_ready.set(0);
        }

        let mine = self.own.pop_read()?;
        if receivers > 0 {
            self.port
                .multicast(self.grid_rect, ChannelId::Inbox, mine.clone(), receivers)?;
            self.port.await_completion()?;
            self.port
                .signal_set_range(self.grid_rect, SignalId::Delivery, 1)?;
        }
        debug!(unit = self.id, receivers, "root broadcast complete");
        Ok(mine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::GridCoordinator;
    use crate::exchange::ExchangeConfig;
    use std::thread;
    use std::time::Duration;
    use tilecast_grid::GridTopology;

    const BLOCK: usize = 32;

    #[test]
    fn every_unit_ends_with_the_root_tile() {
        let config = ExchangeConfig::new(GridTopology::new(2, 2), BLOCK)
            .with_wait_timeout(Duration::from_secs(2));
        let coordinator = GridCoordinator::new(config).unwrap();
        let units = coordinator.build_units().unwrap();

        let workers: Vec<_> = units
            .into_iter()
            .map(|unit| {
                let input = Tile::splat_f32(unit.id() as f32, BLOCK / 4);
                thread::spawn(move || unit.run_broadcast(1, input))
            })
            .collect();
        for worker in workers {
            let tile = worker.join().unwrap().unwrap();
            assert_eq!(tile.first_f32(), Some(1.0));
        }
    }

    #[test]
    fn root_outside_grid_is_rejected() {
        let config = ExchangeConfig::new(GridTopology::new(1, 1), BLOCK);
        let coordinator = GridCoordinator::new(config).unwrap();
        let unit = coordinator.build_units().unwrap().pop().unwrap();
        let err = unit
            .run_broadcast(5, Tile::splat_f32(0.0, BLOCK / 4))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::UnknownUnit { unit: 5, .. }));
    }

    #[test]
    fn single_unit_broadcast_is_a_loopback() {
        let config = ExchangeConfig::new(GridTopology::new(1, 1), BLOCK);
        let coordinator = GridCoordinator::new(config).unwrap();
        let unit = coordinator.build_units().unwrap().pop().unwrap();
        let tile = unit
            .run_broadcast(0, Tile::splat_f32(4.25, BLOCK / 4))
            .unwrap();
        assert_eq!(tile.first_f32(), Some(4.25));
    }
}

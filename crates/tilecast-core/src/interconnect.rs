// SPDX-License-Identifier: AGPL-3.0-only

//! The interconnect: payload transfers and remote signal writes.
//!
//! The hardware this models moves tiles between units' scratch memories
//! over a network-on-chip: asynchronous writes that become visible to
//! the destination only after the issuer's write barrier. The software
//! rendition keeps that asynchrony honest — [`NocPort::unicast`] and
//! [`NocPort::multicast`] only *enqueue* deposits, and nothing lands
//! until [`NocPort::await_completion`]. Signaling a receiver before the
//! fence therefore exposes exactly the bug it would expose on silicon:
//! the destination slot is observably unwritten.
//!
//! Signal writes ([`NocPort::signal_increment`] and friends) apply
//! immediately: they are the notifications the protocol orders payloads
//! with, not payloads themselves.
//!
//! Addressing goes through a `unit id → endpoint` table populated once
//! at bring-up, so no physical topology leaks into the schedulers.

use std::sync::Arc;

use tracing::trace;

use tilecast_grid::{CoreRange, GridTopology, UnitId};

use crate::channel::ChannelPort;
use crate::error::{ExchangeError, Result};
use crate::signal::SignalHandle;
use crate::tile::Tile;

/// Destination channel of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelId {
    /// The unit's own-tile staging channel.
    Own,
    /// The unit's peer-receive channel.
    Inbox,
}

/// Destination signal of a remote signal write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalId {
    /// Counts peers ready to receive from the signal's owner.
    SenderReady,
    /// Set to 1 when the broadcast the owner waits for has landed.
    Delivery,
}

/// Remote-writable surface of one unit, registered at bring-up.
#[derive(Debug, Clone)]
pub struct UnitEndpoint {
    /// Deposit port of the unit's own-tile channel.
    pub own: ChannelPort,
    /// Deposit port of the unit's peer-receive channel.
    pub inbox: ChannelPort,
    /// Handle to the unit's readiness counter.
    pub sender_ready: SignalHandle,
    /// Handle to the unit's delivery flag.
    pub delivery: SignalHandle,
}

impl UnitEndpoint {
    fn channel(&self, id: ChannelId) -> &ChannelPort {
        match id {
            ChannelId::Own => &self.own,
            ChannelId::Inbox => &self.inbox,
        }
    }

    fn signal(&self, id: SignalId) -> &SignalHandle {
        match id {
            SignalId::SenderReady => &self.sender_ready,
            SignalId::Delivery => &self.delivery,
        }
    }
}

/// Endpoint table for one grid, shared by every unit's [`NocPort`].
#[derive(Debug)]
pub struct Interconnect {
    topology: GridTopology,
    endpoints: Vec<UnitEndpoint>,
}

impl Interconnect {
    /// Build the interconnect from one endpoint per unit, in id order.
    ///
    /// # Errors
    ///
    /// `EmptyGrid` for a unit-less topology, `EndpointCountMismatch` if
    /// the endpoint table does not cover the grid.
    pub fn new(topology: GridTopology, endpoints: Vec<UnitEndpoint>) -> Result<Self> {
        if topology.unit_count() == 0 {
            return Err(ExchangeError::EmptyGrid {
                x: topology.x,
                y: topology.y,
            });
        }
        if endpoints.len() != topology.unit_count() as usize {
            return Err(ExchangeError::EndpointCountMismatch {
                expected: topology.unit_count() as usize,
                actual: endpoints.len(),
            });
        }
        Ok(Self {
            topology,
            endpoints,
        })
    }

    /// Grid this interconnect spans.
    #[must_use]
    pub const fn topology(&self) -> GridTopology {
        self.topology
    }

    /// Issuer port for one unit.
    #[must_use]
    pub fn port(self: &Arc<Self>, unit: UnitId) -> NocPort {
        NocPort {
            unit,
            fabric: Arc::clone(self),
            pending: Vec::new(),
        }
    }

    fn endpoint(&self, unit: UnitId) -> Result<&UnitEndpoint> {
        self.endpoints
            .get(unit as usize)
            .ok_or(ExchangeError::UnknownUnit {
                unit,
                x: self.topology.x,
                y: self.topology.y,
            })
    }
}

/// One unit's window onto the interconnect.
///
/// Payload writes are buffered here until the completion fence; signal
/// writes go out immediately.
#[derive(Debug)]
pub struct NocPort {
    unit: UnitId,
    fabric: Arc<Interconnect>,
    pending: Vec<(UnitId, ChannelId, Tile)>,
}

impl NocPort {
    /// Issuing unit.
    #[must_use]
    pub const fn unit(&self) -> UnitId {
        self.unit
    }

    /// Enqueue one tile for one destination unit's channel.
    ///
    /// # Errors
    ///
    /// `UnknownUnit` if `dst` is outside the grid.
    pub fn unicast(&mut self, dst: UnitId, channel: ChannelId, tile: Tile) -> Result<()> {
        self.fabric.endpoint(dst)?;
        trace!(src = self.unit, dst, ?channel, "unicast queued");
        self.pending.push((dst, channel, tile));
        Ok(())
    }

    /// Enqueue one tile for every unit in `rect` except the issuer.
    ///
    /// `dest_count` is the issuer's claim of how many destinations the
    /// rectangle addresses; it is verified against the live rectangle
    /// before anything is queued. An off-by-one here would silently
    /// drop or over-deliver on hardware, so it is fatal.
    ///
    /// # Errors
    ///
    /// `RangeOutsideGrid` if the rectangle leaves the grid,
    /// `DestCountMismatch` if the claim is wrong.
    pub fn multicast(
        &mut self,
        rect: CoreRange,
        channel: ChannelId,
        tile: Tile,
        dest_count: u32,
    ) -> Result<()> {
        let topology = self.fabric.topology;
        let mut dests = Vec::with_capacity(rect.count() as usize);
        for coord in rect.iter() {
            let id = topology.id_of(coord).ok_or(ExchangeError::RangeOutsideGrid {
                cx: coord.x,
                cy: coord.y,
                x: topology.x,
                y: topology.y,
            })?;
            if id != self.unit {
                dests.push(id);
            }
        }
        let actual = dests.len() as u32;
        if dest_count != actual {
            return Err(ExchangeError::DestCountMismatch {
                declared: dest_count,
                actual,
            });
        }
        trace!(src = self.unit, count = actual, ?channel, "multicast queued");
        for dst in dests {
            self.pending.push((dst, channel, tile.clone()));
        }
        Ok(())
    }

    /// The completion fence: land every queued payload write.
    ///
    /// Until this returns, no destination may be signaled about the
    /// writes — the payloads are not visible yet.
    ///
    /// # Errors
    ///
    /// Propagates deposit failures (`NoReservedSlot`,
    /// `TileSizeMismatch`) with the queue drained up to the failure.
    pub fn await_completion(&mut self) -> Result<()> {
        for (dst, channel, tile) in self.pending.drain(..) {
            let endpoint = self.fabric.endpoint(dst)?;
            endpoint.channel(channel).deposit(tile)?;
            trace!(src = self.unit, dst, ?channel, "deposit landed");
        }
        Ok(())
    }

    /// Queued payload writes not yet fenced. Diagnostics only.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Overwrite a signal owned by `dst`.
    ///
    /// # Errors
    ///
    /// `UnknownUnit` if `dst` is outside the grid.
    pub fn signal_set(&self, dst: UnitId, signal: SignalId, value: u32) -> Result<()> {
        self.fabric.endpoint(dst)?.signal(signal).set(value);
        Ok(())
    }

    /// Add `delta` to a signal owned by `dst`.
    ///
    /// # Errors
    ///
    /// `UnknownUnit` if `dst` is outside the grid.
    pub fn signal_increment(&self, dst: UnitId, signal: SignalId, delta: u32) -> Result<()> {
        self.fabric.endpoint(dst)?.signal(signal).increment(delta);
        Ok(())
    }

    /// Overwrite a signal on every unit in `rect` except the issuer.
    ///
    /// The set-broadcast form of the delivery notification.
    ///
    /// # Errors
    ///
    /// `RangeOutsideGrid` if the rectangle leaves the grid.
    pub fn signal_set_range(&self, rect: CoreRange, signal: SignalId, value: u32) -> Result<()> {
        let topology = self.fabric.topology;
        for coord in rect.iter() {
            let id = topology.id_of(coord).ok_or(ExchangeError::RangeOutsideGrid {
                cx: coord.x,
                cy: coord.y,
                x: topology.x,
                y: topology.y,
            })?;
            if id != self.unit {
                self.fabric.endpoint(id)?.signal(signal).set(value);
            }
        }
        Ok(())
    }
}

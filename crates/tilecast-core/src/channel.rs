// SPDX-License-Identifier: AGPL-3.0-only

//! Per-unit tile channels.
//!
//! A channel is a bounded FIFO of tile slots in one unit's scratch
//! memory. The write side is split the way the hardware splits it:
//! `reserve_write` claims a slot (back-pressure), `stage` writes the
//! payload into the oldest claimed slot, `commit_write` publishes it.
//! The split matters because the stager is not always the owner — a
//! remote transfer deposits into a slot the receiving unit reserved,
//! and the receiver commits only after the delivery signal says the
//! payload is fully written. A slot is never readable before commit.
//!
//! Capacity is counted in whole tiles. Every stage validates the tile
//! against the channel's block size; a mismatch is a configuration
//! error, not a truncation.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tilecast_grid::UnitId;

use crate::error::{ExchangeError, Result};
use crate::tile::Tile;

#[derive(Debug)]
struct SlotQueue {
    /// Claimed slots in claim order; `None` until staged.
    reserved: VecDeque<Option<Tile>>,
    /// Committed slots, readable in commit order.
    ready: VecDeque<Tile>,
}

#[derive(Debug)]
struct ChannelState {
    name: &'static str,
    owner: UnitId,
    block_size: usize,
    capacity: usize,
    wait_timeout: Duration,
    slots: Mutex<SlotQueue>,
    cond: Condvar,
}

/// Bounded FIFO staging area for tiles, local to one unit.
#[derive(Debug)]
pub struct TileChannel {
    state: Arc<ChannelState>,
}

/// Deposit-only handle to a channel, held by the interconnect registry.
///
/// A deposit stages a payload into the oldest reserved slot; it never
/// reserves, commits, or reads.
#[derive(Debug, Clone)]
pub struct ChannelPort {
    state: Arc<ChannelState>,
}

impl TileChannel {
    /// Create a channel with every slot free.
    #[must_use]
    pub fn new(
        name: &'static str,
        owner: UnitId,
        block_size: usize,
        capacity: usize,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            state: Arc::new(ChannelState {
                name,
                owner,
                block_size,
                capacity,
                wait_timeout,
                slots: Mutex::new(SlotQueue {
                    reserved: VecDeque::new(),
                    ready: VecDeque::new(),
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Deposit handle for the interconnect registry.
    #[must_use]
    pub fn port(&self) -> ChannelPort {
        ChannelPort {
            state: Arc::clone(&self.state),
        }
    }

    /// Channel name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.state.name
    }

    /// Owning unit.
    #[must_use]
    pub fn owner(&self) -> UnitId {
        self.state.owner
    }

    /// Claim the next free slot, blocking while the channel is full.
    ///
    /// # Errors
    ///
    /// `ChannelTimeout` if no slot frees up within the configured wait.
    pub fn reserve_write(&self) -> Result<()> {
        let state = &self.state;
        let deadline = Instant::now() + state.wait_timeout;
        let mut slots = state.slots.lock().expect("channel mutex poisoned");
        while slots.reserved.len() + slots.ready.len() >= state.capacity {
            let now = Instant::now();
            if now >= deadline {
                return Err(ExchangeError::ChannelTimeout {
                    unit: state.owner,
                    channel: state.name,
                    op: "reserve_write",
                    timeout_ms: u64::try_from(state.wait_timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            let (next, _) = state
                .cond
                .wait_timeout(slots, deadline - now)
                .expect("channel mutex poisoned");
            slots = next;
        }
        slots.reserved.push_back(None);
        Ok(())
    }

    /// Write a payload into the oldest reserved-and-empty slot.
    ///
    /// # Errors
    ///
    /// `TileSizeMismatch` if the tile disagrees with the block size,
    /// `NoReservedSlot` if nothing was reserved first.
    pub fn stage(&self, tile: Tile) -> Result<()> {
        stage_into(&self.state, tile)
    }

    /// Publish the oldest reserved slot, making it readable.
    ///
    /// # Errors
    ///
    /// `NothingStaged` if the oldest reserved slot has no payload (or no
    /// slot was reserved) — committing an unwritten slot is the ordering
    /// bug this guards against.
    pub fn commit_write(&self) -> Result<()> {
        let state = &self.state;
        let mut slots = state.slots.lock().expect("channel mutex poisoned");
        let staged = matches!(slots.reserved.front(), Some(Some(_)));
        if !staged {
            return Err(ExchangeError::NothingStaged {
                unit: state.owner,
                channel: state.name,
            });
        }
        let tile = slots.reserved.pop_front().flatten().expect("staged slot");
        slots.ready.push_back(tile);
        drop(slots);
        state.cond.notify_all();
        Ok(())
    }

    /// Block until at least one committed tile is readable.
    ///
    /// # Errors
    ///
    /// `ChannelTimeout` if nothing is committed within the configured wait.
    pub fn wait_nonempty(&self) -> Result<()> {
        let state = &self.state;
        let deadline = Instant::now() + state.wait_timeout;
        let mut slots = state.slots.lock().expect("channel mutex poisoned");
        while slots.ready.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return Err(ExchangeError::ChannelTimeout {
                    unit: state.owner,
                    channel: state.name,
                    op: "wait_nonempty",
                    timeout_ms: u64::try_from(state.wait_timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            let (next, _) = state
                .cond
                .wait_timeout(slots, deadline - now)
                .expect("channel mutex poisoned");
            slots = next;
        }
        Ok(())
    }

    /// Pop the oldest committed tile, blocking while none is readable.
    ///
    /// # Errors
    ///
    /// `ChannelTimeout` if nothing is committed within the configured wait.
    pub fn pop_read(&self) -> Result<Tile> {
        self.wait_nonempty()?;
        let mut slots = self.state.slots.lock().expect("channel mutex poisoned");
        let tile = slots.ready.pop_front().expect("nonempty after wait");
        drop(slots);
        self.state.cond.notify_all();
        Ok(tile)
    }
}

impl ChannelPort {
    /// Stage a payload into the oldest reserved slot of the owner's
    /// channel. The owner commits it after the delivery signal.
    ///
    /// # Errors
    ///
    /// Same as [`TileChannel::stage`].
    pub fn deposit(&self, tile: Tile) -> Result<()> {
        stage_into(&self.state, tile)
    }

    /// Owning unit, for transfer diagnostics.
    #[must_use]
    pub fn owner(&self) -> UnitId {
        self.state.owner
    }
}

fn stage_into(state: &ChannelState, tile: Tile) -> Result<()> {
    if tile.len() != state.block_size {
        return Err(ExchangeError::TileSizeMismatch {
            expected: state.block_size,
            actual: tile.len(),
            context: format!("stage into '{}' of unit {}", state.name, state.owner),
        });
    }
    let mut slots = state.slots.lock().expect("channel mutex poisoned");
    match slots.reserved.iter_mut().find(|slot| slot.is_none()) {
        Some(slot) => {
            *slot = Some(tile);
            Ok(())
        }
        None => Err(ExchangeError::NoReservedSlot {
            unit: state.owner,
            channel: state.name,
        }),
    }
}

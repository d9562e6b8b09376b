//! Grid broadcast-exchange engine.
//!
//! N independent worker units, each holding one fixed-size tile in its
//! private scratch channels, exchange tiles over a deposit-based
//! interconnect so that every unit finishes with a copy of every tile —
//! an all-gather built from nothing but point-to-point/one-to-many
//! writes and counting signals. No shared clock, no central
//! coordinator thread, no barrier primitive.
//!
//! # Protocol shape
//!
//! ```text
//! per unit w of N (concurrently):
//!   stage own tile
//!   for i in 0..w:        declare ready to i, wait delivery, drain inbox
//!   round w:              wait N-1 ready, multicast, FENCE, set delivery
//!   for i in w+1..N:      declare ready to i, wait delivery, drain inbox
//!   emit N tiles in id order
//! ```
//!
//! The single load-bearing invariant: a sender multicasts, *fences the
//! payload writes*, and only then sets the receivers' delivery signals.
//!
//! # Quick start
//!
//! ```
//! use tilecast_core::{ExchangeConfig, GridCoordinator, Tile};
//! use tilecast_grid::GridTopology;
//!
//! # fn main() -> tilecast_core::Result<()> {
//! let config = ExchangeConfig::new(GridTopology::new(2, 2), 4096);
//! let coordinator = GridCoordinator::new(config)?;
//!
//! let tiles: Vec<Tile> = (0..4).map(|i| Tile::splat_f32(i as f32, 1024)).collect();
//! let gathered = coordinator.run_exchange(tiles)?;
//!
//! // Every unit now holds all four tiles, in id order.
//! assert!(gathered.iter().all(|set| set.len() == 4));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod broadcast;
mod channel;
mod coordinator;
mod error;
mod exchange;
mod interconnect;
mod signal;
mod tile;

pub use channel::{ChannelPort, TileChannel};
pub use coordinator::GridCoordinator;
pub use error::{ExchangeError, Result, StallReport};
pub use exchange::{ExchangeConfig, ExchangeUnit, DEFAULT_WAIT_TIMEOUT};
pub use interconnect::{ChannelId, Interconnect, NocPort, SignalId, UnitEndpoint};
pub use signal::{Signal, SignalHandle, WaitTimeout};
pub use tile::Tile;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        ExchangeConfig, ExchangeError, ExchangeUnit, GridCoordinator, Result, Tile,
    };
    pub use tilecast_grid::{CoreCoord, CoreRange, GridTopology, UnitId};
}

//! Error types for exchange operations

use thiserror::Error;
use tilecast_grid::UnitId;

/// Result type alias for exchange operations
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// One unit that failed to make progress during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StallReport {
    /// The unit that did not complete.
    pub unit: UnitId,
    /// The peer it was waiting on, when the wait names one.
    pub waiting_on: Option<UnitId>,
}

impl std::fmt::Display for StallReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.waiting_on {
            Some(peer) => write!(f, "unit {} waiting on {}", self.unit, peer),
            None => write!(f, "unit {} stalled at a local wait", self.unit),
        }
    }
}

/// Errors that can occur during grid exchange operations
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Grid holds no units
    #[error("grid {x}x{y} holds no units")]
    EmptyGrid {
        /// X dimension
        x: u32,
        /// Y dimension
        y: u32,
    },

    /// Tile count does not match the unit count
    #[error("tile count mismatch: got {actual} tiles for {expected} units")]
    TileCountMismatch {
        /// Units in the grid
        expected: usize,
        /// Tiles supplied
        actual: usize,
    },

    /// Endpoint table does not cover the grid
    #[error("endpoint count mismatch: got {actual} endpoints for {expected} units")]
    EndpointCountMismatch {
        /// Units in the grid
        expected: usize,
        /// Endpoints supplied
        actual: usize,
    },

    /// Tile size does not match the configured block size
    #[error("tile size mismatch ({context}): got {actual} bytes, expected {expected}")]
    TileSizeMismatch {
        /// Configured block size in bytes
        expected: usize,
        /// Offending tile size in bytes
        actual: usize,
        /// Where the mismatch was detected
        context: String,
    },

    /// Declared multicast destination count disagrees with the rectangle
    #[error(
        "multicast destination count mismatch: declared {declared}, rectangle addresses {actual}"
    )]
    DestCountMismatch {
        /// Count the issuer declared
        declared: u32,
        /// Destinations the rectangle actually holds (issuer excluded)
        actual: u32,
    },

    /// A transfer or signal write addressed a unit outside the grid
    #[error("unit {unit} is outside the {x}x{y} grid")]
    UnknownUnit {
        /// Offending unit id
        unit: UnitId,
        /// X dimension
        x: u32,
        /// Y dimension
        y: u32,
    },

    /// A multicast rectangle reaches coordinates outside the grid
    #[error("rectangle corner ({cx},{cy}) is outside the {x}x{y} grid")]
    RangeOutsideGrid {
        /// Offending coordinate x
        cx: u32,
        /// Offending coordinate y
        cy: u32,
        /// X dimension
        x: u32,
        /// Y dimension
        y: u32,
    },

    /// A deposit arrived at a channel with no reserved slot to land in
    #[error("deposit into '{channel}' of unit {unit} found no reserved slot")]
    NoReservedSlot {
        /// Destination unit
        unit: UnitId,
        /// Destination channel name
        channel: &'static str,
    },

    /// A commit found no staged payload in the oldest reserved slot
    #[error("commit on '{channel}' of unit {unit} found no staged payload")]
    NothingStaged {
        /// Owning unit
        unit: UnitId,
        /// Channel name
        channel: &'static str,
    },

    /// A channel operation exceeded its wait deadline
    #[error("unit {unit}: channel '{channel}' {op} timed out after {timeout_ms}ms")]
    ChannelTimeout {
        /// Owning unit
        unit: UnitId,
        /// Channel name
        channel: &'static str,
        /// Operation that timed out
        op: &'static str,
        /// Deadline in milliseconds
        timeout_ms: u64,
    },

    /// A receive wait expired: the peer never delivered its broadcast
    #[error("unit {unit}: peer {waiting_on} never delivered (waited {timeout_ms}ms)")]
    PeerUnresponsive {
        /// The waiting unit
        unit: UnitId,
        /// The peer whose broadcast never landed
        waiting_on: UnitId,
        /// Deadline in milliseconds
        timeout_ms: u64,
    },

    /// The sender barrier expired before every peer declared readiness
    #[error("unit {unit}: readiness barrier stuck at {observed}/{expected}")]
    ReadinessStall {
        /// The broadcasting unit
        unit: UnitId,
        /// Readiness count observed at the deadline
        observed: u32,
        /// Count required to broadcast
        expected: u32,
    },

    /// Aggregate progress failure: one or more units never completed
    #[error("exchange stalled: {} unit(s) did not complete", reports.len())]
    Stalled {
        /// Per-unit stall reports, in unit-id order
        reports: Vec<StallReport>,
    },
}

impl ExchangeError {
    /// Whether this is a progress failure (a stall), as opposed to a
    /// configuration or ordering error.
    #[must_use]
    pub const fn is_stall(&self) -> bool {
        matches!(
            self,
            Self::PeerUnresponsive { .. }
                | Self::ReadinessStall { .. }
                | Self::ChannelTimeout { .. }
                | Self::Stalled { .. }
        )
    }

    /// Stall report for this error, when it is a per-unit progress failure.
    #[must_use]
    pub const fn stall_report(&self) -> Option<StallReport> {
        match *self {
            Self::PeerUnresponsive {
                unit, waiting_on, ..
            } => Some(StallReport {
                unit,
                waiting_on: Some(waiting_on),
            }),
            Self::ReadinessStall { unit, .. } | Self::ChannelTimeout { unit, .. } => {
                Some(StallReport {
                    unit,
                    waiting_on: None,
                })
            }
            _ => None,
        }
    }
}

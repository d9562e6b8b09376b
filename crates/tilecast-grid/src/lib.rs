//! Pure model of the tilecast worker grid.
//!
//! This crate has **no dependencies** and **no runtime behavior** — it is a
//! model of the grid the exchange engine runs on: rectangular topology,
//! unit identities, the id ↔ coordinate mapping, and inclusive coordinate
//! rectangles used to address multicast destinations.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`topology`] | [`GridTopology`] — grid shape, unit count, id ↔ coordinate mapping |
//! | [`range`] | [`CoreCoord`], [`CoreRange`] — inclusive rectangles with iteration |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod range;
pub mod topology;

pub use range::{CoreCoord, CoreRange};
pub use topology::{GridTopology, UnitId};

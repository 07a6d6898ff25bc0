//! Shadow memory: bounded per-location access history.
//!
//! Monitored memory is split into aligned [`UNIT_SIZE`]-byte units. Each unit
//! that has been touched owns a [`ShadowCell`] holding the last
//! [`SHADOW_CELLS`] accesses to it. Older accesses are forgotten, which bounds
//! memory at the cost of missing races against evicted accesses.
//!
//! The store only answers "which remembered access conflicts with this one";
//! deciding whether the conflict is a race is the detector's job.

mod cell;
mod entry;
mod store;

pub use cell::ShadowCell;
pub use entry::{Access, AccessKind, ShadowEntry, StackId};
pub use store::{ShadowStore, UnitRange, units};

/// Bytes covered by one shadow cell.
pub const UNIT_SIZE: u64 = 8;

/// Accesses remembered per unit.
pub const SHADOW_CELLS: usize = 4;

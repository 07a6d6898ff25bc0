//! Logical clocks for happens-before tracking.
//!
//! Every monitored thread owns a [`Slot`] in the vector clock. A thread's own
//! component is bumped on synchronization, and clocks flow between threads
//! through release/acquire pairs and thread create/join.
//!
//! ```
//! use rsan_clock::{ClockOrder, Slot, VectorClock};
//!
//! let mut a = VectorClock::new();
//! a.tick(Slot::new(0));
//! let mut b = VectorClock::new();
//! b.tick(Slot::new(1));
//!
//! // Neither knows the other's event.
//! assert_eq!(a.compare(&b), ClockOrder::Concurrent);
//!
//! // After b acquires a's clock, a happens-before b.
//! b.join(&a);
//! assert_eq!(a.compare(&b), ClockOrder::Less);
//! ```

mod clock;
mod ids;

pub use clock::{ClockOrder, VectorClock};
pub use ids::{Epoch, Slot, Tid, era_of, era_start};

//! Events published by instances, records and the host.
//!
//! [`Event`] / [`EventKind`] are the payload; [`Bus`] carries them. Instance
//! events exist only for evented tasks, counter and host events always.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};

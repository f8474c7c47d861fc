//! Host environment of tasks.
//!
//! ## Contents
//! - [`Host`] owner of tasks: event bus, run loop, teardown
//! - [`HostBuilder`] host with subscribers
//! - [`RunLoop`] named cooperative queues
//! - [`CancelationToken`] / [`CancelationSource`] cooperative stop signals

mod builder;
pub(crate) mod core;
mod runloop;
mod token;

pub use self::core::Host;
pub use builder::HostBuilder;
pub use runloop::RunLoop;
pub use token::{CancelationSource, CancelationToken};

//! Consumers of host events.
//!
//! The host listener drains its bus into a [`SubscriberSet`], which hands each
//! event to every interested [`Subscribe`] implementation on its own lane.
//! [`LogWriter`] (feature `logging`) is a ready-made stdout subscriber.

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;

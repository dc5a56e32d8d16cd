//! In-process job lifecycle events.
//!
//! - [`EventBus`]: publish/subscribe hub backed by `tokio::sync::broadcast`.
//! - [`JobEvent`]: the event envelope published on every job transition.

pub mod bus;

pub use bus::{event_types, EventBus, JobEvent};

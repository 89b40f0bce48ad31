//! Event system for request observability
//!
//! The engine publishes a [`RoutingEvent`] at every step of a request.
//! Subscribers (the stats collector, a log shipper, a dashboard) attach
//! through the [`EventBus`]; the request path never waits on them.

pub mod bus;
pub mod stats;
pub mod types;

pub use bus::{EventBus, SharedEventBus};
pub use stats::{RoutingStats, StatsSnapshot};
pub use types::{preview, RoutingEvent};

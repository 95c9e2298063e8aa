//! # Jarvis Bus
//!
//! Publish/subscribe event bus with priority tiers and wildcard routing.
//!
//! Handlers matching a published channel are grouped by priority. Every
//! handler in a tier runs concurrently and the bus waits for the tier to
//! settle before starting the next one. A failing or panicking handler is
//! logged and never affects its siblings or the publisher.

mod bus;
mod error;
mod handler;
mod pattern;
mod types;

pub use bus::{EventBus, SubscriptionHandle};
pub use error::BusError;
pub use handler::{handler_fn, sync_handler, EventHandler};
pub use pattern::ChannelPattern;
pub use types::{BusStats, PublishOptions, SubscribeOptions};

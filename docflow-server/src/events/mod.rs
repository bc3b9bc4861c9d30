//! Event bus, broker bridge, and SSE streaming fan-out.

pub mod bridge;
pub mod bus;
pub mod stream;

pub use bridge::BrokerBridge;
pub use bus::{matches_type_filter, EventBus, EventBusConfig, EventHandler};

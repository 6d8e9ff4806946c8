//! NATS JetStream adapter for the Offloadq broker port.

mod broker;

pub use broker::{NatsBroker, NatsConfig};

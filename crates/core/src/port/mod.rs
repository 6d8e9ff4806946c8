// Port Layer - Interfaces for external dependencies

pub mod broker;
pub mod dispatcher;
pub mod id_provider; // For deterministic testing
pub mod time_provider;

// Re-exports
pub use broker::{Acker, Broker, BrokerError, Delivery, DeliveryStream, QueueStats};
pub use dispatcher::{DispatchError, OperationDispatcher};
pub use id_provider::IdProvider;
pub use time_provider::TimeProvider;

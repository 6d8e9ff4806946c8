//! Offloadq core: domain model, ports and application logic for the
//! provider-operation offload engine.
//!
//! Long-running provider operations are submitted as jobs to a durable
//! message broker and consumed by a fleet of independent workers. This
//! crate holds everything broker-agnostic: wire envelopes and queue
//! topology (`domain`), the contracts to the broker and the operation
//! dispatcher (`port`), and the queue/worker/facade logic (`application`).

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{AppError, Result};

//! JSON-RPC Introspection Layer
//!
//! Read-only operational endpoints exposed by a worker process: liveness,
//! worker counters and per-queue statistics. No mutating methods.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use server::{RpcServer, RpcServerConfig};

// Application Layer - queue, worker and facade logic over the ports

pub mod classify;
pub mod offload;
pub mod queue;
pub mod registry;
pub mod results;
pub mod retry;
pub mod worker;

pub use classify::{classify, is_retryable, ErrorClass};
pub use offload::{OffloadDispatcher, OffloadResponse};
pub use queue::{JobQueue, QueueTopologyStats};
pub use registry::{RegistryStatus, WorkerRegistry};
pub use results::ResultStore;
pub use retry::{RetryDecision, RetryPolicy};
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker, WorkerConfig, WorkerStatus};

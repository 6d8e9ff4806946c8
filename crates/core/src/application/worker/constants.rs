// Worker constants (no magic values at call sites)

use std::time::Duration;

/// Default attempt ceiling before a retryable failure dead-letters.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default pause between retry attempts (fixed, not exponential).
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default bound on in-flight dispatches per worker.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 1;

/// Default wait budget for blocking result retrieval.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30);

/// Sleep after a consume-loop error before resubscribing.
pub const ERROR_RECOVERY_SLEEP: Duration = Duration::from_secs(1);

/// Drain budget when stopping a worker with jobs still in flight.
pub const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

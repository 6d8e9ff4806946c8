// In-process result store fed by the responses-queue listener

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

use crate::domain::{JobId, ResultEnvelope};
use crate::port::TimeProvider;

/// How long a delivered result stays claimable before eviction.
///
/// Policy value, not an invariant: callers are expected to poll well within
/// this window. Eviction piggybacks on inserts and lookups, so the store
/// stays bounded without a background sweeper.
pub const RESULT_RETENTION_MS: i64 = 15 * 60 * 1000;

/// Re-check interval while waiting for a result to arrive.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

struct StoredResult {
    envelope: ResultEnvelope,
    stored_at: i64,
}

/// Keyed store mapping `job_id` to its terminal result envelope.
///
/// Results are claimed (removed) by the first caller that fetches them.
pub struct ResultStore {
    entries: Mutex<HashMap<JobId, StoredResult>>,
    notify: Notify,
    time_provider: Arc<dyn TimeProvider>,
    retention_ms: i64,
}

impl ResultStore {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self::with_retention(time_provider, RESULT_RETENTION_MS)
    }

    pub fn with_retention(time_provider: Arc<dyn TimeProvider>, retention_ms: i64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            time_provider,
            retention_ms,
        }
    }

    pub fn insert(&self, envelope: ResultEnvelope) {
        let now = self.time_provider.now_millis();
        {
            let mut entries = self.entries.lock().expect("result store poisoned");
            entries.retain(|_, stored| now - stored.stored_at < self.retention_ms);
            entries.insert(
                envelope.job_id.clone(),
                StoredResult {
                    envelope,
                    stored_at: now,
                },
            );
        }
        self.notify.notify_waiters();
    }

    /// Claim the result for `job_id`, if present and not expired.
    pub fn take(&self, job_id: &str) -> Option<ResultEnvelope> {
        let now = self.time_provider.now_millis();
        let mut entries = self.entries.lock().expect("result store poisoned");
        entries.retain(|_, stored| now - stored.stored_at < self.retention_ms);
        entries.remove(job_id).map(|stored| stored.envelope)
    }

    /// Wait up to `timeout` for the result of `job_id`. A zero timeout
    /// checks once without suspending.
    pub async fn wait_for(&self, job_id: &str, timeout: Duration) -> Option<ResultEnvelope> {
        if let Some(envelope) = self.take(job_id) {
            return Some(envelope);
        }
        if timeout.is_zero() {
            return None;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                debug!(job_id = %job_id, "Result wait timed out");
                return None;
            }
            let slice = (deadline - now).min(WAIT_POLL_INTERVAL);
            let _ = tokio::time::timeout(slice, self.notify.notified()).await;
            if let Some(envelope) = self.take(job_id) {
                return Some(envelope);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("result store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::time_provider::MockTimeProvider;
    use serde_json::json;

    fn store_with_clock(retention_ms: i64) -> (Arc<MockTimeProvider>, ResultStore) {
        let clock = Arc::new(MockTimeProvider::new(1_000));
        let store = ResultStore::with_retention(clock.clone(), retention_ms);
        (clock, store)
    }

    #[tokio::test]
    async fn take_claims_the_result_once() {
        let (_, store) = store_with_clock(RESULT_RETENTION_MS);
        store.insert(ResultEnvelope::completed("j-1", json!({"ok": true}), 1_000));

        let first = store.take("j-1").unwrap();
        assert_eq!(first.job_id, "j-1");
        assert!(store.take("j-1").is_none());
    }

    #[tokio::test]
    async fn zero_timeout_does_not_block() {
        let (_, store) = store_with_clock(RESULT_RETENTION_MS);
        let started = std::time::Instant::now();
        assert!(store.wait_for("missing", Duration::ZERO).await.is_none());
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn wait_resolves_when_result_arrives() {
        let clock = Arc::new(MockTimeProvider::new(1_000));
        let store = Arc::new(ResultStore::new(clock));

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.wait_for("j-2", Duration::from_secs(2)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        store.insert(ResultEnvelope::failed("j-2", "boom", 1_050));

        let envelope = waiter.await.unwrap().unwrap();
        assert_eq!(envelope.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn expired_results_are_evicted() {
        let (clock, store) = store_with_clock(1_000);
        store.insert(ResultEnvelope::completed("j-3", json!(1), 1_000));

        clock.advance(999);
        assert_eq!(store.len(), 1);

        clock.advance(2);
        assert!(store.take("j-3").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn insert_evicts_expired_entries() {
        let (clock, store) = store_with_clock(1_000);
        store.insert(ResultEnvelope::completed("old", json!(1), 1_000));
        clock.advance(2_000);
        store.insert(ResultEnvelope::completed("new", json!(2), 3_000));
        assert_eq!(store.len(), 1);
        assert!(store.take("new").is_some());
    }
}

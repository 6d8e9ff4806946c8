// ID Provider Port (for deterministic testing)

/// Job ID generator (allows deterministic IDs in tests)
pub trait IdProvider: Send + Sync {
    /// Generate a new unique job ID
    fn generate_id(&self) -> String;
}

/// UUID v4 provider (production)
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Sequential provider for tests (`job-1`, `job-2`, ...)
pub struct SequenceIdProvider {
    counter: std::sync::atomic::AtomicU64,
}

impl SequenceIdProvider {
    pub fn new() -> Self {
        Self {
            counter: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

impl Default for SequenceIdProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdProvider for SequenceIdProvider {
    fn generate_id(&self) -> String {
        let n = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        format!("job-{}", n + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_are_unique() {
        let provider = UuidProvider;
        let a = provider.generate_id();
        let b = provider.generate_id();
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }

    #[test]
    fn sequence_ids_are_stable() {
        let provider = SequenceIdProvider::new();
        assert_eq!(provider.generate_id(), "job-1");
        assert_eq!(provider.generate_id(), "job-2");
    }
}

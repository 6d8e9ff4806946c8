// Queue topology derived from provider namespaces

use crate::domain::error::{DomainError, Result};

/// Leading segment shared by every derived queue name.
const QUEUE_ROOT: &str = "provider";

const REQUESTS_SUFFIX: &str = "requests";
const RESPONSES_SUFFIX: &str = "responses";
const DLQ_SUFFIX: &str = "dlq";

/// The three queue names owned by one provider namespace.
///
/// Derivation is deterministic: the namespace is lower-cased and its leading
/// organizational segment is stripped, so `ITL.Compute` maps to the prefix
/// `provider.compute`. One broker can then host many providers without
/// naming collisions, and an operator can inspect or purge one provider's
/// queues in isolation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueRoutes {
    prefix: String,
}

impl QueueRoutes {
    pub fn for_namespace(namespace: &str) -> Result<Self> {
        let trimmed = namespace.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidNamespace(namespace.to_string()));
        }

        let local = match trimmed.split_once('.') {
            Some((_org, rest)) if !rest.is_empty() => rest,
            Some(_) => return Err(DomainError::InvalidNamespace(namespace.to_string())),
            None => trimmed,
        };

        Ok(Self {
            prefix: format!("{}.{}", QUEUE_ROOT, local.to_lowercase()),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn requests(&self) -> String {
        format!("{}.{}", self.prefix, REQUESTS_SUFFIX)
    }

    pub fn responses(&self) -> String {
        format!("{}.{}", self.prefix, RESPONSES_SUFFIX)
    }

    pub fn dlq(&self) -> String {
        format!("{}.{}", self.prefix, DLQ_SUFFIX)
    }

    /// All queue names of this prefix, requests first.
    pub fn all(&self) -> [String; 3] {
        [self.requests(), self.responses(), self.dlq()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_organizational_prefix_and_lowercases() {
        let routes = QueueRoutes::for_namespace("ITL.Compute").unwrap();
        assert_eq!(routes.prefix(), "provider.compute");
        assert_eq!(routes.requests(), "provider.compute.requests");
        assert_eq!(routes.responses(), "provider.compute.responses");
        assert_eq!(routes.dlq(), "provider.compute.dlq");
    }

    #[test]
    fn keeps_nested_segments() {
        let routes = QueueRoutes::for_namespace("ITL.Compute.Disks").unwrap();
        assert_eq!(routes.prefix(), "provider.compute.disks");
    }

    #[test]
    fn namespace_without_org_prefix_is_used_whole() {
        let routes = QueueRoutes::for_namespace("Core").unwrap();
        assert_eq!(routes.prefix(), "provider.core");
    }

    #[test]
    fn derivation_is_deterministic_across_providers() {
        let a = QueueRoutes::for_namespace("ITL.Core").unwrap();
        let b = QueueRoutes::for_namespace("itl.core").unwrap();
        let c = QueueRoutes::for_namespace("ITL.Network").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn rejects_empty_and_dangling_namespaces() {
        assert!(QueueRoutes::for_namespace("").is_err());
        assert!(QueueRoutes::for_namespace("   ").is_err());
        assert!(QueueRoutes::for_namespace("ITL.").is_err());
    }
}

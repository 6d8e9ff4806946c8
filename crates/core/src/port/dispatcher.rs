// Operation Dispatcher Port
//
// The external collaborator that performs the actual provider operation.
// At-least-once delivery means the dispatcher may see the same job twice;
// idempotency per job is the dispatcher's responsibility, not ours.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Operation;

/// Failure raised by a dispatch call. The string representation is what
/// the worker's failure classifier inspects.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct DispatchError {
    message: String,
}

impl DispatchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Executes one provider operation.
#[async_trait]
pub trait OperationDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        provider_namespace: &str,
        resource_type: &str,
        operation: Operation,
        request: &serde_json::Value,
    ) -> Result<serde_json::Value, DispatchError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Mock dispatcher behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Echo the request back as the result
        Success,
        /// Always fail with message
        Fail(String),
        /// Fail the first `failures` calls with message, then succeed
        FailTimes { failures: usize, error: String },
        /// Panic with message (for panic isolation testing)
        Panic(String),
    }

    /// Scriptable dispatcher for tests
    pub struct MockDispatcher {
        behavior: Arc<Mutex<MockBehavior>>,
        call_count: Arc<Mutex<usize>>,
    }

    impl MockDispatcher {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Arc::new(Mutex::new(behavior)),
                call_count: Arc::new(Mutex::new(0)),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }

        pub fn new_fail_times(failures: usize, message: impl Into<String>) -> Self {
            Self::new(MockBehavior::FailTimes {
                failures,
                error: message.into(),
            })
        }

        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }

        pub fn call_count(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl OperationDispatcher for MockDispatcher {
        async fn dispatch(
            &self,
            _provider_namespace: &str,
            _resource_type: &str,
            _operation: Operation,
            request: &serde_json::Value,
        ) -> Result<serde_json::Value, DispatchError> {
            let call_no = {
                let mut count = self.call_count.lock().unwrap();
                *count += 1;
                *count
            };

            let behavior = self.behavior.lock().unwrap().clone();
            match behavior {
                MockBehavior::Success => Ok(request.clone()),
                MockBehavior::Fail(message) => Err(DispatchError::new(message)),
                MockBehavior::FailTimes { failures, error } => {
                    if call_no <= failures {
                        Err(DispatchError::new(error))
                    } else {
                        Ok(request.clone())
                    }
                }
                MockBehavior::Panic(message) => {
                    panic!("{}", message);
                }
            }
        }
    }
}

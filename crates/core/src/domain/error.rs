// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid priority: {0} (expected 0-10)")]
    InvalidPriority(i32),

    #[error("Invalid provider namespace: {0:?}")]
    InvalidNamespace(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;

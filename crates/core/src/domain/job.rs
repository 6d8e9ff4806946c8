// Job and result wire envelopes

use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;

/// Job ID (UUID v4, assigned at submission)
pub type JobId = String;

/// Provider operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Get,
    List,
    Delete,
    Action,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Get => write!(f, "get"),
            Operation::List => write!(f, "list"),
            Operation::Delete => write!(f, "delete"),
            Operation::Action => write!(f, "action"),
        }
    }
}

/// Advisory scheduling priority, 0-10, higher is scheduled sooner.
///
/// A hint to the broker, never an ordering guarantee.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(0);
    pub const MAX: Priority = Priority(10);

    pub fn new(value: u8) -> Result<Self, DomainError> {
        if value > Self::MAX.0 {
            return Err(DomainError::InvalidPriority(i32::from(value)));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(5)
    }
}

impl TryFrom<u8> for Priority {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

/// Job request envelope, published to `{prefix}.requests`.
///
/// Read-only after creation; a retry produces a fresh envelope via
/// [`Job::next_attempt`] rather than mutating the original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub provider_namespace: String,
    pub resource_type: String,
    pub operation: Operation,
    pub request: serde_json::Value,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

fn first_attempt() -> u32 {
    1
}

impl Job {
    pub fn new(
        job_id: impl Into<JobId>,
        provider_namespace: impl Into<String>,
        resource_type: impl Into<String>,
        operation: Operation,
        request: serde_json::Value,
        priority: Priority,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            provider_namespace: provider_namespace.into(),
            resource_type: resource_type.into(),
            operation,
            request,
            priority,
            attempt: 1,
        }
    }

    /// Envelope for the next delivery attempt of this job.
    pub fn next_attempt(&self) -> Self {
        let mut retry = self.clone();
        retry.attempt += 1;
        retry
    }
}

/// Processing status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal outcome of a job, exhaustively checkable.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Success(serde_json::Value),
    Failure(String),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success(_))
    }
}

/// Result envelope, published to `{prefix}.responses`.
///
/// `result` is present iff completed, `error` iff failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
}

impl ResultEnvelope {
    pub fn completed(job_id: impl Into<JobId>, result: serde_json::Value, now_millis: i64) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Completed,
            result: Some(result),
            error: None,
            timestamp: now_millis,
        }
    }

    pub fn failed(job_id: impl Into<JobId>, error: impl Into<String>, now_millis: i64) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Failed,
            result: None,
            error: Some(error.into()),
            timestamp: now_millis,
        }
    }

    pub fn from_outcome(job_id: impl Into<JobId>, outcome: &JobOutcome, now_millis: i64) -> Self {
        match outcome {
            JobOutcome::Success(value) => Self::completed(job_id, value.clone(), now_millis),
            JobOutcome::Failure(message) => Self::failed(job_id, message.clone(), now_millis),
        }
    }

    /// The terminal outcome carried by this envelope, or `None` for a
    /// non-terminal status.
    pub fn outcome(&self) -> Option<JobOutcome> {
        match self.status {
            JobStatus::Completed => Some(JobOutcome::Success(
                self.result.clone().unwrap_or(serde_json::Value::Null),
            )),
            JobStatus::Failed | JobStatus::Cancelled => Some(JobOutcome::Failure(
                self.error
                    .clone()
                    .unwrap_or_else(|| format!("job {}", self.status)),
            )),
            JobStatus::Pending | JobStatus::Processing => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn priority_bounds() {
        assert!(Priority::new(0).is_ok());
        assert!(Priority::new(10).is_ok());
        assert!(matches!(
            Priority::new(11),
            Err(DomainError::InvalidPriority(11))
        ));
        assert_eq!(Priority::default().value(), 5);
    }

    #[test]
    fn job_envelope_wire_shape() {
        let job = Job::new(
            "8e7f2f7c-0000-4000-8000-000000000001",
            "ITL.Compute",
            "virtualmachines",
            Operation::Create,
            json!({"name": "vm-1"}),
            Priority::default(),
        );

        let wire = serde_json::to_value(&job).unwrap();
        assert_eq!(wire["operation"], "create");
        assert_eq!(wire["priority"], 5);
        assert_eq!(wire["attempt"], 1);
        assert_eq!(wire["provider_namespace"], "ITL.Compute");

        let decoded: Job = serde_json::from_value(wire).unwrap();
        assert_eq!(decoded.job_id, job.job_id);
        assert_eq!(decoded.operation, Operation::Create);
    }

    #[test]
    fn envelope_defaults_attempt_and_priority() {
        let decoded: Job = serde_json::from_value(json!({
            "job_id": "j-1",
            "provider_namespace": "ITL.Core",
            "resource_type": "resourcegroups",
            "operation": "delete",
            "request": {}
        }))
        .unwrap();
        assert_eq!(decoded.attempt, 1);
        assert_eq!(decoded.priority.value(), 5);
    }

    #[test]
    fn out_of_range_wire_priority_is_rejected() {
        let result = serde_json::from_value::<Job>(json!({
            "job_id": "j-2",
            "provider_namespace": "ITL.Core",
            "resource_type": "resourcegroups",
            "operation": "get",
            "request": {},
            "priority": 42
        }));
        assert!(result.is_err());
    }

    #[test]
    fn next_attempt_increments_only_attempt() {
        let job = Job::new("j-3", "ITL.Core", "rg", Operation::Action, json!({}), Priority::MAX);
        let retry = job.next_attempt();
        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.job_id, job.job_id);
        assert_eq!(retry.priority, Priority::MAX);
        assert_eq!(job.attempt, 1);
    }

    #[test]
    fn result_envelope_field_presence() {
        let ok = ResultEnvelope::completed("j-4", json!({"id": "rg-1"}), 1_000);
        let wire = serde_json::to_value(&ok).unwrap();
        assert_eq!(wire["status"], "completed");
        assert!(wire.get("error").is_none());
        assert_eq!(wire["result"]["id"], "rg-1");

        let failed = ResultEnvelope::failed("j-5", "validation error: missing field", 2_000);
        let wire = serde_json::to_value(&failed).unwrap();
        assert_eq!(wire["status"], "failed");
        assert!(wire.get("result").is_none());
    }

    #[test]
    fn outcome_round_trips_terminal_states() {
        let ok = ResultEnvelope::completed("j-6", json!(7), 1);
        assert_eq!(ok.outcome(), Some(JobOutcome::Success(json!(7))));

        let failed = ResultEnvelope::failed("j-7", "boom", 1);
        assert_eq!(
            failed.outcome(),
            Some(JobOutcome::Failure("boom".to_string()))
        );

        let pending = ResultEnvelope {
            job_id: "j-8".into(),
            status: JobStatus::Pending,
            result: None,
            error: None,
            timestamp: 1,
        };
        assert_eq!(pending.outcome(), None);
    }
}

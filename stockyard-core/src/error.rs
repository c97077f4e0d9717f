use stockyard_model::{ModelError, TaskId, TaskKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("device unreachable: {0}")]
    DeviceUnreachable(String),

    #[error("device rejected `{command}`: {reason}")]
    CommandRejected { command: String, reason: String },

    #[error("timed out after {timeout_ms} ms waiting for new operation {marker}")]
    EventTimeout { marker: String, timeout_ms: u64 },

    #[error("arm not ready after {timeout_ms} ms")]
    ReadyTimeout { timeout_ms: u64 },

    #[error(
        "no fresh telemetry was received while running {kind}; the device did not execute it"
    )]
    NoFreshTelemetry { kind: TaskKind },

    #[error("invalid task type: {0}")]
    InvalidTaskType(String),

    #[error("task type {0} is disabled")]
    TaskKindRetired(TaskKind),

    #[error("no handler registered for {0}")]
    NoHandler(TaskKind),

    #[error("invalid task payload: {0}")]
    InvalidPayload(String),

    #[error("reorganization not possible: {0}")]
    ReorganizationInfeasible(String),

    #[error("task {0} is not pending")]
    NotPending(TaskId),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("engine misconfigured: {0}")]
    Misconfigured(String),
}

impl EngineError {
    /// Failures that point at the controller or its link rather than at the
    /// request or the stores.
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            EngineError::DeviceUnreachable(_)
                | EngineError::CommandRejected { .. }
                | EngineError::EventTimeout { .. }
                | EngineError::ReadyTimeout { .. }
                | EngineError::NoFreshTelemetry { .. }
        )
    }
}

impl From<ModelError> for EngineError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::InvalidTaskType(raw) => EngineError::InvalidTaskType(raw),
            other => EngineError::InvalidPayload(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

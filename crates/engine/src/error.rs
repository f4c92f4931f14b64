//! Engine-level error types.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use providers::ProviderError;

use crate::models::ErrorKind;

/// Errors surfaced to callers of the engine (validation, preconditions,
/// lookups, persistence).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Precondition / lookup errors ------

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("workflow {0} is not active")]
    WorkflowInactive(Uuid),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    // ------ Validation errors ------

    /// Two or more steps share the same ID.
    #[error("duplicate step ID: '{0}'")]
    DuplicateStepId(String),

    /// Two or more steps share the same `order`.
    #[error("duplicate step order: {0}")]
    DuplicateStepOrder(i64),

    /// A conditional step branches to a step that doesn't exist.
    #[error("step '{step_id}' branches to unknown step '{target}'")]
    UnknownBranchTarget { step_id: String, target: String },

    /// A conditional step branches to itself or an earlier step.
    #[error("step '{step_id}' branches backwards to '{target}'")]
    BackwardBranch { step_id: String, target: String },

    /// A definition or stored document doesn't match the expected shape.
    #[error("invalid workflow document: {0}")]
    InvalidDocument(#[from] serde_json::Error),

    // ------ Persistence ------

    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

impl EngineError {
    /// True for errors caused by the caller's input rather than the system.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateStepId(_)
                | Self::DuplicateStepOrder(_)
                | Self::UnknownBranchTarget { .. }
                | Self::BackwardBranch { .. }
                | Self::InvalidDocument(_)
        )
    }
}

/// A fatal step outcome. Returning one aborts the rest of the run.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("no recipient email specified")]
    NoRecipient,

    #[error("no {0} resolvable from step config or context")]
    MissingTarget(&'static str),

    #[error("{action} failed")]
    Provider {
        action: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("step timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl StepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingTarget(_) => ErrorKind::MissingTarget,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::NoRecipient | Self::Provider { .. } => ErrorKind::StepFailed,
        }
    }

    /// The error followed by its causes, outermost first.
    pub fn chain(&self) -> Vec<String> {
        let mut chain = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        chain
    }
}

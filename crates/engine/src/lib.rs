//! `engine` crate: domain models, condition evaluation, step dispatch, the
//! execution orchestrator and the workflow service built on top of it.

pub mod models;
pub mod error;
pub mod condition;
pub mod validate;
pub mod dispatcher;
pub mod executor;
pub mod service;

pub use models::{
    RunContext, StepAction, Trigger, TriggerKind, Workflow, WorkflowDefinition, WorkflowExecution,
    WorkflowPatch, WorkflowStep,
};
pub use error::{EngineError, StepError};
pub use condition::{evaluate, Condition};
pub use validate::validate_steps;
pub use executor::{ExecutorConfig, MissingTargetPolicy, WorkflowExecutor};
pub use service::WorkflowService;

#[cfg(test)]
mod executor_tests;

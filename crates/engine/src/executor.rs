//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Loads the workflow and checks it exists and is active. Nothing is
//!    written when this fails.
//! 2. Persists a `running` execution record.
//! 3. Dispatches steps strictly in ascending `order`, each under a deadline,
//!    honouring step guards and conditional jumps.
//! 4. Stops at the first fatal step error and captures it on the record.
//! 5. Finalises the record and atomically bumps the workflow's run counter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use db::{DbError, Store};
use providers::Providers;

use crate::condition::evaluate;
use crate::dispatcher::{StepDispatcher, StepOutcome};
use crate::error::{EngineError, StepError};
use crate::models::{
    ExecutionError, RunContext, StepStatus, TriggerKind, Workflow, WorkflowExecution,
    WorkflowExecutionStep, WorkflowStep,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when `award_points`, `create_notification` or `update_data`
/// cannot resolve who or what to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingTargetPolicy {
    /// Record the step as `skipped` and carry on.
    #[default]
    Skip,
    /// Treat it as a fatal step error.
    Fail,
}

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Deadline for a single step; exceeding it fails the run.
    pub step_timeout: Duration,
    /// Maximum number of times a transient webhook failure will be retried.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries.
    pub retry_base_delay: Duration,
    pub missing_target: MissingTargetPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            missing_target: MissingTargetPolicy::Skip,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Stateless orchestrator; one instance runs any number of concurrent
/// executions, each owning its own record.
pub struct WorkflowExecutor {
    store: Arc<dyn Store>,
    dispatcher: StepDispatcher,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    pub fn new(store: Arc<dyn Store>, providers: Providers, config: ExecutorConfig) -> Self {
        Self {
            store,
            dispatcher: StepDispatcher::new(providers, config.clone()),
            config,
        }
    }

    /// Run workflow `workflow_id` once and return the finalised record.
    ///
    /// # Errors
    /// - [`EngineError::WorkflowNotFound`] / [`EngineError::WorkflowInactive`]
    ///   before anything is persisted.
    /// - [`EngineError::Database`] if a write fails; the record may then be
    ///   left `running` in storage.
    ///
    /// A failing step is *not* an error here: it yields a `failed` record.
    #[instrument(skip(self, context), fields(%workflow_id, %triggered_by, execution_id = tracing::field::Empty))]
    pub async fn execute(
        &self,
        workflow_id: Uuid,
        context: RunContext,
        triggered_by: TriggerKind,
    ) -> Result<WorkflowExecution, EngineError> {
        // ------------------------------------------------------------------
        // Preconditions.
        // ------------------------------------------------------------------
        let workflow = match self.store.get_workflow(workflow_id).await {
            Ok(row) => Workflow::try_from(row)?,
            Err(DbError::NotFound) => return Err(EngineError::WorkflowNotFound(workflow_id)),
            Err(e) => return Err(e.into()),
        };
        if !workflow.active {
            return Err(EngineError::WorkflowInactive(workflow_id));
        }

        // ------------------------------------------------------------------
        // Create the execution record.
        // ------------------------------------------------------------------
        let clock = Instant::now();
        let mut execution =
            WorkflowExecution::start(&workflow, triggered_by, context.clone(), Utc::now());
        tracing::Span::current().record("execution_id", tracing::field::display(execution.id));
        self.store.insert_execution(&execution.to_row()?).await?;

        let steps = workflow.ordered_steps();
        info!(steps = steps.len(), workflow = %workflow.name, "execution started");

        // ------------------------------------------------------------------
        // Execute steps sequentially.
        // ------------------------------------------------------------------
        let mut ctx = context;
        let mut jump_to: Option<String> = None;

        for step in steps {
            let started_at = Utc::now();

            if let Some(target) = &jump_to {
                if *target != step.id {
                    execution
                        .executed_steps
                        .push(skipped_record(step, started_at, "branch not taken"));
                    continue;
                }
                jump_to = None;
            }

            if !evaluate(step.conditions.as_ref(), &ctx) {
                info!(step_id = %step.id, "guard condition false, skipping step");
                execution
                    .executed_steps
                    .push(skipped_record(step, started_at, "guard condition not met"));
                continue;
            }

            let step_clock = Instant::now();
            let result = self.dispatch_with_deadline(step, &mut ctx).await;
            let completed_at = Utc::now();
            let duration = elapsed_ms(step_clock);

            match result {
                Ok(outcome) => {
                    jump_to = outcome.jump_to.clone();
                    execution
                        .executed_steps
                        .push(outcome_record(step, outcome, started_at, completed_at, duration));
                }
                Err(err) => {
                    let chain = err.chain();
                    let message = chain.join(": ");
                    error!(step_id = %step.id, error = %message, "step failed, aborting run");

                    execution.executed_steps.push(WorkflowExecutionStep {
                        step_id: step.id.clone(),
                        step_type: step.step_type().to_owned(),
                        step_order: step.order,
                        status: StepStatus::Failed,
                        started_at,
                        completed_at: Some(completed_at),
                        duration: Some(duration),
                        error: Some(message.clone()),
                        output: None,
                    });
                    execution.error = Some(ExecutionError {
                        message,
                        step_id: step.id.clone(),
                        step_type: step.step_type().to_owned(),
                        kind: err.kind(),
                        stack: Some(chain.join("\n")),
                    });
                    break;
                }
            }
        }

        // ------------------------------------------------------------------
        // Finalise.
        // ------------------------------------------------------------------
        let completed_at = Utc::now();
        execution.finish(completed_at, elapsed_ms(clock));
        self.store.update_execution(&execution.to_row()?).await?;

        match self.store.record_workflow_run(workflow_id, completed_at).await {
            Ok(()) => {}
            // Deleted mid-run; the execution record stands on its own.
            Err(DbError::NotFound) => warn!("workflow deleted during execution, counter not updated"),
            Err(e) => return Err(e.into()),
        }

        info!(
            status = %execution.status,
            steps = execution.executed_steps.len(),
            duration_ms = execution.duration,
            "execution finished"
        );
        Ok(execution)
    }

    async fn dispatch_with_deadline(
        &self,
        step: &WorkflowStep,
        ctx: &mut RunContext,
    ) -> Result<StepOutcome, StepError> {
        let deadline = self.config.step_timeout;
        match tokio::time::timeout(deadline, self.dispatcher.execute(step, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(StepError::Timeout(deadline)),
        }
    }
}

fn elapsed_ms(since: Instant) -> i64 {
    i64::try_from(since.elapsed().as_millis()).unwrap_or(i64::MAX)
}

fn outcome_record(
    step: &WorkflowStep,
    outcome: StepOutcome,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    duration: i64,
) -> WorkflowExecutionStep {
    WorkflowExecutionStep {
        step_id: step.id.clone(),
        step_type: step.step_type().to_owned(),
        step_order: step.order,
        status: outcome.status,
        started_at,
        completed_at: Some(completed_at),
        duration: Some(duration),
        error: outcome.error,
        output: outcome.output,
    }
}

fn skipped_record(step: &WorkflowStep, at: DateTime<Utc>, reason: &str) -> WorkflowExecutionStep {
    outcome_record(step, StepOutcome::skipped(reason), at, at, 0)
}

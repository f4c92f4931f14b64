//! Step list validation: run this before persisting a workflow.
//!
//! Rules enforced:
//! 1. Step IDs must be unique within the workflow.
//! 2. Step `order` values must be unique (they define a total order).
//! 3. Every conditional branch target must name a step that runs strictly
//!    later, so a run always moves forward and terminates.
//!
//! Returns the step IDs in execution order on success.

use std::collections::{HashMap, HashSet};

use crate::{EngineError, models::{StepAction, WorkflowStep}};

/// Validate `steps` and return their IDs in ascending `order`.
///
/// # Errors
/// - [`EngineError::DuplicateStepId`] if two steps share an ID.
/// - [`EngineError::DuplicateStepOrder`] if two steps share an order.
/// - [`EngineError::UnknownBranchTarget`] if a branch names a missing step.
/// - [`EngineError::BackwardBranch`] if a branch does not point forward.
pub fn validate_steps(steps: &[WorkflowStep]) -> Result<Vec<String>, EngineError> {
    // -----------------------------------------------------------------------
    // 1 + 2. Unique IDs and orders
    // -----------------------------------------------------------------------
    let mut order_of: HashMap<&str, i64> = HashMap::with_capacity(steps.len());
    let mut seen_orders: HashSet<i64> = HashSet::with_capacity(steps.len());
    for step in steps {
        if order_of.insert(step.id.as_str(), step.order).is_some() {
            return Err(EngineError::DuplicateStepId(step.id.clone()));
        }
        if !seen_orders.insert(step.order) {
            return Err(EngineError::DuplicateStepOrder(step.order));
        }
    }

    // -----------------------------------------------------------------------
    // 3. Branch targets
    // -----------------------------------------------------------------------
    for step in steps {
        let StepAction::Conditional(cfg) = &step.action else {
            continue;
        };
        for target in [&cfg.on_true, &cfg.on_false].into_iter().flatten() {
            match order_of.get(target.as_str()) {
                None => {
                    return Err(EngineError::UnknownBranchTarget {
                        step_id: step.id.clone(),
                        target: target.clone(),
                    });
                }
                Some(&target_order) if target_order <= step.order => {
                    return Err(EngineError::BackwardBranch {
                        step_id: step.id.clone(),
                        target: target.clone(),
                    });
                }
                Some(_) => {}
            }
        }
    }

    let mut sorted: Vec<&WorkflowStep> = steps.iter().collect();
    sorted.sort_by_key(|s| s.order);
    Ok(sorted.into_iter().map(|s| s.id.clone()).collect())
}

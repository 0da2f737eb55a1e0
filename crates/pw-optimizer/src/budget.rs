//! Projected model-call budget for a run, computed before any trial.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::OptimizerConfig;

/// Prompt-model calls spent summarizing the dataset before proposing.
pub const DATA_SUMMARY_CALLS: usize = 10;

/// Upper bound on the call counts of one optimization run.
///
/// Escalations the driver skips because every recorded combo is already
/// promoted are still counted, so actual usage never exceeds the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetProjection {
    /// Calls to the model drafting variants.
    pub prompt_model_calls: usize,
    /// Example evaluations spent on the task model across all trials.
    pub task_model_calls: usize,
    /// Trials on the escalation cadence; each may trigger one full evaluation.
    pub escalations: usize,
    pub max_steps: usize,
    pub minibatch: bool,
}

/// Whether a minibatch run escalates on `trial`: `t % every == 0` or the last.
pub fn is_escalation_trial(trial: usize, max_steps: usize, every: usize) -> bool {
    trial % every.max(1) == 0 || trial + 1 == max_steps
}

pub fn escalation_trials(max_steps: usize, every: usize) -> Vec<usize> {
    (0..max_steps)
        .filter(|t| is_escalation_trial(*t, max_steps, every))
        .collect()
}

impl BudgetProjection {
    /// Counts every trial on the escalation cadence as a full evaluation.
    pub fn project(config: &OptimizerConfig, trainset_len: usize) -> Self {
        let max_steps = config.max_steps;
        let minibatch_size = config.minibatch_size.min(trainset_len);

        let escalations = if config.minibatch && config.update_prompt_after_full_eval {
            escalation_trials(max_steps, config.minibatch_full_eval_steps).len()
        } else {
            0
        };

        let task_model_calls = if config.minibatch {
            minibatch_size * max_steps + trainset_len * escalations
        } else {
            trainset_len * max_steps
        };

        Self {
            prompt_model_calls: DATA_SUMMARY_CALLS + config.num_candidates + 1,
            task_model_calls,
            escalations,
            max_steps,
            minibatch: config.minibatch,
        }
    }

    /// Emit the projection as a warning so operators see the cost up front.
    pub fn log(&self) {
        warn!(
            "Projected prompt model calls: {} ({} data summarizer calls + {} proposal calls)",
            self.prompt_model_calls,
            DATA_SUMMARY_CALLS,
            self.prompt_model_calls - DATA_SUMMARY_CALLS
        );
        if self.minibatch {
            warn!(
                "Projected task model calls: up to {} over {} minibatch trials and at most {} full evaluations, times the LM calls per example",
                self.task_model_calls, self.max_steps, self.escalations
            );
        } else {
            warn!(
                "Projected task model calls: {} over {} full-evaluation trials, times the LM calls per example",
                self.task_model_calls, self.max_steps
            );
        }
    }
}

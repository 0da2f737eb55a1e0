//! Run configuration for the optimizer.

use chrono::{DateTime, Utc};
use pw_types::{config_error, PwResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::search::SamplerConfig;

/// Unique optimization run identifier.
pub type RunId = Uuid;

/// Bootstrapped demos used for few-shot selection when no budget is given.
pub const DEFAULT_BOOTSTRAPPED_DEMOS: usize = 3;
/// Labeled demos used for few-shot selection when no budget is given.
pub const DEFAULT_LABELED_DEMOS: usize = 0;

/// Top-level configuration for an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub id: RunId,
    pub name: String,

    /// Drafts per variant pool.
    pub num_candidates: usize,

    /// Temperature passed to the prompt model when drafting.
    pub init_temperature: f64,

    /// Examples per minibatch evaluation.
    pub minibatch_size: usize,

    /// Only promote candidates after a full evaluation.
    pub update_prompt_after_full_eval: bool,

    /// Escalate every this many trials in minibatch mode.
    pub minibatch_full_eval_steps: usize,

    /// Maximum number of trials to run.
    pub max_steps: usize,

    /// Stop as soon as a trial scores at least this much.
    pub goal_score: f64,

    /// Evaluate trials on minibatches instead of the full trainset.
    pub minibatch: bool,

    pub max_bootstrapped_demos: usize,
    pub max_labeled_demos: usize,

    pub seed: u64,

    /// Consult the confirmation gate before spending any budget.
    pub requires_permission_to_run: bool,

    /// Attach trial logs, best score and call totals to the result.
    pub track_stats: bool,

    /// Maximum drafts generated concurrently while building a pool.
    pub generation_concurrency: usize,

    /// Include a strategy hint in each generation request.
    pub use_hints: bool,

    pub sampler: SamplerConfig,

    /// Directory for persisted candidates; nothing is written when unset.
    pub log_dir: Option<PathBuf>,

    pub created_at: DateTime<Utc>,
}

impl OptimizerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            num_candidates: 10,
            init_temperature: 1.0,
            minibatch_size: 25,
            update_prompt_after_full_eval: true,
            minibatch_full_eval_steps: 10,
            max_steps: 30,
            goal_score: 100.0,
            minibatch: true,
            max_bootstrapped_demos: 5,
            max_labeled_demos: 2,
            seed: 9,
            requires_permission_to_run: true,
            track_stats: true,
            generation_concurrency: 1,
            use_hints: true,
            sampler: SamplerConfig::default(),
            log_dir: None,
            created_at: Utc::now(),
        }
    }

    /// Load a configuration document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> PwResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PwResult<()> {
        if self.minibatch_full_eval_steps == 0 {
            return Err(config_error!("minibatch_full_eval_steps must be at least 1"));
        }
        if self.minibatch && self.minibatch_size == 0 {
            return Err(config_error!("minibatch_size must be at least 1 in minibatch mode"));
        }
        if self.generation_concurrency == 0 {
            return Err(config_error!("generation_concurrency must be at least 1"));
        }
        if !(self.sampler.gamma > 0.0 && self.sampler.gamma <= 1.0) {
            return Err(config_error!("sampler.gamma must be in (0, 1], got {}", self.sampler.gamma));
        }
        Ok(())
    }

    /// Demo budget handed to the few-shot selector.
    ///
    /// When both limits are zero the selector still gets a small bootstrapped
    /// budget so candidate generation has demonstrations to work from.
    pub fn fewshot_budget(&self) -> (usize, usize) {
        if self.max_bootstrapped_demos == 0 && self.max_labeled_demos == 0 {
            (DEFAULT_BOOTSTRAPPED_DEMOS, DEFAULT_LABELED_DEMOS)
        } else {
            (self.max_bootstrapped_demos, self.max_labeled_demos)
        }
    }

    /// Examples evaluated per trial for a trainset of `trainset_len`.
    pub fn batch_size(&self, trainset_len: usize) -> usize {
        if self.minibatch {
            self.minibatch_size
        } else {
            trainset_len
        }
    }

    pub fn with_max_steps(mut self, n: usize) -> Self {
        self.max_steps = n;
        self
    }

    pub fn with_goal_score(mut self, goal: f64) -> Self {
        self.goal_score = goal;
        self
    }

    pub fn with_minibatch(mut self, enabled: bool, size: usize) -> Self {
        self.minibatch = enabled;
        self.minibatch_size = size;
        self
    }

    pub fn with_full_eval_every(mut self, steps: usize) -> Self {
        self.minibatch_full_eval_steps = steps;
        self
    }

    pub fn with_update_after_full_eval(mut self, enabled: bool) -> Self {
        self.update_prompt_after_full_eval = enabled;
        self
    }

    pub fn with_num_candidates(mut self, n: usize) -> Self {
        self.num_candidates = n;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.init_temperature = temperature;
        self
    }

    pub fn with_demos(mut self, max_bootstrapped: usize, max_labeled: usize) -> Self {
        self.max_bootstrapped_demos = max_bootstrapped;
        self.max_labeled_demos = max_labeled;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_permission_required(mut self, required: bool) -> Self {
        self.requires_permission_to_run = required;
        self
    }

    pub fn with_track_stats(mut self, track: bool) -> Self {
        self.track_stats = track;
        self
    }

    pub fn with_generation_concurrency(mut self, n: usize) -> Self {
        self.generation_concurrency = n;
        self
    }

    pub fn with_sampler(mut self, sampler: SamplerConfig) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::new("promptwise")
    }
}

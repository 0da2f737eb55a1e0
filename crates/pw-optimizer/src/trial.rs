//! Trial records and per-run search state.

use chrono::{DateTime, Utc};
use pw_types::CandidateArtifact;
use serde::{Deserialize, Serialize};

use crate::config::RunId;
use crate::tracker::{ComboKey, ComboTracker};

/// Lifecycle state of a search run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Running,
    /// Goal reached or trial budget exhausted.
    Stopped,
}

/// Full evaluation of the best-mean combo performed during a trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub promoted_key: ComboKey,
    pub score: f64,
    pub num_eval_calls: usize,
    pub location: Option<String>,
}

/// Append-only log entry for one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_number: usize,
    /// Chosen index per pool, in pool order.
    pub indices: Vec<usize>,
    pub combo_key: ComboKey,
    pub num_eval_calls: usize,
    pub full_eval: bool,
    /// The trial's own observed score.
    pub score: f64,
    pub total_eval_calls_so_far: usize,
    pub artifact_location: Option<String>,
    pub escalation: Option<EscalationRecord>,
    /// Best score once this trial finished, `None` while nothing qualified.
    pub best_score: Option<f64>,
}

/// Mutable state of one search run, owned by the driver.
#[derive(Debug, Clone)]
pub struct SearchState {
    pub best_score: f64,
    pub best_candidate: Option<CandidateArtifact>,
    pub total_eval_calls: usize,
    pub combos: ComboTracker,
    pub trials: Vec<TrialRecord>,
    pub run_state: RunState,
}

impl SearchState {
    pub fn new() -> Self {
        Self {
            best_score: f64::NEG_INFINITY,
            best_candidate: None,
            total_eval_calls: 0,
            combos: ComboTracker::new(),
            trials: Vec::new(),
            run_state: RunState::Running,
        }
    }

    /// Replace the best candidate if `score` strictly improves on it.
    pub fn update_best(&mut self, score: f64, candidate: &CandidateArtifact) -> bool {
        if score > self.best_score {
            self.best_score = score;
            self.best_candidate = Some(candidate.clone());
            true
        } else {
            false
        }
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best_candidate.as_ref().map(|_| self.best_score)
    }

    pub fn mark_stopped(&mut self) {
        self.run_state = RunState::Stopped;
    }

    pub fn is_running(&self) -> bool {
        self.run_state == RunState::Running
    }
}

impl Default for SearchState {
    fn default() -> Self {
        Self::new()
    }
}

/// What a finished search run hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub run_id: RunId,
    pub best: Option<CandidateArtifact>,
    pub best_score: Option<f64>,
    pub total_eval_calls: usize,
    pub trials: Vec<TrialRecord>,
    pub stopped_early: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SearchOutcome {
    pub fn escalation_count(&self) -> usize {
        self.trials.iter().filter(|t| t.escalation.is_some()).count()
    }
}

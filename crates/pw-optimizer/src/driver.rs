//! Sequential trial loop over pairs of pool drafts.
//!
//! Each trial draws one index per pool from the guided sampler, merges the
//! two drafts, scores the merged candidate under the budget policy and feeds
//! the score back to the sampler. In minibatch mode the highest-mean combo
//! is periodically escalated to a full evaluation, and only full evaluations
//! may promote a new best candidate.

use chrono::Utc;
use pw_types::{internal_error, validation_error, CandidateArtifact, Example, PwError, PwResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::budget::is_escalation_trial;
use crate::collaborators::{MergeOperation, PersistenceSink, Scorer};
use crate::config::OptimizerConfig;
use crate::evaluate::BudgetedEvaluator;
use crate::proposer::VariantPool;
use crate::search::{CategoricalSampler, CategoricalSpace};
use crate::tracker::ComboKey;
use crate::trial::{EscalationRecord, SearchOutcome, SearchState, TrialRecord};

/// Read-only inputs shared by every trial of a run.
#[derive(Debug, Clone, Copy)]
pub struct SearchInputs<'a> {
    /// Artifact each trial candidate is derived from.
    pub student: &'a CandidateArtifact,
    pub pools: &'a [VariantPool; 2],
    /// Few-shot set precomputed once for the run.
    pub fewshot: &'a [Example],
    pub trainset: &'a [Example],
}

impl SearchInputs<'_> {
    /// Sampler space with one categorical dimension per pool.
    pub fn space(&self) -> CategoricalSpace {
        self.pools
            .iter()
            .fold(CategoricalSpace::new(), |space, pool| {
                space.add_choice(pool.label(), pool.len())
            })
    }
}

/// Runs the trial loop for one optimization run.
pub struct SearchDriver {
    config: OptimizerConfig,
    evaluator: BudgetedEvaluator,
    merger: Arc<dyn MergeOperation>,
    sink: Option<Arc<dyn PersistenceSink>>,
}

impl SearchDriver {
    pub fn new(config: OptimizerConfig, scorer: Arc<dyn Scorer>, merger: Arc<dyn MergeOperation>) -> Self {
        Self {
            config,
            evaluator: BudgetedEvaluator::new(scorer),
            merger,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Option<Arc<dyn PersistenceSink>>) -> Self {
        self.sink = sink;
        self
    }

    /// Run up to `max_steps` trials and return the best candidate found.
    ///
    /// Merge parse failures and scorer failures abort the run.
    pub async fn run(
        &self,
        inputs: SearchInputs<'_>,
        sampler: &mut dyn CategoricalSampler,
    ) -> PwResult<SearchOutcome> {
        let started_at = Utc::now();
        if inputs.trainset.is_empty() {
            return Err(validation_error!("trainset must not be empty"));
        }
        if self.config.max_steps > 0 {
            if let Some(pool) = inputs.pools.iter().find(|p| p.is_empty()) {
                return Err(validation_error!("variant pool {} is empty", pool.label()));
            }
        }

        info!(
            "Starting search: {} trials, {} sampler, {}x{} combos",
            self.config.max_steps,
            sampler.name(),
            inputs.pools[0].len(),
            inputs.pools[1].len()
        );

        let mut state = SearchState::new();
        let mut stopped_early = false;

        for trial in 0..self.config.max_steps {
            if sampler.is_stopped() {
                break;
            }

            let score = self.run_trial(trial, &inputs, &mut state, sampler).await?;
            sampler.observe(score);

            if score >= self.config.goal_score {
                info!(
                    "Trial {} reached goal score ({:.4} >= {:.4}), stopping",
                    trial, score, self.config.goal_score
                );
                sampler.stop();
                stopped_early = true;
                break;
            }
        }

        state.mark_stopped();
        info!(
            "Search finished after {} trials, best score {:?}, {} evaluation calls",
            state.trials.len(),
            state.best_score(),
            state.total_eval_calls
        );
        self.finish(state, stopped_early, started_at)
    }

    async fn run_trial(
        &self,
        trial: usize,
        inputs: &SearchInputs<'_>,
        state: &mut SearchState,
        sampler: &mut dyn CategoricalSampler,
    ) -> PwResult<f64> {
        let [first_pool, second_pool] = inputs.pools;
        let first_index = sampler.suggest(first_pool.label(), first_pool.len());
        let second_index = sampler.suggest(second_pool.label(), second_pool.len());
        let key = ComboKey::from_indices(&[first_index, second_index]);

        let first = first_pool.get(first_index).ok_or_else(|| {
            internal_error!("sampler chose index {} outside pool {}", first_index, first_pool.label())
        })?;
        let second = second_pool.get(second_index).ok_or_else(|| {
            internal_error!("sampler chose index {} outside pool {}", second_index, second_pool.label())
        })?;

        let mut candidate = self.merge_candidate(inputs, first, second).await?;
        candidate.set_metadata("trial", trial);
        candidate.set_metadata("combo_key", key.as_str());
        let artifact_location = self.persist(&candidate, trial, None).await;

        let trainset_len = inputs.trainset.len();
        let batch_size = self.config.batch_size(trainset_len).min(trainset_len);
        let score = self
            .evaluator
            .evaluate(batch_size, inputs.trainset, &candidate)
            .await?;
        let full_eval = batch_size >= trainset_len;
        state.total_eval_calls += batch_size;

        let mut record = TrialRecord {
            trial_number: trial,
            indices: vec![first_index, second_index],
            combo_key: key.clone(),
            num_eval_calls: batch_size,
            full_eval,
            score,
            total_eval_calls_so_far: state.total_eval_calls,
            artifact_location,
            escalation: None,
            best_score: None,
        };

        state.combos.record(key.clone(), score, candidate.clone());

        if self.config.update_prompt_after_full_eval {
            if full_eval && !self.config.minibatch && state.update_best(score, &candidate) {
                info!("Trial {}: new best score {:.4} from combo {}", trial, score, key);
            }
            if self.config.minibatch
                && is_escalation_trial(trial, self.config.max_steps, self.config.minibatch_full_eval_steps)
            {
                record.escalation = self.escalate(trial, inputs.trainset, state).await?;
                record.total_eval_calls_so_far = state.total_eval_calls;
            }
        } else if state.update_best(score, &candidate) {
            info!("Trial {}: new best score {:.4} from combo {}", trial, score, key);
        }

        record.best_score = state.best_score();
        info!(
            "Trial {}: combo {} scored {:.4} on {} examples ({} calls so far)",
            trial, key, score, batch_size, record.total_eval_calls_so_far
        );
        state.trials.push(record);
        Ok(score)
    }

    async fn merge_candidate(
        &self,
        inputs: &SearchInputs<'_>,
        first: &CandidateArtifact,
        second: &CandidateArtifact,
    ) -> PwResult<CandidateArtifact> {
        let raw = self.merger.merge(first, second).await.map_err(|e| match e {
            PwError::Merge { .. } => e,
            other => PwError::merge(format!("merging {} with {} failed: {}", first.name, second.name, other)),
        })?;
        let merged = CandidateArtifact::from_fenced_text(&raw)?;

        let mut candidate = inputs.student.clone();
        candidate.messages = merged.messages;
        candidate.fewshot = inputs.fewshot.to_vec();
        Ok(candidate)
    }

    /// Fully evaluate the best-mean combo that has not been promoted yet.
    async fn escalate(
        &self,
        trial: usize,
        trainset: &[Example],
        state: &mut SearchState,
    ) -> PwResult<Option<EscalationRecord>> {
        let Some((key, candidate, mean)) = state.combos.best_mean() else {
            debug!("Trial {}: every recorded combo is already promoted, skipping escalation", trial);
            return Ok(None);
        };
        let candidate = candidate.clone();
        info!(
            "Trial {}: escalating combo {} (mean {:.4}) to full evaluation",
            trial, key, mean
        );

        let full_score = self
            .evaluator
            .evaluate(trainset.len(), trainset, &candidate)
            .await?;
        state.total_eval_calls += trainset.len();
        let location = self.persist(&candidate, trial, Some("full_eval")).await;

        if state.update_best(full_score, &candidate) {
            info!(
                "Trial {}: new best score {:.4} from full evaluation of combo {}",
                trial, full_score, key
            );
        }
        state.combos.promote(key.clone(), candidate, full_score);

        Ok(Some(EscalationRecord {
            promoted_key: key,
            score: full_score,
            num_eval_calls: trainset.len(),
            location,
        }))
    }

    async fn persist(&self, candidate: &CandidateArtifact, trial: usize, note: Option<&str>) -> Option<String> {
        let sink = self.sink.as_ref()?;
        match sink.persist(candidate, trial, note).await {
            Ok(location) => Some(location),
            Err(e) => {
                warn!("Failed to persist candidate for trial {}: {}", trial, e);
                None
            }
        }
    }

    fn finish(
        &self,
        mut state: SearchState,
        stopped_early: bool,
        started_at: chrono::DateTime<Utc>,
    ) -> PwResult<SearchOutcome> {
        let best_score = state.best_score();
        let mut best = state.best_candidate.take();

        if self.config.track_stats {
            if let Some(best) = best.as_mut() {
                best.set_metadata("trial_logs", serde_json::to_value(&state.trials)?);
                best.set_metadata("score", state.best_score);
                best.set_metadata("total_eval_calls", state.total_eval_calls);
            }
        }

        Ok(SearchOutcome {
            run_id: self.config.id,
            best,
            best_score,
            total_eval_calls: state.total_eval_calls,
            trials: state.trials,
            stopped_early,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

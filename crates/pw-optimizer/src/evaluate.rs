//! Budgeted evaluation of a single candidate.

use pw_types::{CandidateArtifact, EvaluationError, Example, PwResult};
use std::sync::Arc;
use tracing::debug;

use crate::collaborators::{ScoreReport, Scorer};

/// Adapter that scores a candidate on a minibatch or the full dataset.
#[derive(Clone)]
pub struct BudgetedEvaluator {
    scorer: Arc<dyn Scorer>,
}

impl BudgetedEvaluator {
    pub fn new(scorer: Arc<dyn Scorer>) -> Self {
        Self { scorer }
    }

    pub fn scorer(&self) -> Arc<dyn Scorer> {
        Arc::clone(&self.scorer)
    }

    /// Score `candidate` on `batch_size` examples.
    ///
    /// `batch_size == dataset.len()` is a full evaluation; larger sizes are
    /// clamped to the dataset. Scorer failures propagate.
    pub async fn evaluate(
        &self,
        batch_size: usize,
        dataset: &[Example],
        candidate: &CandidateArtifact,
    ) -> PwResult<f64> {
        if dataset.is_empty() {
            return Err(EvaluationError::EmptyDataset.into());
        }
        let batch_size = if batch_size > dataset.len() {
            debug!(
                "Clamping batch of {} to dataset of {} examples",
                batch_size,
                dataset.len()
            );
            dataset.len()
        } else {
            batch_size
        };

        let score = self.scorer.score(candidate, dataset, batch_size).await?;
        debug!(
            "Scored {} on {}/{} examples: {:.4}",
            candidate.name,
            batch_size,
            dataset.len(),
            score
        );
        Ok(score)
    }

    /// Full evaluation that also returns per-example outcomes.
    pub async fn evaluate_with_outputs(
        &self,
        dataset: &[Example],
        candidate: &CandidateArtifact,
    ) -> PwResult<ScoreReport> {
        if dataset.is_empty() {
            return Err(EvaluationError::EmptyDataset.into());
        }
        Ok(self.scorer.score_with_outputs(candidate, dataset).await?)
    }
}

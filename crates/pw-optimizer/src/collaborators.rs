//! External collaborators the search engine drives but does not implement.
//!
//! Text generation, metric computation, few-shot selection and human-facing
//! confirmation all live behind these traits. Implementations may call remote
//! services; the engine awaits every call before moving on.

use async_trait::async_trait;
use pw_types::{CandidateArtifact, EvaluationError, Example, GenerationError, PwResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::budget::BudgetProjection;
use crate::proposer::VariantPool;

/// Everything a prompt model needs to draft one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Position of the draft in its pool.
    pub index: usize,
    /// Base artifact messages, one JSON object per line.
    pub base_prompt: String,
    /// Serialized evaluation of the base artifact.
    pub evaluation_result: String,
    pub metric_description: String,
    pub hint: String,
    /// Normalized description of the desired output schema.
    pub response_format: String,
    pub temperature: f64,
}

/// Generative model used to draft new variants.
#[async_trait]
pub trait PromptModel: Send + Sync {
    /// Raw completion text; an artifact is expected inside a fenced block.
    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// A generation strategy that produces a whole pool of drafts at once.
#[async_trait]
pub trait CandidateProposer: Send + Sync {
    async fn propose(&self, base: &CandidateArtifact, count: usize) -> PwResult<Vec<CandidateArtifact>>;

    fn name(&self) -> &str;
}

/// Combines two drafts into raw text holding one fenced artifact.
///
/// Errors returned here reach the caller of a search as `PwError::Merge`.
#[async_trait]
pub trait MergeOperation: Send + Sync {
    async fn merge(&self, first: &CandidateArtifact, second: &CandidateArtifact) -> PwResult<String>;
}

/// Per-example result returned alongside an aggregate score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleOutcome {
    pub example_index: usize,
    pub prediction: serde_json::Value,
    pub score: f64,
}

/// Aggregate score plus per-example detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub score: f64,
    pub outcomes: Vec<ExampleOutcome>,
}

/// Scores a candidate against a dataset.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Aggregate score over `batch_size` examples of `dataset`.
    ///
    /// When `batch_size < dataset.len()` the scorer picks the slice with its
    /// own sampling policy.
    async fn score(
        &self,
        candidate: &CandidateArtifact,
        dataset: &[Example],
        batch_size: usize,
    ) -> Result<f64, EvaluationError>;

    /// Full-dataset score with per-example outcomes.
    async fn score_with_outputs(
        &self,
        candidate: &CandidateArtifact,
        dataset: &[Example],
    ) -> Result<ScoreReport, EvaluationError> {
        let score = self.score(candidate, dataset, dataset.len()).await?;
        Ok(ScoreReport {
            score,
            outcomes: Vec::new(),
        })
    }
}

/// Arguments for a few-shot selection.
#[derive(Clone)]
pub struct FewShotRequest<'a> {
    pub student: &'a CandidateArtifact,
    pub num_candidate_sets: usize,
    pub trainset: &'a [Example],
    pub max_labeled_demos: usize,
    pub max_bootstrapped_demos: usize,
    pub scorer: Arc<dyn Scorer>,
    pub seed: u64,
}

/// Demonstrations chosen for a run and the score they achieved, if measured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FewShotSelection {
    pub examples: Vec<Example>,
    pub score: Option<f64>,
}

/// Picks the few-shot set attached to every trial candidate.
#[async_trait]
pub trait FewShotSelector: Send + Sync {
    async fn select(&self, request: FewShotRequest<'_>) -> PwResult<FewShotSelection>;
}

/// Selector that attaches no demonstrations.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFewShot;

#[async_trait]
impl FewShotSelector for NoFewShot {
    async fn select(&self, _request: FewShotRequest<'_>) -> PwResult<FewShotSelection> {
        Ok(FewShotSelection::default())
    }
}

/// Pre-flight approval of a run's projected budget.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    async fn confirm(&self, projection: &BudgetProjection) -> bool;
}

/// Gate that approves every run.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ConfirmationGate for AutoApprove {
    async fn confirm(&self, _projection: &BudgetProjection) -> bool {
        true
    }
}

/// Stores serialized candidates for later inspection.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Persist `candidate` for `trial` and return a location token.
    async fn persist(&self, candidate: &CandidateArtifact, trial: usize, note: Option<&str>) -> PwResult<String>;

    /// Persist the final best candidate of a run.
    async fn persist_best(&self, candidate: &CandidateArtifact, trials_run: usize) -> PwResult<String> {
        self.persist(candidate, trials_run, Some("best")).await
    }

    /// Persist a whole variant pool before the search starts.
    ///
    /// By default each draft is persisted under its pool index with the pool
    /// label as note, and the last location is returned.
    async fn persist_pool(&self, pool: &VariantPool) -> PwResult<String> {
        let mut location = String::new();
        for (index, draft) in pool.iter().enumerate() {
            location = self.persist(draft, index, Some(pool.label())).await?;
        }
        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{score_draft, RecordingSink};

    #[tokio::test]
    async fn default_pool_persistence_saves_each_draft() {
        let sink = RecordingSink::default();
        let pool = VariantPool::new("score_based_instruction", vec![score_draft(0), score_draft(1)]);

        let location = sink.persist_pool(&pool).await.unwrap();

        assert_eq!(location, "trial_1_score_based_instruction");
        assert_eq!(
            sink.locations(),
            vec!["trial_0_score_based_instruction", "trial_1_score_based_instruction"]
        );
    }
}

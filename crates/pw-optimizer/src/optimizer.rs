//! The `optimize` entry point: pre-flight checks, pool construction and search.

use pw_types::{validation_error, CandidateArtifact, Example, PwResult};
use std::sync::Arc;
use tracing::{info, warn};

use crate::budget::BudgetProjection;
use crate::collaborators::{
    AutoApprove, CandidateProposer, ConfirmationGate, FewShotRequest, FewShotSelector,
    MergeOperation, NoFewShot, PersistenceSink, PromptModel, Scorer,
};
use crate::config::OptimizerConfig;
use crate::driver::{SearchDriver, SearchInputs};
use crate::evaluate::BudgetedEvaluator;
use crate::proposer::{Feedback, VariantGenerator, VariantPool, FORMAT_BASED_POOL, SCORE_BASED_POOL};
use crate::sink::DirectorySink;
use crate::trial::SearchOutcome;

/// Searches merged variants of a student artifact for the best-scoring one.
///
/// The score-guided pool is drafted by a [`PromptModel`] from feedback on the
/// student; the second pool comes from a [`CandidateProposer`]. Every trial
/// merges one draft from each pool.
pub struct Optimizer {
    config: OptimizerConfig,
    prompt_model: Arc<dyn PromptModel>,
    format_proposer: Arc<dyn CandidateProposer>,
    merger: Arc<dyn MergeOperation>,
    scorer: Arc<dyn Scorer>,
    fewshot: Arc<dyn FewShotSelector>,
    gate: Arc<dyn ConfirmationGate>,
    sink: Option<Arc<dyn PersistenceSink>>,
    metric_description: String,
}

impl Optimizer {
    pub fn new(
        config: OptimizerConfig,
        prompt_model: Arc<dyn PromptModel>,
        format_proposer: Arc<dyn CandidateProposer>,
        merger: Arc<dyn MergeOperation>,
        scorer: Arc<dyn Scorer>,
    ) -> Self {
        Self {
            config,
            prompt_model,
            format_proposer,
            merger,
            scorer,
            fewshot: Arc::new(NoFewShot),
            gate: Arc::new(AutoApprove),
            sink: None,
            metric_description: String::new(),
        }
    }

    pub fn with_fewshot_selector(mut self, selector: Arc<dyn FewShotSelector>) -> Self {
        self.fewshot = selector;
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn ConfirmationGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Overrides the directory sink derived from `log_dir`.
    pub fn with_sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_metric_description(mut self, description: impl Into<String>) -> Self {
        self.metric_description = description.into();
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Best candidate found, or `None` when the run was declined or ran no
    /// trials. `testset` defaults to `trainset` and is only used for the
    /// feedback evaluation of `student`.
    pub async fn optimize(
        &self,
        student: &CandidateArtifact,
        trainset: &[Example],
        testset: Option<&[Example]>,
    ) -> PwResult<Option<CandidateArtifact>> {
        let outcome = self.optimize_with_outcome(student, trainset, testset).await?;
        Ok(outcome.and_then(|outcome| outcome.best))
    }

    /// Like [`Optimizer::optimize`] but returns the whole run record.
    pub async fn optimize_with_outcome(
        &self,
        student: &CandidateArtifact,
        trainset: &[Example],
        testset: Option<&[Example]>,
    ) -> PwResult<Option<SearchOutcome>> {
        self.config.validate()?;
        if trainset.is_empty() {
            return Err(validation_error!("trainset must not be empty"));
        }

        let projection = BudgetProjection::project(&self.config, trainset.len());
        projection.log();
        if self.config.requires_permission_to_run && !self.gate.confirm(&projection).await {
            info!("Run {} declined at confirmation, nothing evaluated", self.config.id);
            return Ok(None);
        }

        let sink = self.resolve_sink()?;

        let (max_bootstrapped_demos, max_labeled_demos) = self.config.fewshot_budget();
        let selection = self
            .fewshot
            .select(FewShotRequest {
                student,
                num_candidate_sets: self.config.num_candidates,
                trainset,
                max_labeled_demos,
                max_bootstrapped_demos,
                scorer: Arc::clone(&self.scorer),
                seed: self.config.seed,
            })
            .await?;
        info!(
            "Selected {} few-shot examples (score {:?})",
            selection.examples.len(),
            selection.score
        );

        let feedback = self.feedback_for(student, testset.unwrap_or(trainset)).await?;
        let pools = self.build_pools(student, &feedback).await?;
        if let Some(sink) = &sink {
            for pool in &pools {
                persist_pool(sink.as_ref(), pool).await;
            }
        }

        let inputs = SearchInputs {
            student,
            pools: &pools,
            fewshot: &selection.examples,
            trainset,
        };
        let mut sampler = self.config.sampler.build(inputs.space(), self.config.seed);

        let outcome = SearchDriver::new(
            self.config.clone(),
            Arc::clone(&self.scorer),
            Arc::clone(&self.merger),
        )
        .with_sink(sink.clone())
        .run(inputs, sampler.as_mut())
        .await?;

        if let (Some(sink), Some(best)) = (sink, outcome.best.as_ref()) {
            match sink.persist_best(best, outcome.trials.len()).await {
                Ok(location) => info!("Best candidate saved to {}", location),
                Err(e) => warn!("Failed to persist best candidate: {}", e),
            }
        }

        Ok(Some(outcome))
    }

    /// Drafts only the score-guided pool, without gating or searching.
    ///
    /// `student` is scored on `testset` (default `trainset`) and the feedback
    /// drives `num_candidates` generations. The pool is persisted when a sink
    /// is configured.
    pub async fn generate_variants(
        &self,
        student: &CandidateArtifact,
        trainset: &[Example],
        testset: Option<&[Example]>,
    ) -> PwResult<VariantPool> {
        self.config.validate()?;
        if trainset.is_empty() {
            return Err(validation_error!("trainset must not be empty"));
        }

        let feedback = self.feedback_for(student, testset.unwrap_or(trainset)).await?;
        let pool = self.score_pool(student, &feedback).await;
        if let Some(sink) = self.resolve_sink()? {
            persist_pool(sink.as_ref(), &pool).await;
        }
        Ok(pool)
    }

    async fn feedback_for(&self, student: &CandidateArtifact, dataset: &[Example]) -> PwResult<Feedback> {
        let evaluator = BudgetedEvaluator::new(Arc::clone(&self.scorer));
        let report = evaluator.evaluate_with_outputs(dataset, student).await?;
        info!("Base artifact scored {:.4}", report.score);
        Ok(Feedback::from_report(&report, self.metric_description.as_str()))
    }

    async fn score_pool(&self, student: &CandidateArtifact, feedback: &Feedback) -> VariantPool {
        VariantGenerator::new(Arc::clone(&self.prompt_model))
            .with_hints(self.config.use_hints)
            .with_concurrency(self.config.generation_concurrency)
            .build_pool(
                SCORE_BASED_POOL,
                student,
                feedback,
                self.config.num_candidates,
                self.config.init_temperature,
                student.response_format.as_ref(),
            )
            .await
    }

    async fn build_pools(
        &self,
        student: &CandidateArtifact,
        feedback: &Feedback,
    ) -> PwResult<[VariantPool; 2]> {
        let count = self.config.num_candidates;
        let score_pool = self.score_pool(student, feedback).await;

        info!(
            "Generating {} {} candidates with {}",
            count,
            FORMAT_BASED_POOL,
            self.format_proposer.name()
        );
        let drafts = self.format_proposer.propose(student, count).await?;
        if drafts.len() != count {
            warn!(
                "Proposer {} returned {} drafts, expected {}",
                self.format_proposer.name(),
                drafts.len(),
                count
            );
        }

        Ok([score_pool, VariantPool::new(FORMAT_BASED_POOL, drafts)])
    }

    fn resolve_sink(&self) -> PwResult<Option<Arc<dyn PersistenceSink>>> {
        if let Some(sink) = &self.sink {
            return Ok(Some(Arc::clone(sink)));
        }
        match &self.config.log_dir {
            Some(dir) => {
                let sink: Arc<dyn PersistenceSink> = Arc::new(DirectorySink::new(dir)?);
                Ok(Some(sink))
            }
            None => Ok(None),
        }
    }
}

async fn persist_pool(sink: &dyn PersistenceSink, pool: &VariantPool) {
    match sink.persist_pool(pool).await {
        Ok(location) => info!("Pool {} saved to {}", pool.label(), location),
        Err(e) => warn!("Failed to persist pool {}: {}", pool.label(), e),
    }
}

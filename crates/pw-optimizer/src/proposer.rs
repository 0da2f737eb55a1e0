//! Score-guided variant generation with bounded retries.

use futures::stream::{self, StreamExt};
use pw_types::{describe_response_format, CandidateArtifact, PwError, PwResult, ResponseFormat};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::collaborators::{GenerationRequest, PromptModel, ScoreReport};

/// Attempts per draft before falling back to the base artifact.
pub const MAX_GENERATION_ATTEMPTS: usize = 3;

/// Sampler dimension of the score-guided pool.
pub const SCORE_BASED_POOL: &str = "score_based_instruction";
/// Sampler dimension of the format-guided pool.
pub const FORMAT_BASED_POOL: &str = "format_based_instruction";

/// Name given to successfully generated drafts.
pub const GENERATED_NAME: &str = "InstructNew";

/// Strategy hints, picked by `index % HINTS.len()`.
pub const HINTS: [(&str, &str); 5] = [
    ("none", "Make it better"),
    (
        "one_side_first",
        "Try to optimize a certain part of the evaluation score first. For example, if the evaluation is based on both precision and recall, try to optimize for recall first. Be extreme at times.",
    ),
    (
        "double_down",
        "Find what the prompt is already doing well and double down on it. For example, if the prompt already does a good job with precision, try to improve that even further with various strategies. Be extreme at times",
    ),
    (
        "weakness_first",
        "Find what the prompt is already doing poorly based on the evaluation score and metric and try to improve that. For example, if the prompt has low recall, try to improve that with various strategies. Be extreme at times",
    ),
    (
        "think",
        "Try to think about what the evaluation score and metric are actually measuring. Then, try to optimize for that. For example, if the evaluation score is calculated based on the average length of the generated instructions, try to optimize for that. Be extreme at times",
    ),
];

/// Evaluation feedback shared by every draft in a pool.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Feedback {
    pub evaluation_result: String,
    pub metric_description: String,
}

impl Feedback {
    pub fn new(evaluation_result: impl Into<String>, metric_description: impl Into<String>) -> Self {
        Self {
            evaluation_result: evaluation_result.into(),
            metric_description: metric_description.into(),
        }
    }

    /// Serialize a scorer report as the evaluation result.
    pub fn from_report(report: &ScoreReport, metric_description: impl Into<String>) -> Self {
        let evaluation_result =
            serde_json::to_string(report).unwrap_or_else(|_| report.score.to_string());
        Self::new(evaluation_result, metric_description)
    }
}

/// Ordered, immutable set of drafts from one generation strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantPool {
    label: String,
    variants: Vec<CandidateArtifact>,
}

impl VariantPool {
    pub fn new(label: impl Into<String>, variants: Vec<CandidateArtifact>) -> Self {
        Self {
            label: label.into(),
            variants,
        }
    }

    /// Name of the sampler dimension indexing this pool.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn get(&self, index: usize) -> Option<&CandidateArtifact> {
        self.variants.get(index)
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidateArtifact> {
        self.variants.iter()
    }
}

/// Drafts variants of a base artifact from evaluation feedback.
#[derive(Clone)]
pub struct VariantGenerator {
    model: Arc<dyn PromptModel>,
    use_hints: bool,
    concurrency: usize,
}

impl VariantGenerator {
    pub fn new(model: Arc<dyn PromptModel>) -> Self {
        Self {
            model,
            use_hints: true,
            concurrency: 1,
        }
    }

    pub fn with_hints(mut self, use_hints: bool) -> Self {
        self.use_hints = use_hints;
        self
    }

    /// Maximum drafts in flight while building a pool.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn hint_for(&self, index: usize) -> &'static str {
        if self.use_hints {
            HINTS[index % HINTS.len()].1
        } else {
            ""
        }
    }

    pub fn request_for(
        &self,
        base: &CandidateArtifact,
        index: usize,
        feedback: &Feedback,
        temperature: f64,
        response_format: Option<&ResponseFormat>,
    ) -> GenerationRequest {
        GenerationRequest {
            index,
            base_prompt: base.messages_as_json_lines(),
            evaluation_result: feedback.evaluation_result.clone(),
            metric_description: feedback.metric_description.clone(),
            hint: self.hint_for(index).to_string(),
            response_format: describe_response_format(response_format),
            temperature,
        }
    }

    /// Draft one variant, retrying up to [`MAX_GENERATION_ATTEMPTS`] times.
    ///
    /// Never fails: once attempts are exhausted the base artifact is
    /// returned unchanged.
    pub async fn generate(
        &self,
        base: &CandidateArtifact,
        index: usize,
        feedback: &Feedback,
        temperature: f64,
        response_format: Option<&ResponseFormat>,
    ) -> CandidateArtifact {
        let request = self.request_for(base, index, feedback, temperature, response_format);

        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            match self.attempt(&request, response_format).await {
                Ok(draft) => return draft,
                Err(e) => warn!(
                    "Error generating variant {} (attempt {}/{}): {}",
                    index, attempt, MAX_GENERATION_ATTEMPTS, e
                ),
            }
        }

        warn!(
            "Failed to generate variant {} after {} attempts, keeping base artifact",
            index, MAX_GENERATION_ATTEMPTS
        );
        base.clone()
    }

    async fn attempt(
        &self,
        request: &GenerationRequest,
        response_format: Option<&ResponseFormat>,
    ) -> PwResult<CandidateArtifact> {
        let raw = self.model.complete(request).await?;
        let mut draft = CandidateArtifact::from_fenced_text(&raw)?;
        if !draft.has_content() {
            return Err(PwError::parse("generated artifact has no messages"));
        }
        draft.name = GENERATED_NAME.to_string();
        draft.response_format = response_format.cloned();
        Ok(draft)
    }

    /// Build a pool of exactly `count` drafts, indices `0..count`.
    ///
    /// Up to `concurrency` drafts are generated at once; pool order always
    /// follows index order.
    pub async fn build_pool(
        &self,
        label: impl Into<String>,
        base: &CandidateArtifact,
        feedback: &Feedback,
        count: usize,
        temperature: f64,
        response_format: Option<&ResponseFormat>,
    ) -> VariantPool {
        let label = label.into();
        info!("Generating {} {} candidates", count, label);

        let variants: Vec<CandidateArtifact> = stream::iter(0..count)
            .map(|index| self.generate(base, index, feedback, temperature, response_format))
            .buffered(self.concurrency)
            .collect()
            .await;

        info!("Finished generating {} candidates", label);
        VariantPool::new(label, variants)
    }
}

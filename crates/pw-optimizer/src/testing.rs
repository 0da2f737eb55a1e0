//! Deterministic collaborators shared by the unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use pw_types::{
    CandidateArtifact, EvaluationError, Example, GenerationError, Message, PwError, PwResult,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::Duration;

use crate::budget::BudgetProjection;
use crate::collaborators::{
    CandidateProposer, ConfirmationGate, FewShotRequest, FewShotSelection, FewShotSelector,
    GenerationRequest, MergeOperation, PersistenceSink, PromptModel, Scorer,
};
use crate::proposer::{VariantPool, FORMAT_BASED_POOL, SCORE_BASED_POOL};
use crate::search::CategoricalSampler;

static TRACING: Once = Once::new();

pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Wrap a system message in a `prompt` fence.
pub fn fenced(content: &str) -> String {
    format!("```prompt\nsystem:\n{content}\n```")
}

pub fn trainset(n: usize) -> Vec<Example> {
    (0..n)
        .map(|i| Example::single("text", format!("example {i}"), if i % 2 == 0 { "pos" } else { "neg" }))
        .collect()
}

pub fn score_draft(i: usize) -> CandidateArtifact {
    CandidateArtifact::new("score").with_message(Message::system(format!("score draft {i}")))
}

pub fn format_draft(j: usize) -> CandidateArtifact {
    CandidateArtifact::new("format").with_message(Message::system(format!("format draft {j}")))
}

/// What [`ConcatMerge`] produces for drafts `i` and `j`.
pub fn combo_candidate(i: usize, j: usize) -> CandidateArtifact {
    CandidateArtifact::new("student")
        .with_message(Message::system(format!("score draft {i}")))
        .with_message(Message::user(format!("format draft {j}")))
}

pub fn two_pools(first: usize, second: usize) -> [VariantPool; 2] {
    [
        VariantPool::new(SCORE_BASED_POOL, (0..first).map(score_draft).collect()),
        VariantPool::new(FORMAT_BASED_POOL, (0..second).map(format_draft).collect()),
    ]
}

// ---- Prompt model ----

enum Script {
    Queue(Mutex<VecDeque<Result<String, GenerationError>>>),
    EchoIndex,
}

/// Prompt model replaying a fixed list of responses.
pub struct ScriptedModel {
    script: Script,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedModel {
    /// Responses are consumed in order; an exhausted script fails.
    pub fn new(responses: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            script: Script::Queue(Mutex::new(responses.into())),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers `variant {index}`, later indices finishing first.
    pub fn echoing_index() -> Self {
        Self {
            script: Script::EchoIndex,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl PromptModel for ScriptedModel {
    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.requests.lock().push(request.clone());
        match &self.script {
            Script::Queue(queue) => queue.lock().pop_front().unwrap_or(Err(GenerationError::Backend {
                message: "script exhausted".into(),
            })),
            Script::EchoIndex => {
                let delay = 10u64.saturating_sub(request.index as u64);
                tokio::time::sleep(Duration::from_millis(delay * 5)).await;
                Ok(fenced(&format!("variant {}", request.index)))
            }
        }
    }
}

// ---- Scorer ----

fn combo_of(candidate: &CandidateArtifact) -> Option<String> {
    let first = candidate.messages.first()?.content.strip_prefix("score draft ")?;
    let second = candidate.messages.get(1)?.content.strip_prefix("format draft ")?;
    Some(format!("{first},{second}"))
}

/// Scores merged candidates by their combo key.
pub struct ComboScorer {
    scores: HashMap<String, f64>,
    default: Option<f64>,
    minibatch_noise: f64,
    batch_sizes: Mutex<Vec<usize>>,
}

impl ComboScorer {
    /// Unknown combos fail unless a default is set.
    pub fn new(scores: &[(&str, f64)]) -> Self {
        Self {
            scores: scores.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            default: None,
            minibatch_noise: 0.0,
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default(mut self, score: f64) -> Self {
        self.default = Some(score);
        self
    }

    /// Perturb minibatch scores by up to `noise`, deterministically per call.
    pub fn with_minibatch_noise(mut self, noise: f64) -> Self {
        self.minibatch_noise = noise;
        self
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }
}

#[async_trait]
impl Scorer for ComboScorer {
    async fn score(
        &self,
        candidate: &CandidateArtifact,
        dataset: &[Example],
        batch_size: usize,
    ) -> Result<f64, EvaluationError> {
        let call = {
            let mut sizes = self.batch_sizes.lock();
            sizes.push(batch_size);
            sizes.len()
        };
        let base = combo_of(candidate)
            .and_then(|key| self.scores.get(&key).copied())
            .or(self.default)
            .ok_or_else(|| EvaluationError::Scorer {
                message: format!("no score for candidate {}", candidate.dump()),
            })?;
        if batch_size < dataset.len() {
            let offset = (call % 3) as f64 - 1.0;
            Ok(base + offset * self.minibatch_noise)
        } else {
            Ok(base)
        }
    }
}

// ---- Merge ----

/// Merges the first message of each draft into a system/user pair.
pub struct ConcatMerge;

#[async_trait]
impl MergeOperation for ConcatMerge {
    async fn merge(&self, first: &CandidateArtifact, second: &CandidateArtifact) -> PwResult<String> {
        let head = |c: &CandidateArtifact| c.messages.first().map(|m| m.content.clone()).unwrap_or_default();
        Ok(format!(
            "Here is the merged prompt.\n```prompt\nsystem:\n{}\n\nuser:\n{}\n```",
            head(first),
            head(second)
        ))
    }
}

/// Merge that never yields a fenced artifact.
pub struct FailingMerge;

#[async_trait]
impl MergeOperation for FailingMerge {
    async fn merge(&self, _first: &CandidateArtifact, _second: &CandidateArtifact) -> PwResult<String> {
        Ok("I could not merge these prompts.".into())
    }
}

/// Merge whose backend always fails.
pub struct ErroringMerge;

#[async_trait]
impl MergeOperation for ErroringMerge {
    async fn merge(&self, _first: &CandidateArtifact, _second: &CandidateArtifact) -> PwResult<String> {
        Err(GenerationError::Backend {
            message: "backend unavailable".into(),
        }
        .into())
    }
}

// ---- Sampler ----

/// Sampler replaying fixed index vectors, cycling when exhausted.
pub struct ScriptedSampler {
    picks: Vec<Vec<usize>>,
    trial: usize,
    dimension: usize,
    stopped: bool,
    pub observed: Vec<f64>,
}

impl ScriptedSampler {
    pub fn new(picks: Vec<Vec<usize>>) -> Self {
        Self {
            picks,
            trial: 0,
            dimension: 0,
            stopped: false,
            observed: Vec::new(),
        }
    }
}

impl CategoricalSampler for ScriptedSampler {
    fn suggest(&mut self, _name: &str, choices: usize) -> usize {
        let pick = &self.picks[self.trial % self.picks.len()];
        let value = pick[self.dimension];
        self.dimension += 1;
        assert!(value < choices, "scripted index {value} outside 0..{choices}");
        value
    }

    fn observe(&mut self, objective: f64) {
        self.observed.push(objective);
        self.trial += 1;
        self.dimension = 0;
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ---- Sinks ----

/// Records locations instead of writing anything.
#[derive(Default)]
pub struct RecordingSink {
    locations: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn locations(&self) -> Vec<String> {
        self.locations.lock().clone()
    }
}

#[async_trait]
impl PersistenceSink for RecordingSink {
    async fn persist(&self, _candidate: &CandidateArtifact, trial: usize, note: Option<&str>) -> PwResult<String> {
        let location = match note {
            Some(note) => format!("trial_{trial}_{note}"),
            None => format!("trial_{trial}"),
        };
        self.locations.lock().push(location.clone());
        Ok(location)
    }
}

pub struct FailingSink;

#[async_trait]
impl PersistenceSink for FailingSink {
    async fn persist(&self, _candidate: &CandidateArtifact, _trial: usize, _note: Option<&str>) -> PwResult<String> {
        Err(PwError::Io(std::io::Error::other("disk full")))
    }
}

// ---- Pools, gates and few-shot ----

/// Proposer returning the same drafts every time.
pub struct StaticProposer {
    drafts: Vec<CandidateArtifact>,
    calls: AtomicUsize,
}

impl StaticProposer {
    pub fn new(drafts: Vec<CandidateArtifact>) -> Self {
        Self {
            drafts,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CandidateProposer for StaticProposer {
    async fn propose(&self, _base: &CandidateArtifact, count: usize) -> PwResult<Vec<CandidateArtifact>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.drafts.iter().take(count).cloned().collect())
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Gate that declines every run.
pub struct DenyGate;

#[async_trait]
impl ConfirmationGate for DenyGate {
    async fn confirm(&self, _projection: &BudgetProjection) -> bool {
        false
    }
}

/// Selector returning the first `max_bootstrapped_demos` examples.
#[derive(Default)]
pub struct CountingFewShot {
    calls: AtomicUsize,
    budgets: Mutex<Vec<(usize, usize)>>,
}

impl CountingFewShot {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(max_bootstrapped, max_labeled)` per call.
    pub fn budgets(&self) -> Vec<(usize, usize)> {
        self.budgets.lock().clone()
    }
}

#[async_trait]
impl FewShotSelector for CountingFewShot {
    async fn select(&self, request: FewShotRequest<'_>) -> PwResult<FewShotSelection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.budgets
            .lock()
            .push((request.max_bootstrapped_demos, request.max_labeled_demos));
        Ok(FewShotSelection {
            examples: request
                .trainset
                .iter()
                .take(request.max_bootstrapped_demos)
                .cloned()
                .collect(),
            score: None,
        })
    }
}

//! # pw-optimizer
//!
//! Budgeted search over combinations of instruction-artifact variants.
//!
//! Two pools of drafts are built from a student artifact: one drafted by a
//! prompt model from evaluation feedback, one from a pluggable proposer. A
//! guided categorical sampler then picks one draft per pool each trial, the
//! pair is merged and scored on a minibatch, and the most promising combos
//! are periodically escalated to a full evaluation before they can become
//! the best candidate.

mod budget;
mod collaborators;
mod config;
mod driver;
mod evaluate;
mod optimizer;
mod proposer;
mod search;
mod sink;
mod tracker;
mod trial;

#[cfg(test)]
pub(crate) mod testing;

pub use budget::{escalation_trials, is_escalation_trial, BudgetProjection, DATA_SUMMARY_CALLS};
pub use collaborators::{
    AutoApprove, CandidateProposer, ConfirmationGate, ExampleOutcome, FewShotRequest,
    FewShotSelection, FewShotSelector, GenerationRequest, MergeOperation, NoFewShot,
    PersistenceSink, PromptModel, ScoreReport, Scorer,
};
pub use config::{OptimizerConfig, RunId, DEFAULT_BOOTSTRAPPED_DEMOS, DEFAULT_LABELED_DEMOS};
pub use driver::{SearchDriver, SearchInputs};
pub use evaluate::BudgetedEvaluator;
pub use optimizer::Optimizer;
pub use proposer::{
    Feedback, VariantGenerator, VariantPool, FORMAT_BASED_POOL, GENERATED_NAME, HINTS,
    MAX_GENERATION_ATTEMPTS, SCORE_BASED_POOL,
};
pub use search::{
    CategoricalSampler, CategoricalSpace, ParameterDef, RandomSampler, SamplerConfig, SamplerKind,
    TpeSampler,
};
pub use sink::{DirectorySink, BEST_FILE};
pub use tracker::{ComboKey, ComboTracker, PromotedCombo, ScoreSample};
pub use trial::{EscalationRecord, RunState, SearchOutcome, SearchState, TrialRecord};

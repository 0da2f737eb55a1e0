//! Categorical search spaces and guided samplers over variant-pool indices.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// A single categorical dimension: one index drawn per trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name (e.g. "score_based_instruction").
    pub name: String,
    /// Number of choices; indices are `0..choices`.
    pub choices: usize,
}

/// The full search space: an ordered list of categorical dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CategoricalSpace {
    pub parameters: Vec<ParameterDef>,
}

impl CategoricalSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_choice(mut self, name: impl Into<String>, choices: usize) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            choices,
        });
        self
    }

    /// Total number of joint combinations (`None` on overflow).
    pub fn size(&self) -> Option<usize> {
        self.parameters
            .iter()
            .try_fold(1usize, |acc, p| acc.checked_mul(p.choices))
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }

    fn sample_uniform(&self, rng: &mut StdRng) -> Vec<usize> {
        self.parameters
            .iter()
            .map(|p| if p.choices == 0 { 0 } else { rng.random_range(0..p.choices) })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Sampler capability
// ---------------------------------------------------------------------------

/// Guided categorical sampler driven one trial at a time.
///
/// Within a trial the whole joint vector is drawn on the first `suggest` and
/// later `suggest` calls read from it, so correlated dimensions are modelled
/// together. `observe` closes the trial with its objective (higher is better).
pub trait CategoricalSampler: Send {
    /// Index for `name` in the current trial, in `0..choices`.
    fn suggest(&mut self, name: &str, choices: usize) -> usize;

    /// Report the current trial's objective so adaptive samplers can learn.
    fn observe(&mut self, objective: f64);

    /// Ask the sampler to issue no further trials.
    fn stop(&mut self);

    fn is_stopped(&self) -> bool;

    /// Human-readable sampler name.
    fn name(&self) -> &str;
}

/// Which sampler a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    #[default]
    Tpe,
    Random,
}

/// Sampler settings carried in the optimizer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub kind: SamplerKind,
    /// Purely random trials before the Parzen model kicks in.
    pub n_startup_trials: usize,
    /// Fraction of observations treated as "good".
    pub gamma: f64,
    /// Candidates drawn from l(x) per trial; the best l/g ratio wins.
    pub n_ei_candidates: usize,
    /// Weight of the uniform prior in both densities.
    pub prior_weight: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            kind: SamplerKind::Tpe,
            n_startup_trials: 10,
            gamma: 0.25,
            n_ei_candidates: 24,
            prior_weight: 1.0,
        }
    }
}

impl SamplerConfig {
    pub fn build(&self, space: CategoricalSpace, seed: u64) -> Box<dyn CategoricalSampler> {
        match self.kind {
            SamplerKind::Tpe => Box::new(TpeSampler::new(space, self.clone(), seed)),
            SamplerKind::Random => Box::new(RandomSampler::new(space, seed)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Observation {
    values: Vec<usize>,
    objective: f64,
}

/// Joint vector drawn for the trial in progress.
#[derive(Debug, Clone, Default)]
struct PendingTrial {
    values: Option<Vec<usize>>,
}

impl PendingTrial {
    fn value(&self, space: &CategoricalSpace, name: &str, choices: usize) -> Option<usize> {
        let position = space.position(name)?;
        let value = *self.values.as_ref()?.get(position)?;
        (space.parameters[position].choices == choices && value < choices).then_some(value)
    }
}

fn fallback_index(rng: &mut StdRng, choices: usize) -> usize {
    if choices == 0 {
        0
    } else {
        rng.random_range(0..choices)
    }
}

// ---- Random sampler ----

/// Seeded uniform sampling across the joint space.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    space: CategoricalSpace,
    rng: StdRng,
    pending: PendingTrial,
    stopped: bool,
}

impl RandomSampler {
    pub fn new(space: CategoricalSpace, seed: u64) -> Self {
        Self {
            space,
            rng: StdRng::seed_from_u64(seed),
            pending: PendingTrial::default(),
            stopped: false,
        }
    }
}

impl CategoricalSampler for RandomSampler {
    fn suggest(&mut self, name: &str, choices: usize) -> usize {
        if self.pending.values.is_none() {
            self.pending.values = Some(self.space.sample_uniform(&mut self.rng));
        }
        match self.pending.value(&self.space, name, choices) {
            Some(value) => value,
            None => fallback_index(&mut self.rng, choices),
        }
    }

    fn observe(&mut self, _objective: f64) {
        self.pending.values = None;
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Tree-structured Parzen estimator ----

/// Probability that a kernel resamples a dimension uniformly instead of
/// keeping the observed index.
const KERNEL_SMOOTHING: f64 = 0.2;

/// Multivariate Tree-structured Parzen estimator over the joint categorical
/// space.
///
/// Completed trials are split into the top `gamma` fraction ("good") and the
/// rest ("bad"). Each group defines a density over whole index vectors: a
/// mixture of one kernel per observation plus a uniform prior. Candidates are
/// drawn from the good density l(x) and the one maximizing l(x)/g(x) is
/// suggested.
#[derive(Debug, Clone)]
pub struct TpeSampler {
    space: CategoricalSpace,
    config: SamplerConfig,
    rng: StdRng,
    observations: Vec<Observation>,
    pending: PendingTrial,
    stopped: bool,
}

impl TpeSampler {
    pub fn new(space: CategoricalSpace, config: SamplerConfig, seed: u64) -> Self {
        Self {
            space,
            config,
            rng: StdRng::seed_from_u64(seed),
            observations: Vec::new(),
            pending: PendingTrial::default(),
            stopped: false,
        }
    }

    /// Register an externally evaluated combination (warm start).
    pub fn add_observation(&mut self, values: Vec<usize>, objective: f64) {
        self.observations.push(Observation { values, objective });
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    fn sample_joint(&mut self) -> Vec<usize> {
        let Self {
            space,
            config,
            rng,
            observations,
            ..
        } = self;
        if observations.is_empty() || observations.len() < config.n_startup_trials {
            return space.sample_uniform(rng);
        }

        let model = ParzenModel {
            space: &*space,
            config: &*config,
            observations: observations.as_slice(),
        };
        let (good, bad) = model.split();

        let mut best: Option<(Vec<usize>, f64)> = None;
        for _ in 0..config.n_ei_candidates.max(1) {
            let candidate = model.draw_from(&good, rng);
            let ratio = model.density(&good, &candidate).ln() - model.density(&bad, &candidate).ln();
            if best.as_ref().map_or(true, |(_, r)| ratio > *r) {
                best = Some((candidate, ratio));
            }
        }

        match best {
            Some((values, _)) => values,
            None => space.sample_uniform(rng),
        }
    }
}

/// Read-only view of the observation history; groups are index lists into it.
struct ParzenModel<'a> {
    space: &'a CategoricalSpace,
    config: &'a SamplerConfig,
    observations: &'a [Observation],
}

impl ParzenModel<'_> {
    /// Indices of the top `gamma` fraction ("good") and the rest ("bad").
    /// Requires at least one observation.
    fn split(&self) -> (Vec<usize>, Vec<usize>) {
        let mut ranked: Vec<usize> = (0..self.observations.len()).collect();
        // Stable sort keeps insertion order among equal objectives.
        ranked.sort_by(|&a, &b| {
            self.observations[b]
                .objective
                .partial_cmp(&self.observations[a].objective)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let n = ranked.len();
        let n_good = ((self.config.gamma * n as f64).ceil() as usize).clamp(1, n);
        let bad = ranked.split_off(n_good);
        (ranked, bad)
    }

    fn kernel(&self, center: &[usize], x: &[usize]) -> f64 {
        self.space
            .parameters
            .iter()
            .zip(center.iter().zip(x))
            .map(|(param, (c, v))| {
                let uniform = KERNEL_SMOOTHING / param.choices.max(1) as f64;
                if c == v {
                    1.0 - KERNEL_SMOOTHING + uniform
                } else {
                    uniform
                }
            })
            .product()
    }

    fn density(&self, group: &[usize], x: &[usize]) -> f64 {
        let prior = self.config.prior_weight / self.space.size().unwrap_or(usize::MAX).max(1) as f64;
        let mass: f64 = group
            .iter()
            .map(|&i| self.kernel(&self.observations[i].values, x))
            .sum();
        (mass + prior) / (group.len() as f64 + self.config.prior_weight)
    }

    fn draw_from(&self, group: &[usize], rng: &mut StdRng) -> Vec<usize> {
        let total = group.len() as f64 + self.config.prior_weight;
        let pick = (rng.random::<f64>() * total).floor() as usize;
        let Some(&center) = group.get(pick) else {
            return self.space.sample_uniform(rng);
        };
        self.space
            .parameters
            .iter()
            .zip(&self.observations[center].values)
            .map(|(param, &value)| {
                if param.choices > 0 && rng.random::<f64>() < KERNEL_SMOOTHING {
                    rng.random_range(0..param.choices)
                } else {
                    value
                }
            })
            .collect()
    }
}

impl CategoricalSampler for TpeSampler {
    fn suggest(&mut self, name: &str, choices: usize) -> usize {
        if self.pending.values.is_none() {
            let joint = self.sample_joint();
            self.pending.values = Some(joint);
        }
        match self.pending.value(&self.space, name, choices) {
            Some(value) => value,
            None => fallback_index(&mut self.rng, choices),
        }
    }

    fn observe(&mut self, objective: f64) {
        if let Some(values) = self.pending.values.take() {
            self.observations.push(Observation { values, objective });
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn name(&self) -> &str {
        "tpe"
    }
}

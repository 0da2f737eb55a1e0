//! Per-combination score history and promotion bookkeeping.

use pw_types::CandidateArtifact;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Canonical key for one selection of indices, one per pool, in pool order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComboKey(String);

impl ComboKey {
    pub fn from_indices(indices: &[usize]) -> Self {
        Self(
            indices
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComboKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One observed score and the candidate that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSample {
    pub score: f64,
    pub candidate: CandidateArtifact,
}

/// A combo that was escalated to a full evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct PromotedCombo {
    pub candidate: CandidateArtifact,
    pub score: f64,
}

/// Accumulates score samples per combo, in first-seen key order.
#[derive(Debug, Clone, Default)]
pub struct ComboTracker {
    order: Vec<ComboKey>,
    samples: HashMap<ComboKey, Vec<ScoreSample>>,
    promoted: HashMap<ComboKey, PromotedCombo>,
}

impl ComboTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: ComboKey, score: f64, candidate: CandidateArtifact) {
        if !self.samples.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.samples
            .entry(key)
            .or_default()
            .push(ScoreSample { score, candidate });
    }

    pub fn samples(&self, key: &ComboKey) -> &[ScoreSample] {
        self.samples.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Mean score of a combo, `None` if it was never recorded.
    pub fn mean(&self, key: &ComboKey) -> Option<f64> {
        let samples = self.samples.get(key)?;
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().map(|s| s.score).sum::<f64>() / samples.len() as f64)
    }

    /// Highest-mean combo not yet promoted, with its most recent candidate.
    ///
    /// Ties go to the combo seen first. `None` means no combo is eligible,
    /// which callers treat as a contract violation.
    pub fn best_mean(&self) -> Option<(ComboKey, &CandidateArtifact, f64)> {
        let mut best: Option<(&ComboKey, f64)> = None;
        for key in self.order.iter().filter(|k| !self.promoted.contains_key(*k)) {
            let Some(mean) = self.mean(key) else {
                continue;
            };
            if best.map_or(true, |(_, m)| mean > m) {
                best = Some((key, mean));
            }
        }

        let (key, mean) = best?;
        let candidate = &self.samples.get(key)?.last()?.candidate;
        Some((key.clone(), candidate, mean))
    }

    /// Record a full evaluation for `key`, overwriting any earlier promotion.
    pub fn promote(&mut self, key: ComboKey, candidate: CandidateArtifact, score: f64) {
        self.promoted.insert(key, PromotedCombo { candidate, score });
    }

    pub fn promoted(&self, key: &ComboKey) -> Option<&PromotedCombo> {
        self.promoted.get(key)
    }

    pub fn is_promoted(&self, key: &ComboKey) -> bool {
        self.promoted.contains_key(key)
    }

    pub fn promoted_count(&self) -> usize {
        self.promoted.len()
    }

    /// Number of distinct combos recorded.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

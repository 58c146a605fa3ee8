//! Turning sampled translations into per-instance rewards.

use crate::data::{Dataset, Sentence};
use crate::evaluators::{sentence_score, EvalConfig};
use crate::trainers::BanditSamples;
use crate::{BanditError, Result};

/// Instances whose samples are logged on logging ticks.
const DIAGNOSTIC_EXAMPLES: usize = 3;

/// How the evaluator scores of the samples become one reward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RewardMode {
    /// The score of the only sample
    Single,
    /// `1.0` when the first sample outscores the second, else `0.0`
    PairwiseBinary,
    /// Score of the first sample minus the score of the second
    PairwiseDifference,
}

impl RewardMode {
    pub fn new(pairwise: bool, binary_feedback: bool) -> Self {
        match (pairwise, binary_feedback) {
            (false, _) => RewardMode::Single,
            (true, true) => RewardMode::PairwiseBinary,
            (true, false) => RewardMode::PairwiseDifference,
        }
    }

    fn samples_needed(self) -> usize {
        match self {
            RewardMode::Single => 1,
            _ => 2,
        }
    }

    fn combine(self, first: f64, second: f64) -> f64 {
        match self {
            RewardMode::Single => first,
            RewardMode::PairwiseBinary => {
                if first > second {
                    1.0
                } else {
                    0.0
                }
            }
            RewardMode::PairwiseDifference => first - second,
        }
    }
}

/// One reward per instance of the batch.
///
/// Every evaluator scores each sample at sentence level against the
/// evaluator's own reference series in `batch`; with several evaluators the
/// reward is the mean of their rewards.
pub fn compute_rewards(
    evaluators: &[EvalConfig],
    batch: &Dataset,
    sentences: &[Vec<Sentence>],
    mode: RewardMode,
) -> Result<Vec<f64>> {
    if evaluators.is_empty() {
        return Err(BanditError::Config(
            "Bandit training needs at least one evaluator".to_string(),
        ));
    }
    if sentences.len() < mode.samples_needed() {
        return Err(BanditError::ShapeMismatch {
            expected: vec![mode.samples_needed()],
            actual: vec![sentences.len()],
        });
    }
    for sample in sentences {
        if sample.len() != batch.len() {
            return Err(BanditError::ShapeMismatch {
                expected: vec![batch.len()],
                actual: vec![sample.len()],
            });
        }
    }

    let mut rewards = vec![0.0; batch.len()];
    for config in evaluators {
        let references = batch.get_series(config.reference())?;
        for (i, reference) in references.iter().enumerate() {
            let first = sentence_score(&config.evaluator, &sentences[0][i], reference);
            let second = match mode {
                RewardMode::Single => 0.0,
                _ => sentence_score(&config.evaluator, &sentences[1][i], reference),
            };
            rewards[i] += mode.combine(first, second);
        }
    }
    let count = evaluators.len() as f64;
    Ok(rewards.into_iter().map(|total| total / count).collect())
}

/// Log references, samples, their probabilities, and rewards of the first instances.
pub fn log_reward_diagnostics(
    references: Option<&[Sentence]>,
    sentences: &[Vec<Sentence>],
    samples: &BanditSamples,
    rewards: &[f64],
) {
    let probabilities: Vec<Vec<f64>> = (0..samples.count())
        .map(|s| samples.logprobs(s).into_iter().map(f64::exp).collect())
        .collect();

    for i in 0..rewards.len().min(DIAGNOSTIC_EXAMPLES) {
        if let Some(reference) = references.and_then(|r| r.get(i)) {
            tracing::info!("reference {}: {}", i, reference.join(" "));
        }
        for (s, sample) in sentences.iter().enumerate() {
            let text = sample.get(i).map(|t| t.join(" ")).unwrap_or_default();
            let probability = probabilities[s].get(i).copied().unwrap_or(0.0);
            tracing::info!("sample {} ({}): {} p={}", i, s, text, probability);
        }
        if let Some(reward) = rewards.get(i) {
            tracing::info!("reward {}: {}", i, reward);
        }
    }
}

//! Bandit objectives and the score-function estimator they share.
//!
//! Every objective reduces to per-instance weights
//! `c_i = (-a_i + T * (lp_i + 1)) / n_i` on the score function
//! `grad lp_i`, where `a_i` is the advantage, `T` the annealed entropy
//! temperature and `n_i` an optional probability normalizer. The engine
//! applies `mean_i(c_i * grad lp_i)`; `c_i` is a constant for
//! backpropagation.

use crate::engine::SampleBatch;
use crate::{BanditError, Result};
use serde::{Deserialize, Serialize};

/// Default `factor` of the cross-entropy objective.
pub const CROSS_ENTROPY_FACTOR: f64 = 1.0e10;
/// Default `factor` of the pairwise cross-entropy objective.
pub const PAIRWISE_XENT_FACTOR: f64 = 1.0e-10;

/// Annealing of the entropy temperature over epochs (0-based).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureSchedule {
    /// `T0 / (epoch + 1)`
    #[default]
    InverseLinear,
    /// `T0 / (epoch + 1)^(1/3)`
    InverseCubeRoot,
}

impl TemperatureSchedule {
    pub fn temperature(self, initial: f64, epoch: usize) -> f64 {
        let e = epoch as f64 + 1.0;
        match self {
            TemperatureSchedule::InverseLinear => initial / e,
            TemperatureSchedule::InverseCubeRoot => initial / e.cbrt(),
        }
    }
}

impl std::str::FromStr for TemperatureSchedule {
    type Err = BanditError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "inverse_linear" | "linear" => Ok(TemperatureSchedule::InverseLinear),
            "inverse_cube_root" | "cube_root" | "cube-root" => {
                Ok(TemperatureSchedule::InverseCubeRoot)
            }
            other => Err(BanditError::Config(format!("Unknown schedule '{}'", other))),
        }
    }
}

/// How the samples of one update are obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplingScheme {
    /// The greedy decode stands in for a sample
    Greedy,
    /// One stochastic sample
    Single,
    /// Greedy decode plus one stochastic sample
    GreedyAndSample,
    /// Two stochastic samples, the second excluding the first
    SamplePair,
}

impl SamplingScheme {
    pub fn sample_count(self) -> usize {
        match self {
            SamplingScheme::Greedy | SamplingScheme::Single => 1,
            SamplingScheme::GreedyAndSample | SamplingScheme::SamplePair => 2,
        }
    }
}

/// Feedback term `a_i` of the estimator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advantage {
    /// `r - b`
    RewardMinusBaseline,
    /// `1 - r`, no baseline
    OneMinusReward,
    /// `r`, no baseline
    Reward,
}

impl Advantage {
    fn apply(self, reward: f64, baseline: f64) -> f64 {
        match self {
            Advantage::RewardMinusBaseline => reward - baseline,
            Advantage::OneMinusReward => 1.0 - reward,
            Advantage::Reward => reward,
        }
    }
}

/// Divisor `n_i` of the estimator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Normalizer {
    None,
    /// `factor * clip(exp(lp), clip_prob)`
    ClippedProbability { clip_prob: f64, factor: f64 },
}

impl Normalizer {
    fn apply(self, logprob: f64) -> f64 {
        match self {
            Normalizer::None => 1.0,
            Normalizer::ClippedProbability { clip_prob, factor } => {
                factor * clip_probability(logprob.exp(), clip_prob)
            }
        }
    }
}

/// Lower-bound a probability, never reaching zero.
pub fn clip_probability(probability: f64, clip_prob: f64) -> f64 {
    probability.max(clip_prob).max(f64::MIN_POSITIVE)
}

/// Loss reported for monitoring: `mean(weight(lp) * -feedback(r))`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitoredLoss {
    /// `mean(lp * -r)`
    LogprobReward,
    /// `mean(exp(lp) * -r)`
    ExpectedReward,
    /// `mean(exp(lp) * -(1 - r))`
    ExpectedComplement,
}

impl MonitoredLoss {
    fn term(self, logprob: f64, reward: f64) -> f64 {
        match self {
            MonitoredLoss::LogprobReward => logprob * -reward,
            MonitoredLoss::ExpectedReward => logprob.exp() * -reward,
            MonitoredLoss::ExpectedComplement => logprob.exp() * -(1.0 - reward),
        }
    }
}

/// An immutable bandit objective for one decoder.
#[derive(Clone, Debug, PartialEq)]
pub struct BanditObjective {
    pub name: String,
    pub decoder: String,
    pub sampling: SamplingScheme,
    pub advantage: Advantage,
    pub normalizer: Normalizer,
    pub loss: MonitoredLoss,
    pub initial_temperature: f64,
    pub schedule: TemperatureSchedule,
}

/// Greedy decode as the sample; a baseline/ablation objective.
pub fn exploit_only_objective(decoder: &str, initial_temperature: f64) -> BanditObjective {
    BanditObjective {
        name: format!("{} - exploit_only", decoder),
        decoder: decoder.to_string(),
        sampling: SamplingScheme::Greedy,
        advantage: Advantage::RewardMinusBaseline,
        normalizer: Normalizer::None,
        loss: MonitoredLoss::LogprobReward,
        initial_temperature,
        schedule: TemperatureSchedule::default(),
    }
}

pub fn expected_loss_objective(decoder: &str, initial_temperature: f64) -> BanditObjective {
    BanditObjective {
        name: format!("{} - expected_loss", decoder),
        decoder: decoder.to_string(),
        sampling: SamplingScheme::Single,
        advantage: Advantage::RewardMinusBaseline,
        normalizer: Normalizer::None,
        loss: MonitoredLoss::ExpectedReward,
        initial_temperature,
        schedule: TemperatureSchedule::default(),
    }
}

pub fn cross_entropy_objective(
    decoder: &str,
    initial_temperature: f64,
    clip_prob: f64,
    factor: f64,
) -> BanditObjective {
    BanditObjective {
        name: format!("{} - cross-entropy", decoder),
        decoder: decoder.to_string(),
        sampling: SamplingScheme::Single,
        advantage: Advantage::RewardMinusBaseline,
        normalizer: Normalizer::ClippedProbability { clip_prob, factor },
        loss: MonitoredLoss::LogprobReward,
        initial_temperature,
        schedule: TemperatureSchedule::default(),
    }
}

/// Rewards are relative (sample 1 vs sample 2); the estimator uses `1 - r`.
pub fn pairwise_objective(decoder: &str, initial_temperature: f64) -> BanditObjective {
    BanditObjective {
        name: format!("{} - pairwise", decoder),
        decoder: decoder.to_string(),
        sampling: SamplingScheme::GreedyAndSample,
        advantage: Advantage::OneMinusReward,
        normalizer: Normalizer::None,
        loss: MonitoredLoss::ExpectedComplement,
        initial_temperature,
        schedule: TemperatureSchedule::default(),
    }
}

/// Rewards are relative; the estimator uses `r` directly.
pub fn pairwise_xent_objective(
    decoder: &str,
    initial_temperature: f64,
    clip_prob: f64,
    factor: f64,
) -> BanditObjective {
    BanditObjective {
        name: format!("{} - pairwise_xent", decoder),
        decoder: decoder.to_string(),
        sampling: SamplingScheme::SamplePair,
        advantage: Advantage::Reward,
        normalizer: Normalizer::ClippedProbability { clip_prob, factor },
        loss: MonitoredLoss::LogprobReward,
        initial_temperature,
        schedule: TemperatureSchedule::default(),
    }
}

impl BanditObjective {
    pub fn with_schedule(mut self, schedule: TemperatureSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn pairwise(&self) -> bool {
        self.sampling.sample_count() == 2
    }

    pub fn temperature(&self, epoch: usize) -> f64 {
        self.schedule.temperature(self.initial_temperature, epoch)
    }

    /// Per-instance log-probability: summed over the samples of a pair.
    pub fn instance_logprobs(&self, samples: &[SampleBatch]) -> Result<Vec<f64>> {
        let expected = self.sampling.sample_count();
        if samples.len() != expected {
            return Err(BanditError::ShapeMismatch {
                expected: vec![expected],
                actual: vec![samples.len()],
            });
        }
        let batch = samples[0].batch_size();
        let mut logprobs = vec![0.0; batch];
        for sample in samples {
            if sample.batch_size() != batch {
                return Err(BanditError::ShapeMismatch {
                    expected: vec![batch],
                    actual: vec![sample.batch_size()],
                });
            }
            for (acc, lp) in logprobs.iter_mut().zip(sample.logprobs.column(0)) {
                *acc += lp;
            }
        }
        Ok(logprobs)
    }

    /// Mean monitored loss. Uses the raw rewards, never the baseline.
    pub fn loss(&self, logprobs: &[f64], rewards: &[f64]) -> Result<f64> {
        check_lengths(logprobs, rewards)?;
        if logprobs.is_empty() {
            return Ok(0.0);
        }
        let total: f64 = logprobs
            .iter()
            .zip(rewards)
            .map(|(lp, r)| self.loss.term(*lp, *r))
            .sum();
        Ok(total / logprobs.len() as f64)
    }

    /// Estimator weights `c_i` (before averaging over the batch).
    pub fn weights(
        &self,
        logprobs: &[f64],
        rewards: &[f64],
        baseline: f64,
        epoch: usize,
    ) -> Result<Vec<f64>> {
        check_lengths(logprobs, rewards)?;
        let temperature = self.temperature(epoch);
        Ok(logprobs
            .iter()
            .zip(rewards)
            .map(|(lp, r)| {
                let advantage = self.advantage.apply(*r, baseline);
                (-advantage + temperature * (lp + 1.0)) / self.normalizer.apply(*lp)
            })
            .collect())
    }

    /// Value of the surrogate `mean_i(lp_i * c_i)` whose gradient is applied.
    pub fn surrogate(&self, logprobs: &[f64], weights: &[f64]) -> f64 {
        if logprobs.is_empty() {
            return 0.0;
        }
        let total: f64 = logprobs.iter().zip(weights).map(|(lp, c)| lp * c).sum();
        total / logprobs.len() as f64
    }

    /// Build the estimator and hand the batch-averaged weights to `apply`.
    ///
    /// `apply` receives one weight per instance, already divided by the
    /// batch size, and returns whatever the update step yields.
    pub fn gradients<T, F>(
        &self,
        logprobs: &[f64],
        rewards: &[f64],
        baseline: f64,
        epoch: usize,
        apply: F,
    ) -> Result<T>
    where
        F: FnOnce(Vec<f64>) -> Result<T>,
    {
        let batch = logprobs.len().max(1) as f64;
        let weights = self
            .weights(logprobs, rewards, baseline, epoch)?
            .into_iter()
            .map(|c| c / batch)
            .collect();
        apply(weights)
    }
}

fn check_lengths(logprobs: &[f64], rewards: &[f64]) -> Result<()> {
    if logprobs.len() != rewards.len() {
        return Err(BanditError::ShapeMismatch {
            expected: vec![logprobs.len()],
            actual: vec![rewards.len()],
        });
    }
    Ok(())
}

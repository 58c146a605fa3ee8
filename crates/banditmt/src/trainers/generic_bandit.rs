//! Bandit trainer for any objective.

use super::objective::{
    cross_entropy_objective, expected_loss_objective, exploit_only_objective,
    pairwise_objective, pairwise_xent_objective, BanditObjective, SamplingScheme,
    CROSS_ENTROPY_FACTOR, PAIRWISE_XENT_FACTOR,
};
use super::{BanditSamples, BanditTrainer};
use crate::config::{BanditConfig, ObjectiveKind};
use crate::data::{Dataset, Vocabulary};
use crate::engine::{Decoder, PolicyEngine, ScoreFunctionGradient, UpdateConfig};
use crate::runners::ExecutionResult;
use crate::{BanditError, Result};

/// Drives a `BanditObjective` through the sample/update protocol.
///
/// The samples of the last `sample` call are kept until `update` consumes
/// them; calling `update` without them is an error.
#[derive(Clone, Debug)]
pub struct GenericBanditTrainer {
    objective: BanditObjective,
    decoder: Decoder,
    update: UpdateConfig,
    binary_feedback: bool,
    use_baseline: bool,
    sample_temperature: f64,
    epoch: usize,
    reward_sum: f64,
    reward_count: usize,
    pending: Option<BanditSamples>,
}

impl GenericBanditTrainer {
    pub fn new(objective: BanditObjective, decoder: Decoder) -> Self {
        Self {
            objective,
            decoder,
            update: UpdateConfig::default(),
            binary_feedback: false,
            use_baseline: false,
            sample_temperature: 1.0,
            epoch: 0,
            reward_sum: 0.0,
            reward_count: 0,
            pending: None,
        }
    }

    pub fn exploit_only(decoder: Decoder, initial_temperature: f64) -> Self {
        let objective = exploit_only_objective(&decoder.name, initial_temperature);
        Self::new(objective, decoder)
    }

    pub fn expected_loss(decoder: Decoder, initial_temperature: f64) -> Self {
        let objective = expected_loss_objective(&decoder.name, initial_temperature);
        Self::new(objective, decoder)
    }

    pub fn cross_entropy(decoder: Decoder, initial_temperature: f64, clip_prob: f64, factor: f64) -> Self {
        let objective = cross_entropy_objective(&decoder.name, initial_temperature, clip_prob, factor);
        Self::new(objective, decoder)
    }

    pub fn pairwise(decoder: Decoder, initial_temperature: f64) -> Self {
        let objective = pairwise_objective(&decoder.name, initial_temperature);
        Self::new(objective, decoder)
    }

    pub fn pairwise_xent(decoder: Decoder, initial_temperature: f64, clip_prob: f64, factor: f64) -> Self {
        let objective = pairwise_xent_objective(&decoder.name, initial_temperature, clip_prob, factor);
        Self::new(objective, decoder)
    }

    /// Build the trainer a run file describes.
    pub fn from_config(decoder: Decoder, config: &BanditConfig) -> Result<Self> {
        config.validate()?;
        let t0 = config.initial_temperature;
        let trainer = match config.objective {
            ObjectiveKind::ExploitOnly => Self::exploit_only(decoder, t0),
            ObjectiveKind::ExpectedLoss => Self::expected_loss(decoder, t0),
            ObjectiveKind::CrossEntropy => Self::cross_entropy(
                decoder,
                t0,
                config.clip_prob,
                config.factor.unwrap_or(CROSS_ENTROPY_FACTOR),
            ),
            ObjectiveKind::Pairwise => Self::pairwise(decoder, t0),
            ObjectiveKind::PairwiseXent => Self::pairwise_xent(
                decoder,
                t0,
                config.clip_prob,
                config.factor.unwrap_or(PAIRWISE_XENT_FACTOR),
            ),
        };
        let schedule = config.schedule;
        let mut trainer = trainer
            .with_update(UpdateConfig {
                l1_weight: config.l1_weight,
                l2_weight: config.l2_weight,
                clip_norm: config.clip_norm,
            })
            .with_binary_feedback(config.binary_feedback)
            .with_baseline(config.baseline);
        trainer.objective = trainer.objective.with_schedule(schedule);
        Ok(trainer)
    }

    pub fn with_update(mut self, update: UpdateConfig) -> Self {
        self.update = update;
        self
    }

    pub fn with_binary_feedback(mut self, binary: bool) -> Self {
        self.binary_feedback = binary;
        self
    }

    pub fn with_baseline(mut self, enabled: bool) -> Self {
        self.use_baseline = enabled;
        self
    }

    /// Softmax temperature used when drawing samples.
    pub fn with_sample_temperature(mut self, temperature: f64) -> Self {
        self.sample_temperature = temperature;
        self
    }

    pub fn objective(&self) -> &BanditObjective {
        &self.objective
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Running mean of all rewards seen by previous updates, or 0.0.
    pub fn baseline(&self) -> f64 {
        if self.use_baseline && self.reward_count > 0 {
            self.reward_sum / self.reward_count as f64
        } else {
            0.0
        }
    }
}

impl<S: PolicyEngine + ?Sized> BanditTrainer<S> for GenericBanditTrainer {
    fn sample(&mut self, session: &mut S, batch: &Dataset) -> Result<BanditSamples> {
        let decoder = &self.decoder;
        let temperature = self.sample_temperature;
        let samples = match self.objective.sampling {
            SamplingScheme::Greedy => vec![session.greedy(decoder, batch)?],
            SamplingScheme::Single => vec![session.sample(decoder, batch, temperature, None)?],
            SamplingScheme::GreedyAndSample => {
                let greedy = session.greedy(decoder, batch)?;
                let sample = session.sample(decoder, batch, temperature, Some(&greedy))?;
                vec![greedy, sample]
            }
            SamplingScheme::SamplePair => {
                let first = session.sample(decoder, batch, temperature, None)?;
                let second = session.sample(decoder, batch, temperature, Some(&first))?;
                vec![first, second]
            }
        };

        let samples = BanditSamples::new(samples);
        self.pending = Some(samples.clone());
        Ok(samples)
    }

    fn update(
        &mut self,
        session: &mut S,
        batch: &Dataset,
        rewards: &[f64],
        summaries: bool,
    ) -> Result<ExecutionResult> {
        let pending = self.pending.take().ok_or_else(|| {
            BanditError::Config("update called without a preceding sample".to_string())
        })?;
        if rewards.len() != pending.batch_size() {
            return Err(BanditError::Config(format!(
                "Expected {} rewards, got {}",
                pending.batch_size(),
                rewards.len()
            )));
        }

        let baseline = self.baseline();
        let logprobs = self.objective.instance_logprobs(&pending.samples)?;
        let loss = self.objective.loss(&logprobs, rewards)?;

        let decoder = &self.decoder;
        let update = &self.update;
        let grad_norm = self
            .objective
            .gradients(&logprobs, rewards, baseline, self.epoch, |weights| {
                let gradient = ScoreFunctionGradient {
                    samples: pending.samples.iter().collect(),
                    weights,
                };
                session.apply_score_function(decoder, batch, &gradient, update)
            })?;

        self.reward_sum += rewards.iter().sum::<f64>();
        self.reward_count += rewards.len();

        let summaries = if summaries {
            let mean_reward = if rewards.is_empty() {
                0.0
            } else {
                rewards.iter().sum::<f64>() / rewards.len() as f64
            };
            vec![
                ("loss".to_string(), loss),
                ("mean_reward".to_string(), mean_reward),
                ("baseline".to_string(), baseline),
                ("temperature".to_string(), self.objective.temperature(self.epoch)),
                ("grad_norm".to_string(), grad_norm),
            ]
        } else {
            Vec::new()
        };

        Ok(ExecutionResult::from_loss(loss, summaries))
    }

    fn is_pairwise(&self) -> bool {
        self.objective.pairwise()
    }

    fn binary_feedback(&self) -> bool {
        self.binary_feedback
    }

    fn vocabulary(&self) -> &Vocabulary {
        &self.decoder.vocabulary
    }

    fn data_id(&self) -> &str {
        &self.decoder.data_id
    }

    fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{toy_dataset, toy_decoder, StubEngine};

    #[test]
    fn test_update_requires_sample() {
        let mut engine = StubEngine::new();
        let mut trainer = GenericBanditTrainer::expected_loss(toy_decoder(), 0.0);
        let batch = toy_dataset("b", 2);
        let err = trainer.update(&mut engine, &batch, &[1.0, 1.0], false).unwrap_err();
        assert!(matches!(err, BanditError::Config(_)));
        assert!(engine.applied_weights.is_empty());
    }

    #[test]
    fn test_reward_count_must_match_batch() {
        let mut engine = StubEngine::new();
        let mut trainer = GenericBanditTrainer::expected_loss(toy_decoder(), 0.0);
        let batch = toy_dataset("b", 3);
        trainer.sample(&mut engine, &batch).unwrap();
        assert!(trainer.update(&mut engine, &batch, &[1.0], false).is_err());
    }

    #[test]
    fn test_sampling_schemes() {
        let batch = toy_dataset("b", 2);

        let mut engine = StubEngine::new();
        let samples = GenericBanditTrainer::exploit_only(toy_decoder(), 0.0)
            .sample(&mut engine, &batch)
            .unwrap();
        assert_eq!(samples.count(), 1);
        assert_eq!((engine.greedy_calls, engine.sample_calls), (1, 0));

        let mut engine = StubEngine::new();
        GenericBanditTrainer::expected_loss(toy_decoder(), 0.0)
            .sample(&mut engine, &batch)
            .unwrap();
        assert_eq!((engine.greedy_calls, engine.sample_calls), (0, 1));

        let mut engine = StubEngine::new();
        let samples = GenericBanditTrainer::pairwise(toy_decoder(), 0.0)
            .sample(&mut engine, &batch)
            .unwrap();
        assert_eq!(samples.count(), 2);
        assert_eq!((engine.greedy_calls, engine.sample_calls), (1, 1));

        let mut engine = StubEngine::new();
        let mut trainer = GenericBanditTrainer::pairwise_xent(toy_decoder(), 0.0, 0.0, 1.0);
        let samples = trainer.sample(&mut engine, &batch).unwrap();
        assert_eq!((engine.greedy_calls, engine.sample_calls), (0, 2));
        // the excluded second sample is empty in the stub
        let sentences = samples.sentences(BanditTrainer::<StubEngine>::vocabulary(&trainer));
        assert!(sentences[1].iter().all(Vec::is_empty));
        assert!(!sentences[0][0].is_empty());
    }

    #[test]
    fn test_update_applies_batch_averaged_weights() {
        let mut engine = StubEngine::new();
        let mut trainer = GenericBanditTrainer::expected_loss(toy_decoder(), 0.0);
        let batch = toy_dataset("b", 4);
        trainer.sample(&mut engine, &batch).unwrap();
        let result = trainer
            .update(&mut engine, &batch, &[1.0, 1.0, 1.0, 1.0], true)
            .unwrap();

        assert_eq!(engine.applied_weights, vec![vec![-0.25; 4]]);
        assert_eq!(engine.applied_sample_counts, vec![1]);
        // loss = mean(exp(-1) * -1)
        assert!((result.loss() + (-1.0f64).exp()).abs() < 1e-12);
        let names: Vec<_> = result.summaries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["loss", "mean_reward", "baseline", "temperature", "grad_norm"]);
    }

    #[test]
    fn test_pairwise_update_uses_both_samples() {
        let mut engine = StubEngine::new();
        let mut trainer = GenericBanditTrainer::pairwise(toy_decoder(), 0.0);
        let batch = toy_dataset("b", 2);
        trainer.sample(&mut engine, &batch).unwrap();
        trainer.update(&mut engine, &batch, &[1.0, 0.0], false).unwrap();
        assert_eq!(engine.applied_sample_counts, vec![2]);
        // c = -(1 - r), halved by the batch
        assert_eq!(engine.applied_weights[0], vec![0.0, -0.5]);
    }

    #[test]
    fn test_baseline_running_mean() {
        let mut engine = StubEngine::new();
        let mut trainer = GenericBanditTrainer::expected_loss(toy_decoder(), 0.0).with_baseline(true);
        let batch = toy_dataset("b", 2);

        trainer.sample(&mut engine, &batch).unwrap();
        trainer.update(&mut engine, &batch, &[1.0, 0.0], false).unwrap();
        assert_eq!(trainer.baseline(), 0.5);
        // first update saw baseline 0
        assert_eq!(engine.applied_weights[0], vec![-0.5, 0.0]);

        trainer.sample(&mut engine, &batch).unwrap();
        trainer.update(&mut engine, &batch, &[1.0, 1.0], false).unwrap();
        assert_eq!(engine.applied_weights[1], vec![-0.25, -0.25]);
        assert_eq!(trainer.baseline(), 0.75);

        let without = GenericBanditTrainer::expected_loss(toy_decoder(), 0.0);
        assert_eq!(without.baseline(), 0.0);
    }

    #[test]
    fn test_from_config() {
        let config = BanditConfig {
            objective: ObjectiveKind::CrossEntropy,
            l2_weight: 0.01,
            clip_norm: Some(1.0),
            ..Default::default()
        };
        let trainer = GenericBanditTrainer::from_config(toy_decoder(), &config).unwrap();
        assert_eq!(trainer.objective().name, "decoder - cross-entropy");
        assert_eq!(
            trainer.objective().normalizer,
            super::super::objective::Normalizer::ClippedProbability {
                clip_prob: 0.0,
                factor: CROSS_ENTROPY_FACTOR
            }
        );

        let mut engine = StubEngine::new();
        let mut trainer = trainer;
        let batch = toy_dataset("b", 1);
        trainer.sample(&mut engine, &batch).unwrap();
        trainer.update(&mut engine, &batch, &[0.5], false).unwrap();
        assert_eq!(engine.updates_seen[0].l2_weight, 0.01);
        assert_eq!(engine.updates_seen[0].clip_norm, Some(1.0));
    }

    #[test]
    fn test_epoch_anneals_temperature() {
        let mut trainer = GenericBanditTrainer::expected_loss(toy_decoder(), 1.0);
        let batch = toy_dataset("b", 1);
        let mut engine = StubEngine::new();
        engine.logprob = 0.0;

        BanditTrainer::<StubEngine>::set_epoch(&mut trainer, 1);
        trainer.sample(&mut engine, &batch).unwrap();
        let result = trainer.update(&mut engine, &batch, &[0.0], true).unwrap();
        // T = 1 / 2, c = T * (0 + 1)
        assert_eq!(engine.applied_weights[0], vec![0.5]);
        assert!(result.summaries.contains(&("temperature".to_string(), 0.5)));
    }
}

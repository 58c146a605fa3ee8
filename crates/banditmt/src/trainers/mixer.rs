//! MIXER: cross-entropy first, then REINFORCE on a growing suffix.
//!
//! Ranzato et al., "Sequence Level Training with Recurrent Neural Networks"
//! (<http://arxiv.org/abs/1511.06732>).

use super::{CrossEntropyTrainer, Trainer};
use crate::data::Dataset;
use crate::engine::{Decoder, MixerStep, PolicyEngine, UpdateConfig};
use crate::evaluators::{sentence_score, BleuEvaluator};
use crate::runners::ExecutionResult;
use crate::Result;

/// Trains with cross-entropy for `xent_calls` batches, then uses REINFORCE
/// for the last `k` decoder steps, growing `k` by one every `moving_calls`
/// batches.
#[derive(Clone, Debug)]
pub struct MixerTrainer {
    xent_trainer: CrossEntropyTrainer,
    decoder: Decoder,
    update: UpdateConfig,
    xent_calls: usize,
    moving_calls: usize,
    calls: usize,
    bleu: BleuEvaluator,
}

impl MixerTrainer {
    pub fn new(decoder: Decoder, xent_calls: usize, moving_calls: usize) -> Self {
        Self {
            xent_trainer: CrossEntropyTrainer::new(decoder.clone()),
            decoder,
            update: UpdateConfig::default(),
            xent_calls,
            moving_calls: moving_calls.max(1),
            calls: 0,
            bleu: BleuEvaluator::new(1),
        }
    }

    pub fn with_update(mut self, update: UpdateConfig) -> Self {
        self.update = update;
        self
    }

    /// Number of trailing decoder steps trained with REINFORCE at `calls`.
    pub fn reinforce_steps(&self, calls: usize) -> usize {
        if calls <= self.xent_calls {
            return 0;
        }
        let k = (calls - self.xent_calls) / self.moving_calls + 1;
        k.min(self.decoder.max_output_len)
    }

    /// Per-step weights: 1.0 for cross-entropy, 0.0 for the REINFORCE suffix.
    pub fn mixing_weights(&self, calls: usize) -> Vec<f64> {
        let len = self.decoder.max_output_len;
        let k = self.reinforce_steps(calls);
        (0..len)
            .map(|t| if t + k >= len { 0.0 } else { 1.0 })
            .collect()
    }
}

impl<S: PolicyEngine + ?Sized> Trainer<S> for MixerTrainer {
    fn train_step(
        &mut self,
        session: &mut S,
        batch: &Dataset,
        summaries: bool,
    ) -> Result<ExecutionResult> {
        self.calls += 1;
        if self.calls <= self.xent_calls {
            return self.xent_trainer.train_step(session, batch, summaries);
        }

        let decoded = session.greedy(&self.decoder, batch)?;
        let sentences = self
            .decoder
            .vocabulary
            .vectors_to_sentences(decoded.sample_ids(0));
        let references = batch.get_series(&self.decoder.data_id)?;
        let rewards: Vec<f64> = sentences
            .iter()
            .zip(references)
            .map(|(hyp, reference)| sentence_score(&self.bleu, hyp, reference))
            .collect();

        let step = MixerStep {
            decoded: &decoded,
            rewards,
            xent_weights: self.mixing_weights(self.calls),
        };
        let loss = session.apply_mixer(&self.decoder, batch, &step, &self.update)?;

        let summaries = if summaries {
            let mean_bleu = if step.rewards.is_empty() {
                0.0
            } else {
                step.rewards.iter().sum::<f64>() / step.rewards.len() as f64
            };
            vec![
                ("mixer_loss".to_string(), loss),
                ("mixer_bleu".to_string(), mean_bleu),
                ("reinforce_steps".to_string(), self.reinforce_steps(self.calls) as f64),
            ]
        } else {
            Vec::new()
        };
        Ok(ExecutionResult::from_loss(loss, summaries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{toy_dataset, toy_decoder, StubEngine};

    #[test]
    fn test_reinforce_steps_grow_and_saturate() {
        // max_output_len is 4
        let mixer = MixerTrainer::new(toy_decoder(), 2, 3);
        assert_eq!(mixer.reinforce_steps(1), 0);
        assert_eq!(mixer.reinforce_steps(2), 0);
        assert_eq!(mixer.reinforce_steps(3), 1);
        assert_eq!(mixer.reinforce_steps(5), 2);
        assert_eq!(mixer.reinforce_steps(100), 4);
    }

    #[test]
    fn test_mixing_weights_suffix() {
        let mixer = MixerTrainer::new(toy_decoder(), 0, 1);
        assert_eq!(mixer.mixing_weights(1), vec![1.0, 1.0, 0.0, 0.0]);
        assert_eq!(mixer.mixing_weights(10), vec![0.0; 4]);
    }

    #[test]
    fn test_switches_from_xent_to_mixer() {
        let mut engine = StubEngine::new();
        let mut mixer = MixerTrainer::new(toy_decoder(), 1, 1);
        let batch = toy_dataset("b", 2);

        mixer.train_step(&mut engine, &batch, false).unwrap();
        assert_eq!(engine.xent_steps, 1);
        assert!(engine.mixer_steps.is_empty());

        let result = mixer.train_step(&mut engine, &batch, true).unwrap();
        assert_eq!(engine.mixer_steps.len(), 1);
        // the stub decodes the references exactly
        let (rewards, weights) = &engine.mixer_steps[0];
        assert_eq!(rewards, &vec![100.0, 100.0]);
        assert_eq!(weights, &vec![1.0, 1.0, 0.0, 0.0]);
        assert!(result.summaries.iter().any(|(n, _)| n == "mixer_bleu"));
    }
}

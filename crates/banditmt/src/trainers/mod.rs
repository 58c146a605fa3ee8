//! Trainers: one parameter update per batch.
//!
//! Provides:
//! - `Trainer` for supervised steps (`CrossEntropyTrainer`, `MixerTrainer`)
//! - `BanditTrainer` for the two-phase sample/update protocol
//! - `GenericBanditTrainer` driving any `BanditObjective`

mod cross_entropy;
mod generic_bandit;
mod mixer;
pub mod objective;

pub use cross_entropy::CrossEntropyTrainer;
pub use generic_bandit::GenericBanditTrainer;
pub use mixer::MixerTrainer;
pub use objective::{
    cross_entropy_objective, expected_loss_objective, exploit_only_objective,
    pairwise_objective, pairwise_xent_objective, BanditObjective, SamplingScheme,
    TemperatureSchedule,
};

use crate::data::{Dataset, Sentence, Vocabulary};
use crate::engine::SampleBatch;
use crate::runners::ExecutionResult;
use crate::Result;

/// A supervised trainer.
pub trait Trainer<S: ?Sized> {
    /// Run one update on `batch`. Summaries are only collected when asked.
    fn train_step(
        &mut self,
        session: &mut S,
        batch: &Dataset,
        summaries: bool,
    ) -> Result<ExecutionResult>;
}

/// Samples drawn for one batch: one or two per instance.
#[derive(Clone, Debug, PartialEq)]
pub struct BanditSamples {
    pub samples: Vec<SampleBatch>,
}

impl BanditSamples {
    pub fn new(samples: Vec<SampleBatch>) -> Self {
        Self { samples }
    }

    /// Samples per instance.
    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn batch_size(&self) -> usize {
        self.samples.first().map(SampleBatch::batch_size).unwrap_or(0)
    }

    /// Tokens of each sample, indexed `[sample][instance]`.
    pub fn sentences(&self, vocabulary: &Vocabulary) -> Vec<Vec<Sentence>> {
        self.samples
            .iter()
            .map(|s| vocabulary.vectors_to_sentences(s.sample_ids(0)))
            .collect()
    }

    /// Sequence log-probabilities of the `index`-th sample.
    pub fn logprobs(&self, index: usize) -> Vec<f64> {
        self.samples
            .get(index)
            .map(SampleBatch::first_logprobs)
            .unwrap_or_default()
    }
}

/// A trainer following the two-phase bandit protocol.
///
/// `sample` runs the policy without updating it; the caller scores the
/// samples and passes one reward per instance to `update`.
pub trait BanditTrainer<S: ?Sized> {
    fn sample(&mut self, session: &mut S, batch: &Dataset) -> Result<BanditSamples>;

    /// Apply the objective's gradient for the last sampled batch.
    fn update(
        &mut self,
        session: &mut S,
        batch: &Dataset,
        rewards: &[f64],
        summaries: bool,
    ) -> Result<ExecutionResult>;

    /// Whether rewards compare two samples.
    fn is_pairwise(&self) -> bool;

    /// Whether pairwise rewards are 1/0 instead of score differences.
    fn binary_feedback(&self) -> bool;

    /// Vocabulary for turning sampled ids into tokens.
    fn vocabulary(&self) -> &Vocabulary;

    /// Series the decoder is trained to produce.
    fn data_id(&self) -> &str;

    /// Number of completed epochs, for temperature annealing.
    fn set_epoch(&mut self, epoch: usize);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2, Array3};

    #[test]
    fn test_bandit_samples_views() {
        let vocabulary = Vocabulary::from_wordlist(["a", "b"]);
        let a = vocabulary.token_to_id("a");
        let b = vocabulary.token_to_id("b");
        let end = vocabulary.end_id();

        let first = SampleBatch::from_single(array![[a, b], [end, end]], vec![-1.0, -2.0]).unwrap();
        let second = SampleBatch::new(Array3::from_elem((2, 2, 1), end), Array2::zeros((2, 1))).unwrap();
        let samples = BanditSamples::new(vec![first, second]);

        assert_eq!(samples.count(), 2);
        assert_eq!(samples.batch_size(), 2);
        assert_eq!(samples.logprobs(0), vec![-1.0, -2.0]);
        assert!(samples.logprobs(5).is_empty());

        let sentences = samples.sentences(&vocabulary);
        assert_eq!(sentences[0], vec![vec!["a".to_string()], vec!["b".to_string()]]);
        assert_eq!(sentences[1], vec![Vec::<String>::new(), Vec::new()]);
    }
}

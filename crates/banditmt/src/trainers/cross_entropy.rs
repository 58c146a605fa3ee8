//! Supervised cross-entropy trainer.

use super::Trainer;
use crate::data::Dataset;
use crate::engine::{Decoder, PolicyEngine, UpdateConfig};
use crate::runners::ExecutionResult;
use crate::Result;

/// One teacher-forced cross-entropy step per batch.
#[derive(Clone, Debug)]
pub struct CrossEntropyTrainer {
    decoder: Decoder,
    update: UpdateConfig,
}

impl CrossEntropyTrainer {
    pub fn new(decoder: Decoder) -> Self {
        tracing::info!(decoder = %decoder.name, "Initializing cross-entropy trainer");
        Self {
            decoder,
            update: UpdateConfig::default(),
        }
    }

    pub fn with_l2(mut self, weight: f64) -> Self {
        self.update.l2_weight = weight;
        self
    }

    pub fn with_clip_norm(mut self, clip_norm: f64) -> Self {
        self.update.clip_norm = Some(clip_norm);
        self
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }
}

impl<S: PolicyEngine + ?Sized> Trainer<S> for CrossEntropyTrainer {
    fn train_step(
        &mut self,
        session: &mut S,
        batch: &Dataset,
        summaries: bool,
    ) -> Result<ExecutionResult> {
        let loss = session.apply_cross_entropy(&self.decoder, batch, &self.update)?;
        let summaries = if summaries {
            vec![("train_xent".to_string(), loss)]
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
    fn test_step_passes_regularization() {
        let mut engine = StubEngine::new();
        let mut trainer = CrossEntropyTrainer::new(toy_decoder()).with_l2(1e-4);
        let batch = toy_dataset("b", 2);

        let quiet = trainer.train_step(&mut engine, &batch, false).unwrap();
        assert!(quiet.summaries.is_empty());
        let verbose = trainer.train_step(&mut engine, &batch, true).unwrap();
        assert_eq!(verbose.summaries, vec![("train_xent".to_string(), 0.5)]);

        assert_eq!(engine.xent_steps, 2);
        assert_eq!(engine.updates_seen[0].l2_weight, 1e-4);
    }
}

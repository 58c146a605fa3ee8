//! Greedy decoding runner.

use super::{ExecutionResult, Runner, RunnerInfo, RunnerOutput};
use crate::data::Dataset;
use crate::engine::{Decoder, PolicyEngine};
use crate::Result;

const LOSS_NAMES: &[&str] = &["train_xent", "runtime_xent"];

/// Decodes with argmax and reports the decoder's cross-entropies.
///
/// Losses are averaged over batches; they are zero when the dataset has no
/// reference series.
#[derive(Clone, Debug)]
pub struct GreedyRunner {
    decoder: Decoder,
    output_series: String,
}

impl GreedyRunner {
    pub fn new(decoder: Decoder) -> Self {
        let output_series = decoder.data_id.clone();
        Self {
            decoder,
            output_series,
        }
    }

    /// Store outputs under a different series name.
    pub fn with_output_series(mut self, series: impl Into<String>) -> Self {
        self.output_series = series.into();
        self
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }
}

impl RunnerInfo for GreedyRunner {
    fn output_series(&self) -> &str {
        &self.output_series
    }

    fn decoder_data_id(&self) -> &str {
        &self.decoder.data_id
    }

    fn loss_names(&self) -> &[&'static str] {
        LOSS_NAMES
    }
}

impl<S: PolicyEngine + ?Sized> Runner<S> for GreedyRunner {
    fn run(
        &self,
        session: &mut S,
        dataset: &Dataset,
        compute_losses: bool,
        batch_size: usize,
    ) -> Result<ExecutionResult> {
        let with_losses = compute_losses && dataset.has_series(&self.decoder.data_id);
        let mut decoded = Vec::with_capacity(dataset.len());
        let mut train_xent = 0.0;
        let mut runtime_xent = 0.0;
        let mut batch_count = 0usize;

        for batch in dataset.batch_dataset(batch_size) {
            batch_count += 1;
            if with_losses {
                let (train, runtime) = session.xent_losses(&self.decoder, &batch)?;
                train_xent += train;
                runtime_xent += runtime;
            }

            let greedy = session.greedy(&self.decoder, &batch)?;
            if let Some(first) = greedy.logprobs.get((0, 0)) {
                tracing::debug!("log probability of the first sentence in batch: {}", first);
            }
            decoded.extend(
                self.decoder
                    .vocabulary
                    .vectors_to_sentences(greedy.sample_ids(0)),
            );
        }

        let losses = if batch_count > 0 {
            vec![train_xent / batch_count as f64, runtime_xent / batch_count as f64]
        } else {
            vec![0.0, 0.0]
        };

        Ok(ExecutionResult {
            outputs: RunnerOutput::Sentences(decoded),
            losses,
            summaries: Vec::new(),
        })
    }
}

//! Runners apply a model to a dataset and collect its outputs.
//!
//! Provides:
//! - `RunnerInfo` naming the generated series and reported losses
//! - `Runner` executing on a session
//! - `ExecutionResult` shared by runners and trainers
//! - `GreedyRunner` decoding with argmax

mod greedy;

pub use greedy::GreedyRunner;

use crate::data::{Dataset, Sentence};
use crate::Result;
use ndarray::Array2;

/// What a runner produced for a dataset.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum RunnerOutput {
    #[default]
    Empty,
    Sentences(Vec<Sentence>),
    Numeric(Array2<f64>),
}

impl RunnerOutput {
    pub fn len(&self) -> usize {
        match self {
            RunnerOutput::Empty => 0,
            RunnerOutput::Sentences(s) => s.len(),
            RunnerOutput::Numeric(a) => a.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sentences(&self) -> Option<&[Sentence]> {
        match self {
            RunnerOutput::Sentences(s) => Some(s),
            _ => None,
        }
    }

    /// Text of the `index`-th item for display.
    pub fn item_to_string(&self, index: usize) -> String {
        match self {
            RunnerOutput::Sentences(s) => s.get(index).map(|s| s.join(" ")).unwrap_or_default(),
            RunnerOutput::Numeric(_) => "numeric tensor".to_string(),
            RunnerOutput::Empty => String::new(),
        }
    }
}

/// Result of executing a runner or a training step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionResult {
    pub outputs: RunnerOutput,
    /// In the order of the producer's loss names
    pub losses: Vec<f64>,
    /// Scalars for the metric logger
    pub summaries: Vec<(String, f64)>,
}

impl ExecutionResult {
    /// Result of a training step.
    pub fn from_loss(loss: f64, summaries: Vec<(String, f64)>) -> Self {
        Self {
            outputs: RunnerOutput::Empty,
            losses: vec![loss],
            summaries,
        }
    }

    /// First loss, or 0.0 when nothing was computed.
    pub fn loss(&self) -> f64 {
        self.losses.first().copied().unwrap_or(0.0)
    }
}

/// What a runner generates and reports, independent of the session type.
pub trait RunnerInfo {
    /// Series name the outputs are stored under.
    fn output_series(&self) -> &str;

    /// Reference series needed to compute the losses.
    fn decoder_data_id(&self) -> &str;

    fn loss_names(&self) -> &[&'static str];
}

/// Executes a model over a dataset.
pub trait Runner<S: ?Sized>: RunnerInfo {
    /// Run over the whole dataset in batches of `batch_size`.
    fn run(
        &self,
        session: &mut S,
        dataset: &Dataset,
        compute_losses: bool,
        batch_size: usize,
    ) -> Result<ExecutionResult>;
}

impl<R: RunnerInfo + ?Sized> RunnerInfo for Box<R> {
    fn output_series(&self) -> &str {
        (**self).output_series()
    }

    fn decoder_data_id(&self) -> &str {
        (**self).decoder_data_id()
    }

    fn loss_names(&self) -> &[&'static str] {
        (**self).loss_names()
    }
}

impl<S: ?Sized, R: Runner<S> + ?Sized> Runner<S> for Box<R> {
    fn run(
        &self,
        session: &mut S,
        dataset: &Dataset,
        compute_losses: bool,
        batch_size: usize,
    ) -> Result<ExecutionResult> {
        (**self).run(session, dataset, compute_losses, batch_size)
    }
}

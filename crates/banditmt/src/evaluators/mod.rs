//! Evaluation metrics.
//!
//! Provides:
//! - `Evaluator` trait shared by subprocess-backed and in-process metrics
//! - `BeerWrapper` / `BleuReferenceWrapper` for external scoring tools
//! - `BleuEvaluator` and `ExactMatch` computed in-process
//! - `EvalConfig` pairing a generated series with its reference series

mod bleu;
mod external;

pub use bleu::{BleuEvaluator, ExactMatch};
pub use external::{BeerWrapper, BleuReferenceWrapper};

use crate::data::Sentence;

/// A corpus-level metric over tokenized hypotheses and references.
pub trait Evaluator {
    /// Name used in evaluation keys (`"{series}/{name}"`).
    fn name(&self) -> &str;

    /// Score hypotheses against references. Must not fail: broken tools score 0.0.
    fn score(&self, hypotheses: &[Sentence], references: &[Sentence]) -> f64;
}

impl<E: Evaluator + ?Sized> Evaluator for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn score(&self, hypotheses: &[Sentence], references: &[Sentence]) -> f64 {
        (**self).score(hypotheses, references)
    }
}

/// Score a single sentence pair. An empty hypothesis scores 0.0 without
/// consulting the evaluator, since sentence-level metrics may fail on it.
pub fn sentence_score<E: Evaluator + ?Sized>(
    evaluator: &E,
    hypothesis: &Sentence,
    reference: &Sentence,
) -> f64 {
    if hypothesis.is_empty() {
        return 0.0;
    }
    evaluator.score(
        std::slice::from_ref(hypothesis),
        std::slice::from_ref(reference),
    )
}

/// Join tokens with spaces and sentences with newlines, newline-terminated.
pub fn serialize_to_bytes(sentences: &[Sentence]) -> Vec<u8> {
    let mut text = String::new();
    for sentence in sentences {
        text.push_str(&sentence.join(" "));
        text.push('\n');
    }
    text.into_bytes()
}

/// Which generated series is scored against which reference series, and how.
pub struct EvalConfig {
    pub generated: String,
    reference: Option<String>,
    pub evaluator: Box<dyn Evaluator>,
}

impl EvalConfig {
    /// Score a generated series against the dataset series of the same name.
    pub fn new(generated: impl Into<String>, evaluator: Box<dyn Evaluator>) -> Self {
        Self {
            generated: generated.into(),
            reference: None,
            evaluator,
        }
    }

    /// Score against a differently named reference series.
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Reference series name; defaults to the generated series name.
    pub fn reference(&self) -> &str {
        self.reference.as_deref().unwrap_or(self.generated.as_str())
    }

    /// Evaluation key, e.g. `"target/BLEU"`.
    pub fn metric_name(&self) -> String {
        format!("{}/{}", self.generated, self.evaluator.name())
    }
}

impl std::fmt::Debug for EvalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalConfig")
            .field("generated", &self.generated)
            .field("reference", &self.reference())
            .field("evaluator", &self.evaluator.name())
            .finish()
    }
}

/// Key of the main metric: the last configured evaluator.
pub fn main_metric(evaluators: &[EvalConfig]) -> Option<String> {
    evaluators.last().map(EvalConfig::metric_name)
}

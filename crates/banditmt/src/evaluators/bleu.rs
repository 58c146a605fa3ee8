//! In-process metrics.

use super::Evaluator;
use crate::data::Sentence;
use std::collections::HashMap;

/// Corpus BLEU with clipped n-gram precisions and a brevity penalty,
/// scaled to 0..100.
#[derive(Clone, Debug)]
pub struct BleuEvaluator {
    max_order: usize,
    name: String,
}

impl Default for BleuEvaluator {
    fn default() -> Self {
        Self::new(4)
    }
}

impl BleuEvaluator {
    /// BLEU up to `max_order`-grams (clamped to at least 1).
    pub fn new(max_order: usize) -> Self {
        Self {
            max_order: max_order.max(1),
            name: "BLEU".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn max_order(&self) -> usize {
        self.max_order
    }

    /// Clipped matches and hypothesis n-gram totals per order.
    fn statistics(&self, hypotheses: &[Sentence], references: &[Sentence]) -> (Vec<usize>, Vec<usize>) {
        let mut matches = vec![0; self.max_order];
        let mut totals = vec![0; self.max_order];

        for (hyp, reference) in hypotheses.iter().zip(references) {
            for order in 1..=self.max_order {
                let hyp_counts = ngram_counts(hyp, order);
                let ref_counts = ngram_counts(reference, order);
                for (gram, count) in &hyp_counts {
                    let allowed = ref_counts.get(gram).copied().unwrap_or(0);
                    matches[order - 1] += (*count).min(allowed);
                }
                totals[order - 1] += hyp.len().saturating_sub(order - 1);
            }
        }
        (matches, totals)
    }
}

fn ngram_counts(tokens: &[String], order: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= order {
        for gram in tokens.windows(order) {
            *counts.entry(gram).or_insert(0) += 1;
        }
    }
    counts
}

impl Evaluator for BleuEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn score(&self, hypotheses: &[Sentence], references: &[Sentence]) -> f64 {
        let hyp_len: usize = hypotheses.iter().map(Vec::len).sum();
        let ref_len: usize = references.iter().map(Vec::len).sum();
        if hyp_len == 0 {
            return 0.0;
        }

        let (matches, totals) = self.statistics(hypotheses, references);
        let mut log_precision = 0.0;
        for (m, t) in matches.iter().zip(&totals) {
            if *m == 0 || *t == 0 {
                return 0.0;
            }
            log_precision += (*m as f64 / *t as f64).ln();
        }
        log_precision /= self.max_order as f64;

        let brevity = if hyp_len < ref_len {
            (1.0 - ref_len as f64 / hyp_len as f64).exp()
        } else {
            1.0
        };

        100.0 * brevity * log_precision.exp()
    }
}

/// Fraction of hypotheses identical to their reference.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExactMatch;

impl Evaluator for ExactMatch {
    fn name(&self) -> &str {
        "Accuracy"
    }

    fn score(&self, hypotheses: &[Sentence], references: &[Sentence]) -> f64 {
        if hypotheses.is_empty() {
            return 0.0;
        }
        let hits = hypotheses
            .iter()
            .zip(references)
            .filter(|(h, r)| h == r)
            .count();
        hits as f64 / hypotheses.len() as f64
    }
}

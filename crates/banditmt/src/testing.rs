//! Scripted engine for unit tests.

use crate::checkpoint::Checkpointable;
use crate::data::{Dataset, Sentence};
use crate::engine::{Decoder, MixerStep, PolicyEngine, SampleBatch, ScoreFunctionGradient, UpdateConfig};
use crate::evaluators::Evaluator;
use crate::{BanditError, Result};
use std::cell::Cell;

/// Decodes the reference series verbatim; samples excluding another sample
/// come back empty. Every update bumps `version`.
#[derive(Debug, Default)]
pub struct StubEngine {
    pub version: u64,
    pub logprob: f64,
    pub greedy_calls: usize,
    pub sample_calls: usize,
    pub applied_weights: Vec<Vec<f64>>,
    pub applied_sample_counts: Vec<usize>,
    pub xent_steps: usize,
    pub mixer_steps: Vec<(Vec<f64>, Vec<f64>)>,
    pub updates_seen: Vec<UpdateConfig>,
    pub fail_greedy: bool,
}

impl StubEngine {
    pub fn new() -> Self {
        Self {
            logprob: -1.0,
            ..Default::default()
        }
    }

    fn decode(&self, decoder: &Decoder, batch: &Dataset, empty: bool) -> Result<SampleBatch> {
        let sentences: Vec<Sentence> = match batch.get_series(&decoder.data_id) {
            Ok(refs) if !empty => refs.to_vec(),
            _ => vec![Vec::new(); batch.len()],
        };
        let ids = decoder
            .vocabulary
            .sentences_to_tensor(&sentences, decoder.max_output_len);
        SampleBatch::from_single(ids, vec![self.logprob; batch.len()])
    }
}

impl Checkpointable for StubEngine {
    fn save_state(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.version)?)
    }

    fn load_state(&mut self, data: &[u8]) -> Result<()> {
        self.version = serde_json::from_slice(data)?;
        Ok(())
    }
}

impl PolicyEngine for StubEngine {
    fn greedy(&mut self, decoder: &Decoder, batch: &Dataset) -> Result<SampleBatch> {
        if self.fail_greedy {
            return Err(BanditError::Engine("greedy decode failed".to_string()));
        }
        self.greedy_calls += 1;
        self.decode(decoder, batch, false)
    }

    fn sample(
        &mut self,
        decoder: &Decoder,
        batch: &Dataset,
        _temperature: f64,
        exclude: Option<&SampleBatch>,
    ) -> Result<SampleBatch> {
        self.sample_calls += 1;
        self.decode(decoder, batch, exclude.is_some())
    }

    fn xent_losses(&mut self, _decoder: &Decoder, _batch: &Dataset) -> Result<(f64, f64)> {
        Ok((1.0, 2.0))
    }

    fn apply_score_function(
        &mut self,
        _decoder: &Decoder,
        _batch: &Dataset,
        gradient: &ScoreFunctionGradient<'_>,
        update: &UpdateConfig,
    ) -> Result<f64> {
        self.version += 1;
        self.applied_weights.push(gradient.weights.clone());
        self.applied_sample_counts.push(gradient.samples.len());
        self.updates_seen.push(*update);
        Ok(gradient.weights.iter().map(|w| w.abs()).sum())
    }

    fn apply_cross_entropy(
        &mut self,
        _decoder: &Decoder,
        _batch: &Dataset,
        update: &UpdateConfig,
    ) -> Result<f64> {
        self.version += 1;
        self.xent_steps += 1;
        self.updates_seen.push(*update);
        Ok(0.5)
    }

    fn apply_mixer(
        &mut self,
        _decoder: &Decoder,
        _batch: &Dataset,
        step: &MixerStep<'_>,
        _update: &UpdateConfig,
    ) -> Result<f64> {
        self.version += 1;
        self.mixer_steps
            .push((step.rewards.clone(), step.xent_weights.clone()));
        Ok(0.25)
    }
}

/// Returns the scripted scores in order, then repeats the last one.
pub struct ScriptedEvaluator {
    scores: Vec<f64>,
    next: Cell<usize>,
}

impl ScriptedEvaluator {
    pub fn new(scores: Vec<f64>) -> Self {
        Self {
            scores,
            next: Cell::new(0),
        }
    }
}

impl Evaluator for ScriptedEvaluator {
    fn name(&self) -> &str {
        "Scripted"
    }

    fn score(&self, _hypotheses: &[Sentence], _references: &[Sentence]) -> f64 {
        let i = self.next.get();
        self.next.set(i + 1);
        self.scores
            .get(i)
            .or_else(|| self.scores.last())
            .copied()
            .unwrap_or(0.0)
    }
}

pub fn tokens(s: &str) -> Sentence {
    s.split_whitespace().map(str::to_string).collect()
}

/// Copy-style dataset: `source` and `target` hold the same sentences.
pub fn toy_dataset(name: &str, n: usize) -> Dataset {
    let words = ["a", "b", "c", "d"];
    let sentences: Vec<Sentence> = (0..n)
        .map(|i| tokens(&format!("{} {}", words[i % 4], words[(i + 1) % 4])))
        .collect();
    Dataset::new(name)
        .with_series("source", sentences.clone())
        .and_then(|d| d.with_series("target", sentences))
        .unwrap()
}

pub fn toy_decoder() -> Decoder {
    Decoder::new(
        "decoder",
        "target",
        crate::data::Vocabulary::from_wordlist(["a", "b", "c", "d"]),
        4,
    )
}

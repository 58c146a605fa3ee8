//! Position-aligned unigram translation policy.

use banditmt::checkpoint::Checkpointable;
use banditmt::data::{Dataset, Vocabulary, START_TOKEN};
use banditmt::engine::{
    Decoder, MixerStep, PolicyEngine, SampleBatch, ScoreFunctionGradient, UpdateConfig,
};
use banditmt::{BanditError, Result};
use ndarray::{Array2, ArrayView1, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Draws per instance before accepting a sample equal to the excluded one.
const MAX_RESAMPLE: usize = 20;

/// A policy that emits, at output position `t`, a token conditioned only on
/// the source token at position `t` (`</s>` past the end of the source).
///
/// Parameters are a `source vocabulary x target vocabulary` logit table
/// trained with plain SGD. There is no decoder state, so the teacher-forced
/// and runtime cross-entropies coincide.
#[derive(Clone, Debug)]
pub struct UnigramPolicy {
    source: String,
    source_vocabulary: Vocabulary,
    logits: Array2<f64>,
    /// Target ids that are never emitted
    masked: Vec<usize>,
    learning_rate: f64,
    rng: ChaCha8Rng,
}

impl UnigramPolicy {
    /// Uniform policy reading the `source` series.
    pub fn new(
        source: impl Into<String>,
        source_vocabulary: Vocabulary,
        target_vocabulary: &Vocabulary,
    ) -> Self {
        let logits = Array2::zeros((source_vocabulary.len(), target_vocabulary.len()));
        let masked = vec![
            target_vocabulary.pad_id() as usize,
            target_vocabulary.token_to_id(START_TOKEN) as usize,
        ];
        Self {
            source: source.into(),
            source_vocabulary,
            logits,
            masked,
            learning_rate: 0.5,
            rng: ChaCha8Rng::seed_from_u64(0),
        }
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn logits(&self) -> &Array2<f64> {
        &self.logits
    }

    /// Logit row used at every output position, per instance.
    fn source_rows(&self, batch: &Dataset, max_len: usize) -> Result<Vec<Vec<usize>>> {
        let end = self.source_vocabulary.end_id() as usize;
        Ok(batch
            .get_series(&self.source)?
            .iter()
            .map(|sentence| {
                (0..max_len)
                    .map(|t| {
                        sentence
                            .get(t)
                            .map(|token| self.source_vocabulary.token_to_id(token) as usize)
                            .unwrap_or(end)
                    })
                    .collect()
            })
            .collect())
    }

    /// Masked softmax of one row at the given temperature.
    fn probabilities(&self, row: usize, temperature: f64) -> Vec<f64> {
        let logits = self.logits.row(row);
        let max = self.unmasked(logits).fold(f64::NEG_INFINITY, |m, (_, l)| m.max(l));
        let mut probs = vec![0.0; logits.len()];
        let mut total = 0.0;
        for (k, logit) in self.unmasked(logits) {
            probs[k] = ((logit - max) / temperature).exp();
            total += probs[k];
        }
        if total > 0.0 {
            probs.iter_mut().for_each(|p| *p /= total);
        }
        probs
    }

    fn unmasked<'a>(&'a self, logits: ArrayView1<'a, f64>) -> impl Iterator<Item = (usize, f64)> + 'a {
        logits
            .into_iter()
            .copied()
            .enumerate()
            .filter(move |(k, _)| !self.masked.contains(k))
    }

    /// Decode one instance. `None` temperature means argmax.
    fn decode_one(&mut self, rows: &[usize], end: u32, temperature: Option<f64>) -> (Vec<u32>, f64) {
        let mut ids = Vec::with_capacity(rows.len());
        let mut logprob = 0.0;
        for &row in rows {
            let probs = self.probabilities(row, 1.0);
            let token = match temperature {
                Some(t) if t > 0.0 => {
                    let tempered = self.probabilities(row, t);
                    draw(&tempered, self.rng.gen::<f64>())
                }
                _ => argmax(&probs),
            };
            logprob += probs[token].ln();
            ids.push(token as u32);
            if token as u32 == end {
                break;
            }
        }
        (ids, logprob)
    }

    fn decode(
        &mut self,
        decoder: &Decoder,
        batch: &Dataset,
        temperature: Option<f64>,
        exclude: Option<&SampleBatch>,
    ) -> Result<SampleBatch> {
        let max_len = decoder.max_output_len;
        let end = decoder.vocabulary.end_id();
        let pad = decoder.vocabulary.pad_id();
        let rows = self.source_rows(batch, max_len)?;

        let mut ids = Array2::from_elem((max_len, rows.len()), pad);
        let mut logprobs = Vec::with_capacity(rows.len());
        for (b, instance_rows) in rows.iter().enumerate() {
            let excluded: Option<Vec<u32>> = exclude.map(|e| {
                e.sample_ids(0)
                    .column(b)
                    .iter()
                    .copied()
                    .take_while(|&id| id != pad)
                    .collect()
            });

            let mut attempt = self.decode_one(instance_rows, end, temperature);
            let retries = if temperature.is_some() { MAX_RESAMPLE } else { 0 };
            for _ in 0..retries {
                if excluded.as_ref() != Some(&attempt.0) {
                    break;
                }
                attempt = self.decode_one(instance_rows, end, temperature);
            }

            for (t, id) in attempt.0.iter().enumerate() {
                ids[[t, b]] = *id;
            }
            logprobs.push(attempt.1);
        }
        SampleBatch::from_single(ids, logprobs)
    }

    /// `(row, token)` pairs of a decoded or reference column, up to and including `</s>`.
    fn steps(column: ArrayView1<'_, u32>, rows: &[usize], end: u32, pad: u32) -> Vec<(usize, usize)> {
        let mut steps = Vec::new();
        for (t, &id) in column.iter().enumerate() {
            if id == pad || t >= rows.len() {
                break;
            }
            steps.push((rows[t], id as usize));
            if id == end {
                break;
            }
        }
        steps
    }

    fn logprob(&self, steps: &[(usize, usize)]) -> f64 {
        steps
            .iter()
            .map(|&(row, token)| self.probabilities(row, 1.0)[token].ln())
            .sum()
    }

    /// `grad += scale * d log p(steps) / d logits`
    fn accumulate(&self, grad: &mut Array2<f64>, steps: &[(usize, usize)], scale: f64) {
        for &(row, token) in steps {
            let probs = self.probabilities(row, 1.0);
            let mut grad_row = grad.row_mut(row);
            for (k, p) in probs.iter().enumerate() {
                if self.masked.contains(&k) {
                    continue;
                }
                let indicator = if k == token { 1.0 } else { 0.0 };
                grad_row[k] += scale * (indicator - p);
            }
        }
    }

    /// Descend along `grad` plus regularization. Returns the norm before clipping.
    fn apply(&mut self, mut grad: Array2<f64>, update: &UpdateConfig) -> f64 {
        if update.l2_weight != 0.0 {
            grad.scaled_add(update.l2_weight, &self.logits);
        }
        if update.l1_weight != 0.0 {
            grad.scaled_add(update.l1_weight, &self.logits.mapv(f64::signum));
        }

        let norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
        if let Some(clip) = update.clip_norm {
            if norm > clip && norm > 0.0 {
                grad.mapv_inplace(|g| g * clip / norm);
            }
        }
        self.logits.scaled_add(-self.learning_rate, &grad);
        norm
    }

    fn reference_steps(&self, decoder: &Decoder, batch: &Dataset) -> Result<Vec<Vec<(usize, usize)>>> {
        let max_len = decoder.max_output_len;
        let vocabulary = &decoder.vocabulary;
        let references = batch.get_series(&decoder.data_id)?;
        let ids = vocabulary.sentences_to_tensor(references, max_len);
        let rows = self.source_rows(batch, max_len)?;
        Ok(rows
            .iter()
            .zip(ids.axis_iter(Axis(1)))
            .map(|(r, column)| Self::steps(column, r, vocabulary.end_id(), vocabulary.pad_id()))
            .collect())
    }
}

fn argmax(probs: &[f64]) -> usize {
    let mut best = 0;
    for (k, p) in probs.iter().enumerate() {
        if *p > probs[best] {
            best = k;
        }
    }
    best
}

/// Inverse-CDF draw for a uniform `u` in `[0, 1)`.
fn draw(probs: &[f64], u: f64) -> usize {
    let mut cumulative = 0.0;
    let mut last = 0;
    for (k, p) in probs.iter().enumerate() {
        if *p <= 0.0 {
            continue;
        }
        cumulative += p;
        last = k;
        if u < cumulative {
            return k;
        }
    }
    last
}

impl Checkpointable for UnigramPolicy {
    fn save_state(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.logits)?)
    }

    fn load_state(&mut self, data: &[u8]) -> Result<()> {
        let logits: Array2<f64> = serde_json::from_slice(data)?;
        if logits.dim() != self.logits.dim() {
            return Err(BanditError::ShapeMismatch {
                expected: self.logits.shape().to_vec(),
                actual: logits.shape().to_vec(),
            });
        }
        self.logits = logits;
        Ok(())
    }
}

impl PolicyEngine for UnigramPolicy {
    fn greedy(&mut self, decoder: &Decoder, batch: &Dataset) -> Result<SampleBatch> {
        self.decode(decoder, batch, None, None)
    }

    fn sample(
        &mut self,
        decoder: &Decoder,
        batch: &Dataset,
        temperature: f64,
        exclude: Option<&SampleBatch>,
    ) -> Result<SampleBatch> {
        self.decode(decoder, batch, Some(temperature), exclude)
    }

    fn xent_losses(&mut self, decoder: &Decoder, batch: &Dataset) -> Result<(f64, f64)> {
        let steps = self.reference_steps(decoder, batch)?;
        if steps.is_empty() {
            return Ok((0.0, 0.0));
        }
        let xent = -steps.iter().map(|s| self.logprob(s)).sum::<f64>() / steps.len() as f64;
        Ok((xent, xent))
    }

    fn apply_score_function(
        &mut self,
        decoder: &Decoder,
        batch: &Dataset,
        gradient: &ScoreFunctionGradient<'_>,
        update: &UpdateConfig,
    ) -> Result<f64> {
        let vocabulary = &decoder.vocabulary;
        let rows = self.source_rows(batch, decoder.max_output_len)?;
        if gradient.weights.len() != rows.len() {
            return Err(BanditError::ShapeMismatch {
                expected: vec![rows.len()],
                actual: vec![gradient.weights.len()],
            });
        }

        let mut grad = Array2::zeros(self.logits.dim());
        for samples in &gradient.samples {
            let ids = samples.sample_ids(0);
            for (b, column) in ids.axis_iter(Axis(1)).enumerate() {
                let steps = Self::steps(column, &rows[b], vocabulary.end_id(), vocabulary.pad_id());
                self.accumulate(&mut grad, &steps, gradient.weights[b]);
            }
        }
        Ok(self.apply(grad, update))
    }

    fn apply_cross_entropy(
        &mut self,
        decoder: &Decoder,
        batch: &Dataset,
        update: &UpdateConfig,
    ) -> Result<f64> {
        let steps = self.reference_steps(decoder, batch)?;
        if steps.is_empty() {
            return Ok(0.0);
        }
        let scale = 1.0 / steps.len() as f64;

        let mut grad = Array2::zeros(self.logits.dim());
        let mut loss = 0.0;
        for instance in &steps {
            loss -= self.logprob(instance) * scale;
            self.accumulate(&mut grad, instance, -scale);
        }
        self.apply(grad, update);
        Ok(loss)
    }

    fn apply_mixer(
        &mut self,
        decoder: &Decoder,
        batch: &Dataset,
        step: &MixerStep<'_>,
        update: &UpdateConfig,
    ) -> Result<f64> {
        let vocabulary = &decoder.vocabulary;
        let references = self.reference_steps(decoder, batch)?;
        let rows = self.source_rows(batch, decoder.max_output_len)?;
        if step.rewards.len() != rows.len() {
            return Err(BanditError::ShapeMismatch {
                expected: vec![rows.len()],
                actual: vec![step.rewards.len()],
            });
        }
        if references.is_empty() {
            return Ok(0.0);
        }
        let scale = 1.0 / references.len() as f64;

        let mut grad = Array2::zeros(self.logits.dim());
        let mut loss = 0.0;
        let decoded = step.decoded.sample_ids(0);
        for (b, column) in decoded.axis_iter(Axis(1)).enumerate() {
            let sampled = Self::steps(column, &rows[b], vocabulary.end_id(), vocabulary.pad_id());
            for t in 0..decoder.max_output_len {
                let xent = step.xent_weights.get(t).copied().unwrap_or(1.0) >= 0.5;
                let (chosen, weight) = if xent {
                    (references[b].get(t), 1.0)
                } else {
                    (sampled.get(t), step.rewards[b])
                };
                if let Some(&pair) = chosen {
                    let pair = [pair];
                    loss -= weight * self.logprob(&pair) * scale;
                    self.accumulate(&mut grad, &pair, -weight * scale);
                }
            }
        }
        self.apply(grad, update);
        Ok(loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy_task::{copy_dataset, toy_decoder, toy_vocabulary};

    fn policy() -> UnigramPolicy {
        let vocab = toy_vocabulary();
        UnigramPolicy::new("source", vocab.clone(), &vocab)
    }

    #[test]
    fn test_untrained_greedy_is_deterministic() {
        let decoder = toy_decoder();
        let batch = copy_dataset("b", 4, 1).unwrap();
        let mut policy = policy();
        let first = policy.greedy(&decoder, &batch).unwrap();
        let second = policy.greedy(&decoder, &batch).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.batch_size(), 4);
    }

    #[test]
    fn test_cross_entropy_learns_copy() {
        let decoder = toy_decoder();
        let batch = copy_dataset("b", 32, 7).unwrap();
        let mut policy = policy();

        let (before, _) = policy.xent_losses(&decoder, &batch).unwrap();
        for _ in 0..200 {
            policy
                .apply_cross_entropy(&decoder, &batch, &UpdateConfig::default())
                .unwrap();
        }
        let (after, runtime) = policy.xent_losses(&decoder, &batch).unwrap();
        assert!(after < before);
        assert_eq!(after, runtime);

        let greedy = policy.greedy(&decoder, &batch).unwrap();
        let decoded = decoder.vocabulary.vectors_to_sentences(greedy.sample_ids(0));
        assert_eq!(decoded, batch.get_series("target").unwrap());
    }

    #[test]
    fn test_positive_weight_lowers_probability() {
        let decoder = toy_decoder();
        let batch = copy_dataset("b", 8, 3).unwrap();
        let mut policy = policy().with_seed(11).with_learning_rate(0.01);

        let samples = policy.sample(&decoder, &batch, 1.0, None).unwrap();
        let before: f64 = samples.first_logprobs().iter().sum();
        // descending a positive weight makes the samples less likely
        let gradient = ScoreFunctionGradient {
            samples: vec![&samples],
            weights: vec![1.0; 8],
        };
        policy
            .apply_score_function(&decoder, &batch, &gradient, &UpdateConfig::default())
            .unwrap();

        let rows = policy.source_rows(&batch, decoder.max_output_len).unwrap();
        let vocab = &decoder.vocabulary;
        let after: f64 = samples
            .sample_ids(0)
            .axis_iter(Axis(1))
            .enumerate()
            .map(|(b, column)| {
                let steps = UnigramPolicy::steps(column, &rows[b], vocab.end_id(), vocab.pad_id());
                policy.logprob(&steps)
            })
            .sum();
        assert!(after < before);
    }

    #[test]
    fn test_weight_count_checked() {
        let decoder = toy_decoder();
        let batch = copy_dataset("b", 2, 3).unwrap();
        let mut policy = policy();
        let samples = policy.greedy(&decoder, &batch).unwrap();
        let gradient = ScoreFunctionGradient {
            samples: vec![&samples],
            weights: vec![1.0],
        };
        assert!(policy
            .apply_score_function(&decoder, &batch, &gradient, &UpdateConfig::default())
            .is_err());
    }

    #[test]
    fn test_clipping_reports_unclipped_norm() {
        let decoder = toy_decoder();
        let batch = copy_dataset("b", 4, 5).unwrap();
        let mut clipped = policy();
        let mut free = policy();
        let samples = free.greedy(&decoder, &batch).unwrap();
        let gradient = ScoreFunctionGradient {
            samples: vec![&samples],
            weights: vec![-1.0; 4],
        };
        let update = UpdateConfig {
            clip_norm: Some(1e-3),
            ..Default::default()
        };

        let norm_clipped = clipped
            .apply_score_function(&decoder, &batch, &gradient, &update)
            .unwrap();
        let norm_free = free
            .apply_score_function(&decoder, &batch, &gradient, &UpdateConfig::default())
            .unwrap();
        assert!((norm_clipped - norm_free).abs() < 1e-12);

        let moved = |p: &UnigramPolicy| p.logits().iter().map(|l| l * l).sum::<f64>().sqrt();
        assert!(moved(&clipped) < moved(&free));
        assert!(moved(&clipped) <= 0.5 * 1e-3 + 1e-12);
    }

    #[test]
    fn test_sample_avoids_excluded() {
        let decoder = toy_decoder();
        let batch = copy_dataset("b", 16, 9).unwrap();
        let mut policy = policy().with_seed(5);
        let first = policy.sample(&decoder, &batch, 1.0, None).unwrap();
        let second = policy.sample(&decoder, &batch, 1.0, Some(&first)).unwrap();
        assert_ne!(first.ids, second.ids);
        for b in 0..16 {
            assert_ne!(first.sample_ids(0).column(b), second.sample_ids(0).column(b));
        }
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let decoder = toy_decoder();
        let batch = copy_dataset("b", 8, 2).unwrap();
        let mut policy = policy();
        let saved = policy.save_state().unwrap();
        policy
            .apply_cross_entropy(&decoder, &batch, &UpdateConfig::default())
            .unwrap();
        assert!(policy.logits().iter().any(|l| *l != 0.0));

        policy.load_state(&saved).unwrap();
        assert!(policy.logits().iter().all(|l| *l == 0.0));

        let other = UnigramPolicy::new("source", toy_vocabulary(), &Vocabulary::default());
        assert!(matches!(
            other.clone().load_state(&saved),
            Err(BanditError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_mixer_step_runs() {
        let decoder = toy_decoder();
        let batch = copy_dataset("b", 4, 4).unwrap();
        let mut policy = policy();
        let decoded = policy.greedy(&decoder, &batch).unwrap();
        let step = MixerStep {
            decoded: &decoded,
            rewards: vec![0.5; 4],
            xent_weights: vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0],
        };
        let loss = policy
            .apply_mixer(&decoder, &batch, &step, &UpdateConfig::default())
            .unwrap();
        assert!(loss > 0.0);
        assert!(policy.logits().iter().any(|l| *l != 0.0));
    }
}

//! Contract with the tensor engine that owns the model.
//!
//! The engine executes the symbolic model and applies parameter updates; the
//! training code only sees token ids, per-sequence log-probabilities, and
//! the per-example weights that make up a score-function gradient.

use crate::checkpoint::Checkpointable;
use crate::data::{Dataset, Vocabulary};
use crate::{BanditError, Result};
use ndarray::{Array2, Array3, ArrayView2, Axis};

/// Handle to a decoder living inside the engine.
#[derive(Clone, Debug)]
pub struct Decoder {
    /// Name used in objective names and engine lookups
    pub name: String,
    /// Series holding the reference outputs
    pub data_id: String,
    /// Output vocabulary
    pub vocabulary: Vocabulary,
    /// Maximum number of decoded time steps
    pub max_output_len: usize,
}

impl Decoder {
    pub fn new(
        name: impl Into<String>,
        data_id: impl Into<String>,
        vocabulary: Vocabulary,
        max_output_len: usize,
    ) -> Self {
        Self {
            name: name.into(),
            data_id: data_id.into(),
            vocabulary,
            max_output_len,
        }
    }
}

/// Token ids and their sequence log-probabilities.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBatch {
    /// time x batch x samples
    pub ids: Array3<u32>,
    /// batch x samples, summed over time
    pub logprobs: Array2<f64>,
}

impl SampleBatch {
    pub fn new(ids: Array3<u32>, logprobs: Array2<f64>) -> Result<Self> {
        let (_, batch, samples) = ids.dim();
        if logprobs.dim() != (batch, samples) {
            return Err(BanditError::ShapeMismatch {
                expected: vec![batch, samples],
                actual: logprobs.shape().to_vec(),
            });
        }
        Ok(Self { ids, logprobs })
    }

    /// Wrap a single time x batch decode.
    pub fn from_single(ids: Array2<u32>, logprobs: Vec<f64>) -> Result<Self> {
        let batch = ids.ncols();
        let logprobs = Array2::from_shape_vec((logprobs.len(), 1), logprobs).map_err(|_| {
            BanditError::ShapeMismatch {
                expected: vec![batch, 1],
                actual: vec![],
            }
        })?;
        Self::new(ids.insert_axis(Axis(2)), logprobs)
    }

    pub fn batch_size(&self) -> usize {
        self.ids.dim().1
    }

    /// Ids of the `index`-th sample, time x batch.
    pub fn sample_ids(&self, index: usize) -> ArrayView2<'_, u32> {
        self.ids.index_axis(Axis(2), index)
    }

    /// Sequence log-probabilities of the first sample per instance.
    pub fn first_logprobs(&self) -> Vec<f64> {
        self.logprobs.column(0).to_vec()
    }
}

/// Score-function gradient handed to the engine.
///
/// The engine must apply `sum_i weights[i] * grad log p(sample_i)`, where
/// `log p(sample_i)` covers every sample listed in `samples` for instance
/// `i` (two for pairwise objectives). The weights are already divided by the
/// batch size and are constants for backpropagation.
#[derive(Clone, Debug)]
pub struct ScoreFunctionGradient<'a> {
    pub samples: Vec<&'a SampleBatch>,
    pub weights: Vec<f64>,
}

/// Regularization and clipping applied together with a gradient.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UpdateConfig {
    pub l1_weight: f64,
    pub l2_weight: f64,
    /// Clip the global gradient norm to this value
    pub clip_norm: Option<f64>,
}

/// One MIXER update: rewards for the greedy decodes and per-step mixing.
#[derive(Clone, Debug)]
pub struct MixerStep<'a> {
    pub decoded: &'a SampleBatch,
    pub rewards: Vec<f64>,
    /// One weight per decoder time step: 1.0 = cross-entropy, 0.0 = REINFORCE
    pub xent_weights: Vec<f64>,
}

/// The compute session: executes decoders and applies updates.
pub trait PolicyEngine: Checkpointable {
    /// Greedy (argmax) decode with one "sample" per instance.
    fn greedy(&mut self, decoder: &Decoder, batch: &Dataset) -> Result<SampleBatch>;

    /// Draw one stochastic sample per instance at `temperature`.
    ///
    /// When `exclude` is given, the engine avoids returning the same sequence
    /// as the excluded sample for that instance.
    fn sample(
        &mut self,
        decoder: &Decoder,
        batch: &Dataset,
        temperature: f64,
        exclude: Option<&SampleBatch>,
    ) -> Result<SampleBatch>;

    /// Cross-entropy of the references under teacher forcing and under the
    /// decoder's own (runtime) inputs.
    fn xent_losses(&mut self, decoder: &Decoder, batch: &Dataset) -> Result<(f64, f64)>;

    /// Apply a score-function gradient. Returns the gradient norm before clipping.
    fn apply_score_function(
        &mut self,
        decoder: &Decoder,
        batch: &Dataset,
        gradient: &ScoreFunctionGradient<'_>,
        update: &UpdateConfig,
    ) -> Result<f64>;

    /// One supervised cross-entropy step. Returns the loss.
    fn apply_cross_entropy(
        &mut self,
        decoder: &Decoder,
        batch: &Dataset,
        update: &UpdateConfig,
    ) -> Result<f64>;

    /// One MIXER step mixing cross-entropy and REINFORCE per time step.
    fn apply_mixer(
        &mut self,
        decoder: &Decoder,
        batch: &Dataset,
        step: &MixerStep<'_>,
        update: &UpdateConfig,
    ) -> Result<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_sample_batch_shape_check() {
        let ids = Array3::<u32>::zeros((3, 2, 1));
        assert!(SampleBatch::new(ids.clone(), Array2::zeros((2, 1))).is_ok());
        assert!(matches!(
            SampleBatch::new(ids, Array2::zeros((3, 1))),
            Err(BanditError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_from_single() {
        let batch = SampleBatch::from_single(array![[4u32, 5], [2, 2]], vec![-0.5, -1.0]).unwrap();
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.sample_ids(0), array![[4u32, 5], [2, 2]]);
        assert_eq!(batch.first_logprobs(), vec![-0.5, -1.0]);
    }
}

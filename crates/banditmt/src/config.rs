//! Run configuration.
//!
//! Everything a training run needs besides the engine itself, loadable from
//! a TOML file and validated before any training starts.

use crate::data::Dataset;
use crate::evaluators::{BeerWrapper, BleuEvaluator, BleuReferenceWrapper, EvalConfig, ExactMatch};
use crate::trainers::TemperatureSchedule;
use crate::{BanditError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Configuration shared by the supervised and the bandit training loops.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of passes over the training data
    pub epochs: usize,
    /// Instances per training batch
    pub batch_size: usize,
    /// Batch size for runners; defaults to `batch_size`
    pub runners_batch_size: Option<usize>,
    /// Evaluate on the training batch every this many steps
    pub logging_period: usize,
    /// Evaluate on the validation data every this many steps
    pub validation_period: usize,
    /// Number of best checkpoints to keep
    pub save_n_best: usize,
    /// Lower main metric is better
    pub minimize_metric: bool,
    /// Directory for checkpoints and the ring record
    pub output_dir: PathBuf,
    /// Validation examples printed after each validation
    pub num_examples: usize,
    /// Shuffle the training data every epoch
    pub shuffle: bool,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 64,
            runners_batch_size: None,
            logging_period: 20,
            validation_period: 500,
            save_n_best: 1,
            minimize_metric: false,
            output_dir: PathBuf::from("output"),
            num_examples: 15,
            shuffle: true,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_runners_batch_size(mut self, batch_size: usize) -> Self {
        self.runners_batch_size = Some(batch_size);
        self
    }

    /// Set logging and validation periods (in steps)
    pub fn with_periods(mut self, logging: usize, validation: usize) -> Self {
        self.logging_period = logging;
        self.validation_period = validation;
        self
    }

    pub fn with_save_n_best(mut self, n: usize) -> Self {
        self.save_n_best = n;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn minimize(mut self) -> Self {
        self.minimize_metric = true;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn without_shuffle(mut self) -> Self {
        self.shuffle = false;
        self
    }

    pub fn runners_batch_size(&self) -> usize {
        self.runners_batch_size.unwrap_or(self.batch_size)
    }

    /// Prefix of the checkpoint slot files.
    pub fn variables_prefix(&self) -> PathBuf {
        self.output_dir.join("variables.data")
    }

    /// Stable link to the best checkpoint.
    pub fn best_link(&self) -> PathBuf {
        self.output_dir.join("variables.data.best")
    }

    pub fn validate(&self) -> Result<()> {
        if self.logging_period == 0 || self.validation_period == 0 {
            return Err(BanditError::Config(
                "Logging and validation periods must be positive".to_string(),
            ));
        }
        if self.validation_period < self.logging_period {
            return Err(BanditError::Config(format!(
                "Validation period ({}) can't be smaller than logging period ({})",
                self.validation_period, self.logging_period
            )));
        }
        if self.save_n_best < 1 {
            return Err(BanditError::Config(
                "save_n_best must be greater than zero".to_string(),
            ));
        }
        if self.epochs < 1 {
            return Err(BanditError::Config("epochs must be at least 1".to_string()));
        }
        if self.batch_size < 1 || self.runners_batch_size == Some(0) {
            return Err(BanditError::Config("Batch sizes must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Which bandit objective to train with.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    ExploitOnly,
    #[default]
    ExpectedLoss,
    CrossEntropy,
    Pairwise,
    PairwiseXent,
}

impl ObjectiveKind {
    /// Objectives that draw two samples per instance.
    pub fn is_pairwise(self) -> bool {
        matches!(self, ObjectiveKind::Pairwise | ObjectiveKind::PairwiseXent)
    }
}

impl std::str::FromStr for ObjectiveKind {
    type Err = BanditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.replace('-', "_").as_str() {
            "exploit_only" => Ok(ObjectiveKind::ExploitOnly),
            "expected_loss" => Ok(ObjectiveKind::ExpectedLoss),
            "cross_entropy" => Ok(ObjectiveKind::CrossEntropy),
            "pairwise" => Ok(ObjectiveKind::Pairwise),
            "pairwise_xent" => Ok(ObjectiveKind::PairwiseXent),
            other => Err(BanditError::Config(format!("Unknown objective '{}'", other))),
        }
    }
}

/// Bandit trainer settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BanditConfig {
    pub objective: ObjectiveKind,
    /// T0 of the entropy regularizer
    pub initial_temperature: f64,
    pub schedule: TemperatureSchedule,
    /// Lower bound of the probability normalizer (cross-entropy variants)
    pub clip_prob: f64,
    /// Scale of the probability normalizer; variant default when unset
    pub factor: Option<f64>,
    pub l1_weight: f64,
    pub l2_weight: f64,
    pub clip_norm: Option<f64>,
    /// Pairwise reward is 1/0 instead of the score difference
    pub binary_feedback: bool,
    /// Subtract the running mean reward
    pub baseline: bool,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            objective: ObjectiveKind::default(),
            initial_temperature: 0.0,
            schedule: TemperatureSchedule::default(),
            clip_prob: 0.0,
            factor: None,
            l1_weight: 0.0,
            l2_weight: 0.0,
            clip_norm: None,
            binary_feedback: false,
            baseline: false,
        }
    }
}

impl BanditConfig {
    pub fn with_objective(mut self, objective: ObjectiveKind) -> Self {
        self.objective = objective;
        self
    }

    pub fn with_temperature(mut self, t0: f64) -> Self {
        self.initial_temperature = t0;
        self
    }

    pub fn with_baseline(mut self) -> Self {
        self.baseline = true;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.initial_temperature >= 0.0) {
            return Err(BanditError::Config(
                "initial_temperature must be non-negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.clip_prob) {
            return Err(BanditError::Config("clip_prob must lie in [0, 1]".to_string()));
        }
        if matches!(self.factor, Some(f) if !(f > 0.0)) {
            return Err(BanditError::Config("factor must be positive".to_string()));
        }
        if matches!(self.clip_norm, Some(c) if !(c > 0.0)) {
            return Err(BanditError::Config("clip_norm must be positive".to_string()));
        }
        Ok(())
    }
}

/// Decoder handle settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecoderConfig {
    pub name: String,
    /// Input series
    pub source: String,
    /// Reference series
    pub data_id: String,
    pub max_output_len: usize,
    pub vocabulary_size: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            name: "decoder".to_string(),
            source: "source".to_string(),
            data_id: "target".to_string(),
            max_output_len: 20,
            vocabulary_size: 10_000,
        }
    }
}

/// Evaluator entry in a run file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluatorSpec {
    Bleu {
        #[serde(default = "default_series")]
        generated: String,
        reference: Option<String>,
        #[serde(default = "default_max_order")]
        max_order: usize,
    },
    Exact {
        #[serde(default = "default_series")]
        generated: String,
        reference: Option<String>,
    },
    Beer {
        #[serde(default = "default_series")]
        generated: String,
        reference: Option<String>,
        wrapper: PathBuf,
    },
    BleuRef {
        #[serde(default = "default_series")]
        generated: String,
        reference: Option<String>,
        script: PathBuf,
        interpreter: Option<String>,
    },
}

fn default_series() -> String {
    "target".to_string()
}

fn default_max_order() -> usize {
    4
}

impl EvaluatorSpec {
    pub fn build(&self) -> EvalConfig {
        let (config, reference) = match self {
            EvaluatorSpec::Bleu {
                generated,
                reference,
                max_order,
            } => (
                EvalConfig::new(generated.clone(), Box::new(BleuEvaluator::new(*max_order))),
                reference,
            ),
            EvaluatorSpec::Exact {
                generated,
                reference,
            } => (EvalConfig::new(generated.clone(), Box::new(ExactMatch)), reference),
            EvaluatorSpec::Beer {
                generated,
                reference,
                wrapper,
            } => (
                EvalConfig::new(generated.clone(), Box::new(BeerWrapper::new(wrapper))),
                reference,
            ),
            EvaluatorSpec::BleuRef {
                generated,
                reference,
                script,
                interpreter,
            } => {
                let mut wrapper = BleuReferenceWrapper::new(script);
                if let Some(interpreter) = interpreter {
                    wrapper = wrapper.with_interpreter(interpreter.clone());
                }
                (EvalConfig::new(generated.clone(), Box::new(wrapper)), reference)
            }
        };
        match reference {
            Some(reference) => config.with_reference(reference.clone()),
            None => config,
        }
    }
}

/// Plain-text files making up one dataset.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DatasetSpec {
    pub name: String,
    /// series id -> file with one sentence per line
    pub files: BTreeMap<String, PathBuf>,
    /// series id -> file the outputs are written to
    pub outputs: BTreeMap<String, PathBuf>,
}

impl DatasetSpec {
    pub fn load(&self) -> Result<Dataset> {
        let files: Vec<(&str, &Path)> = self
            .files
            .iter()
            .map(|(id, path)| (id.as_str(), path.as_path()))
            .collect();
        let mut dataset = Dataset::from_files(&self.name, &files)?;
        for (id, path) in &self.outputs {
            dataset = dataset.with_output(id.clone(), path.clone());
        }
        Ok(dataset)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DataConfig {
    pub train: DatasetSpec,
    pub val: DatasetSpec,
    pub test: Vec<DatasetSpec>,
}

/// Complete run file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RunConfig {
    pub training: TrainingConfig,
    pub bandit: BanditConfig,
    pub decoder: DecoderConfig,
    /// When absent the caller supplies its own data
    pub data: Option<DataConfig>,
    pub evaluators: Vec<EvaluatorSpec>,
}

impl RunConfig {
    /// Load and validate a TOML run file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "Loaded run configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.training.validate()?;
        self.bandit.validate()?;
        if self.evaluators.is_empty() {
            return Err(BanditError::Config(
                "At least one evaluator must be configured".to_string(),
            ));
        }
        if self.decoder.max_output_len == 0 {
            return Err(BanditError::Config("max_output_len must be positive".to_string()));
        }
        Ok(())
    }

    pub fn eval_configs(&self) -> Vec<EvalConfig> {
        self.evaluators.iter().map(EvaluatorSpec::build).collect()
    }
}

//! # banditmt
//!
//! Training and evaluation orchestration for sequence-to-sequence
//! (machine translation) models trained with bandit feedback.
//!
//! ## Overview
//!
//! banditmt provides:
//! - A supervised `training_loop` and a two-phase (sample, then update)
//!   `bandit_training_loop` with periodic validation and an N-best
//!   checkpoint ring
//! - Five policy-gradient objectives (exploit-only, expected loss,
//!   cross-entropy, pairwise, pairwise cross-entropy) built on one
//!   score-function estimator with an annealed entropy regularizer
//! - Evaluators that wrap external scoring processes (BEER, reference BLEU)
//!   and pure in-process metrics
//! - Composable metric loggers (console, TensorBoard)
//!
//! The tensor engine itself is not part of this crate: models are reached
//! through the [`engine::PolicyEngine`] trait and saved/restored through
//! [`checkpoint::Checkpointable`].
//!
//! ## Features
//!
//! - `default` - Core functionality
//! - `tensorboard` - Enable the TensorBoard metric logger
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use banditmt::prelude::*;
//!
//! let config = RunConfig::from_file("run.toml")?;
//! let evaluators = vec![EvalConfig::new("target", Box::new(BleuEvaluator::default()))];
//! let report = bandit_training_loop(
//!     &mut engine, &mut trainer, &runners, &datasets, &evaluators,
//!     &config.training, &ConsoleLogger::new(), &Interrupt::new(),
//! )?;
//! ```

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod engine;
pub mod evaluators;
pub mod log;
pub mod runners;
pub mod trainers;
pub mod training;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::checkpoint::{CheckpointRing, Checkpointable};
    pub use crate::config::{BanditConfig, ObjectiveKind, RunConfig, TrainingConfig};
    pub use crate::data::{Dataset, Vocabulary};
    pub use crate::engine::{Decoder, PolicyEngine, SampleBatch};
    pub use crate::evaluators::{
        BeerWrapper, BleuEvaluator, BleuReferenceWrapper, EvalConfig, Evaluator, ExactMatch,
    };
    pub use crate::runners::{ExecutionResult, GreedyRunner, Runner, RunnerInfo, RunnerOutput};
    pub use crate::trainers::{
        BanditObjective, BanditSamples, BanditTrainer, CrossEntropyTrainer,
        GenericBanditTrainer, MixerTrainer, TemperatureSchedule, Trainer,
    };
    pub use crate::training::{
        bandit_training_loop, training_loop, Evaluation, Interrupt, TrainingDatasets,
        TrainingReport,
    };

    // Logging exports
    #[cfg(feature = "tensorboard")]
    pub use crate::log::TensorBoardLogger;
    pub use crate::log::{CompositeLogger, ConsoleLogger, MemoryLogger, MetricLogger, NoOpLogger};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum BanditError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset has no series named '{0}'")]
    MissingSeries(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Evaluator error: {0}")]
    Evaluator(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, BanditError>;

//! Training loops, validation, and final evaluation.
//!
//! Provides:
//! - `training_loop` for supervised trainers
//! - `bandit_training_loop` for sample-then-update trainers
//! - `run_on_dataset` / `evaluation` and the console reporting helpers
//! - `Interrupt` for stopping a run between batches

mod bandit;
mod driver;
mod evaluation;
mod interrupt;
mod rewards;
mod state;
mod supervised;

pub use bandit::bandit_training_loop;
pub use evaluation::{
    evaluation, example_lines, final_evaluation_lines, format_evaluation_line,
    log_continuous_evaluation, print_examples, print_final_evaluation, run_on_dataset,
    Evaluation, Outputs, Postprocess,
};
pub use interrupt::Interrupt;
pub use rewards::{compute_rewards, log_reward_diagnostics, RewardMode};
pub use state::TrainingState;
pub use supervised::training_loop;

use crate::data::Dataset;
use serde::Serialize;

/// The data a run trains, validates, and tests on.
pub struct TrainingDatasets {
    pub train: Dataset,
    pub val: Dataset,
    pub test: Vec<Dataset>,
    /// Applied to runner outputs on validation and test sets
    pub postprocess: Option<Box<Postprocess>>,
}

impl TrainingDatasets {
    pub fn new(train: Dataset, val: Dataset) -> Self {
        Self {
            train,
            val,
            test: Vec::new(),
            postprocess: None,
        }
    }

    pub fn with_test(mut self, test: Dataset) -> Self {
        self.test.push(test);
        self
    }

    pub fn with_postprocess(
        mut self,
        postprocess: impl Fn(&Dataset, Outputs) -> Outputs + 'static,
    ) -> Self {
        self.postprocess = Some(Box::new(postprocess));
        self
    }
}

impl std::fmt::Debug for TrainingDatasets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingDatasets")
            .field("train", &self.train.name())
            .field("val", &self.val.name())
            .field("test", &self.test.iter().map(Dataset::name).collect::<Vec<_>>())
            .field("postprocess", &self.postprocess.is_some())
            .finish()
    }
}

/// Summary of a finished (or interrupted) run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrainingReport {
    pub main_metric: String,
    /// Best validation score, if validation ever ran
    pub best_score: Option<f64>,
    pub best_epoch: usize,
    pub best_batch: usize,
    pub steps: usize,
    pub seen_instances: usize,
    pub interrupted: bool,
    /// Scores of the snapshots kept by the checkpoint ring
    pub retained_scores: Vec<f64>,
    pub test_evaluations: Vec<(String, Evaluation)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingConfig;
    use crate::data::{Dataset, Vocabulary};
    use crate::engine::Decoder;
    use crate::evaluators::{EvalConfig, ExactMatch};
    use crate::log::{MemoryLogger, NoOpLogger};
    use crate::runners::{ExecutionResult, GreedyRunner};
    use crate::testing::{tokens, toy_dataset, toy_decoder, ScriptedEvaluator, StubEngine};
    use crate::trainers::{
        BanditSamples, BanditTrainer, CrossEntropyTrainer, GenericBanditTrainer, Trainer,
    };
    use crate::{BanditError, Result};
    use std::path::Path;

    fn config_in(dir: &Path) -> TrainingConfig {
        TrainingConfig::default()
            .with_epochs(2)
            .with_batch_size(2)
            .with_periods(1, 2)
            .with_output_dir(dir)
            .without_shuffle()
    }

    fn datasets() -> TrainingDatasets {
        TrainingDatasets::new(toy_dataset("train", 4), toy_dataset("val", 3))
    }

    fn exact() -> Vec<EvalConfig> {
        vec![EvalConfig::new("target", Box::new(ExactMatch))]
    }

    /// Triggers the interrupt after a fixed number of steps.
    struct InterruptingTrainer {
        interrupt: Interrupt,
        after: usize,
        steps: usize,
    }

    impl Trainer<StubEngine> for InterruptingTrainer {
        fn train_step(
            &mut self,
            session: &mut StubEngine,
            _batch: &Dataset,
            _summaries: bool,
        ) -> Result<ExecutionResult> {
            session.version += 1;
            self.steps += 1;
            if self.steps == self.after {
                self.interrupt.trigger();
            }
            Ok(ExecutionResult::from_loss(0.0, Vec::new()))
        }
    }

    /// Keeps every reward vector handed to `update`.
    struct RecordingTrainer {
        inner: GenericBanditTrainer,
        rewards: Vec<Vec<f64>>,
    }

    impl RecordingTrainer {
        fn new(inner: GenericBanditTrainer) -> Self {
            Self {
                inner,
                rewards: Vec::new(),
            }
        }
    }

    impl BanditTrainer<StubEngine> for RecordingTrainer {
        fn sample(&mut self, session: &mut StubEngine, batch: &Dataset) -> Result<BanditSamples> {
            self.inner.sample(session, batch)
        }

        fn update(
            &mut self,
            session: &mut StubEngine,
            batch: &Dataset,
            rewards: &[f64],
            summaries: bool,
        ) -> Result<ExecutionResult> {
            self.rewards.push(rewards.to_vec());
            self.inner.update(session, batch, rewards, summaries)
        }

        fn is_pairwise(&self) -> bool {
            BanditTrainer::<StubEngine>::is_pairwise(&self.inner)
        }

        fn binary_feedback(&self) -> bool {
            BanditTrainer::<StubEngine>::binary_feedback(&self.inner)
        }

        fn vocabulary(&self) -> &Vocabulary {
            BanditTrainer::<StubEngine>::vocabulary(&self.inner)
        }

        fn data_id(&self) -> &str {
            BanditTrainer::<StubEngine>::data_id(&self.inner)
        }

        fn set_epoch(&mut self, epoch: usize) {
            BanditTrainer::<StubEngine>::set_epoch(&mut self.inner, epoch)
        }
    }

    /// `toy_dataset` plus an `alt` series that matches nothing the stub decodes.
    fn with_alt_series(dataset: Dataset) -> Dataset {
        let alt = vec![tokens("zzz"); dataset.len()];
        dataset.with_series("alt", alt).unwrap()
    }

    #[test]
    fn test_validation_shorter_than_logging_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path()).with_periods(20, 10);
        let mut engine = StubEngine::new();
        let mut trainer = CrossEntropyTrainer::new(toy_decoder());
        let runners = vec![GreedyRunner::new(toy_decoder())];

        let err = training_loop(
            &mut engine,
            &mut trainer,
            &runners,
            &datasets(),
            &exact(),
            &config,
            &NoOpLogger,
            &Interrupt::new(),
        )
        .unwrap_err();

        assert!(matches!(&err, BanditError::Config(msg) if msg.contains("Validation period")));
        assert_eq!(engine.xent_steps, 0);
        assert_eq!(engine.greedy_calls, 0);
        assert!(!config.variables_prefix().exists());
    }

    #[test]
    fn test_no_evaluators_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = StubEngine::new();
        let mut trainer = CrossEntropyTrainer::new(toy_decoder());
        let runners = vec![GreedyRunner::new(toy_decoder())];

        let result = training_loop(
            &mut engine,
            &mut trainer,
            &runners,
            &datasets(),
            &[],
            &config_in(dir.path()),
            &NoOpLogger,
            &Interrupt::new(),
        );
        assert!(matches!(result, Err(BanditError::Config(_))));
        assert_eq!(engine.xent_steps, 0);
    }

    #[test]
    fn test_supervised_loop_counts_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let mut engine = StubEngine::new();
        let mut trainer = CrossEntropyTrainer::new(toy_decoder());
        let runners = vec![GreedyRunner::new(toy_decoder())];
        let logger = MemoryLogger::new();

        let report = training_loop(
            &mut engine,
            &mut trainer,
            &runners,
            &datasets(),
            &exact(),
            &config,
            &logger,
            &Interrupt::new(),
        )
        .unwrap();

        // 2 epochs x 2 batches; validation fires at steps 1 and 3
        assert_eq!(engine.xent_steps, 4);
        assert_eq!(report.steps, 4);
        assert_eq!(report.seen_instances, 8);
        assert_eq!(report.main_metric, "target/Accuracy");
        assert_eq!(report.best_score, Some(1.0));
        assert_eq!((report.best_epoch, report.best_batch), (1, 0));
        assert!(!report.interrupted);
        assert_eq!(logger.series("val_target/Accuracy").len(), 2);
        assert_eq!(logger.series("train_target/Accuracy").len(), 4);
        assert!(config.best_link().exists());
    }

    #[test]
    fn test_interrupt_restores_best_and_tests() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("test.out");
        let config = config_in(dir.path()).with_periods(1, 1);
        let interrupt = Interrupt::new();
        let mut trainer = InterruptingTrainer {
            interrupt: interrupt.clone(),
            after: 3,
            steps: 0,
        };
        let mut engine = StubEngine::new();
        let runners = vec![GreedyRunner::new(toy_decoder())];
        // scores alternate between the training batch and validation;
        // validation peaks after the first batch
        let evaluators = vec![EvalConfig::new(
            "target",
            Box::new(ScriptedEvaluator::new(vec![0.1, 0.9, 0.1, 0.2, 0.1, 0.4])),
        )];
        let data = datasets().with_test(toy_dataset("test", 2).with_output("target", &out));

        let report = training_loop(
            &mut engine,
            &mut trainer,
            &runners,
            &data,
            &evaluators,
            &config,
            &NoOpLogger,
            &interrupt,
        )
        .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.steps, 3);
        assert_eq!(trainer.steps, 3);
        assert_eq!(report.best_score, Some(0.9));
        assert_eq!((report.best_epoch, report.best_batch), (1, 0));
        // the parameters saved at version 1 were restored before testing
        assert_eq!(engine.version, 1);
        assert_eq!(report.test_evaluations.len(), 1);
        assert_eq!(report.test_evaluations[0].0, "test");
        assert!(out.exists());
    }

    #[test]
    fn test_bandit_loop_validates_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path()).with_epochs(1).with_periods(10, 10);
        let mut engine = StubEngine::new();
        let mut trainer = GenericBanditTrainer::expected_loss(toy_decoder(), 1.0);
        let runners = vec![GreedyRunner::new(toy_decoder())];
        let logger = MemoryLogger::new();

        let report = bandit_training_loop(
            &mut engine,
            &mut trainer,
            &runners,
            &datasets(),
            &exact(),
            &config,
            &logger,
            &Interrupt::new(),
        )
        .unwrap();

        // initial validation at zero instances, no periodic ticks
        assert_eq!(logger.series("val_target/Accuracy"), vec![(0, 1.0)]);
        assert_eq!(engine.applied_weights.len(), 2);
        assert_eq!(report.best_score, None);
    }

    #[test]
    fn test_bandit_loop_rewards_reach_update() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path()).with_epochs(1).with_batch_size(4);
        let references = vec![tokens("a b"), tokens("c"), tokens("a"), tokens("d e")];
        let train = Dataset::new("train")
            .with_series("source", references.clone())
            .and_then(|d| d.with_series("target", references))
            .unwrap();
        let datasets = TrainingDatasets::new(train.clone(), train);
        let decoder = Decoder::new(
            "decoder",
            "target",
            Vocabulary::from_wordlist(["a", "b", "c", "d", "e"]),
            4,
        );
        let mut engine = StubEngine::new();
        engine.logprob = 0.0;
        let mut trainer =
            RecordingTrainer::new(GenericBanditTrainer::expected_loss(decoder.clone(), 0.0));
        let runners = vec![GreedyRunner::new(decoder)];

        bandit_training_loop(
            &mut engine,
            &mut trainer,
            &runners,
            &datasets,
            &exact(),
            &config,
            &NoOpLogger,
            &Interrupt::new(),
        )
        .unwrap();

        // the stub samples the references verbatim
        assert_eq!(trainer.rewards, vec![vec![1.0; 4]]);
        assert_eq!(engine.applied_weights, vec![vec![-0.25; 4]]);
    }

    #[test]
    fn test_bandit_rewards_use_evaluator_reference_series() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path()).with_epochs(1).with_batch_size(4);
        let datasets = TrainingDatasets::new(
            with_alt_series(toy_dataset("train", 4)),
            with_alt_series(toy_dataset("val", 3)),
        );
        let evaluators =
            vec![EvalConfig::new("target", Box::new(ExactMatch)).with_reference("alt")];
        let mut engine = StubEngine::new();
        engine.logprob = 0.0;
        let mut trainer =
            RecordingTrainer::new(GenericBanditTrainer::expected_loss(toy_decoder(), 0.0));
        let runners = vec![GreedyRunner::new(toy_decoder())];

        bandit_training_loop(
            &mut engine,
            &mut trainer,
            &runners,
            &datasets,
            &evaluators,
            &config,
            &NoOpLogger,
            &Interrupt::new(),
        )
        .unwrap();

        // samples equal `target`, but the evaluator compares against `alt`
        assert_eq!(trainer.rewards, vec![vec![0.0; 4]]);
        assert_eq!(engine.applied_weights, vec![vec![0.0; 4]]);
    }

    #[test]
    fn test_bandit_pairwise_binary_rewards() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path()).with_epochs(1).with_batch_size(4);
        let mut engine = StubEngine::new();
        let mut trainer =
            GenericBanditTrainer::pairwise(toy_decoder(), 0.0).with_binary_feedback(true);
        let runners = vec![GreedyRunner::new(toy_decoder())];

        bandit_training_loop(
            &mut engine,
            &mut trainer,
            &runners,
            &datasets(),
            &exact(),
            &config,
            &NoOpLogger,
            &Interrupt::new(),
        )
        .unwrap();

        // greedy matches the reference, the excluded sample is empty: r = 1, c = -(1 - r) = 0
        assert_eq!(engine.applied_sample_counts, vec![2]);
        assert_eq!(engine.applied_weights, vec![vec![0.0; 4]]);
    }

    #[test]
    fn test_report_serializes() {
        let report = TrainingReport {
            main_metric: "target/BLEU".to_string(),
            best_score: Some(12.5),
            best_epoch: 1,
            best_batch: 3,
            steps: 10,
            seen_instances: 40,
            interrupted: false,
            retained_scores: vec![12.5],
            test_evaluations: vec![],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["best_score"], 12.5);
        assert_eq!(json["main_metric"], "target/BLEU");
    }
}

//! Bookkeeping shared by the supervised and the bandit loop.

use super::evaluation::{
    evaluation, log_continuous_evaluation, print_examples, print_final_evaluation,
    run_on_dataset, Evaluation, Outputs,
};
use super::state::TrainingState;
use super::{TrainingDatasets, TrainingReport};
use crate::checkpoint::{CheckpointRing, Checkpointable};
use crate::config::TrainingConfig;
use crate::data::Dataset;
use crate::evaluators::{main_metric, EvalConfig};
use crate::log::MetricLogger;
use crate::runners::{ExecutionResult, Runner};
use crate::utils::{format_g4, seeded_rng};
use crate::{BanditError, Result};
use colored::Colorize;
use rand::rngs::StdRng;

/// Everything a loop needs between batches.
pub(crate) struct LoopDriver<'a, R, L: ?Sized> {
    runners: &'a [R],
    datasets: &'a TrainingDatasets,
    evaluators: &'a [EvalConfig],
    config: &'a TrainingConfig,
    logger: &'a L,
    main_metric: String,
    ring: CheckpointRing,
    rng: StdRng,
    pub state: TrainingState,
}

impl<'a, R, L: MetricLogger + ?Sized> LoopDriver<'a, R, L> {
    /// Check the configuration and save the initial parameters.
    ///
    /// Nothing touches the model when the configuration is invalid.
    pub fn setup<S>(
        session: &S,
        runners: &'a [R],
        datasets: &'a TrainingDatasets,
        evaluators: &'a [EvalConfig],
        config: &'a TrainingConfig,
        logger: &'a L,
    ) -> Result<Self>
    where
        S: Checkpointable + ?Sized,
        R: Runner<S>,
    {
        config.validate()?;
        let main_metric = main_metric(evaluators).ok_or_else(|| {
            BanditError::Config("At least one evaluator must be configured".to_string())
        })?;
        if runners.is_empty() {
            return Err(BanditError::Config(
                "At least one runner must be configured".to_string(),
            ));
        }

        let mut ring = CheckpointRing::new(
            config.variables_prefix(),
            config.best_link(),
            config.save_n_best,
            config.minimize_metric,
        )?;
        ring.initialize(session)?;

        tracing::info!(
            epochs = config.epochs,
            batch_size = config.batch_size,
            train = datasets.train.len(),
            val = datasets.val.len(),
            "Starting training"
        );

        Ok(Self {
            runners,
            datasets,
            evaluators,
            config,
            logger,
            main_metric,
            ring,
            rng: seeded_rng(config.seed),
            state: TrainingState::new(config.minimize_metric),
        })
    }

    pub fn epochs(&self) -> usize {
        self.config.epochs
    }

    pub fn logging_tick(&self) -> bool {
        self.state.is_tick(self.config.logging_period)
    }

    pub fn validation_tick(&self) -> bool {
        self.state.is_tick(self.config.validation_period)
    }

    /// Training batches of one epoch, reshuffled when configured.
    pub fn epoch_batches(&mut self, epoch: usize) -> Vec<Dataset> {
        tracing::info!("{}", format!("Epoch {} starts", epoch).red());
        if self.config.shuffle {
            let mut train = self.datasets.train.clone();
            train.shuffle(&mut self.rng);
            train.batch_dataset(self.config.batch_size)
        } else {
            self.datasets.train.batch_dataset(self.config.batch_size)
        }
    }

    pub fn mark_interrupted(&mut self) {
        tracing::info!("Training interrupted by user.");
        self.state.interrupted = true;
    }

    /// Evaluate the runners on the training batch just used for an update.
    pub fn train_evaluation<S>(
        &self,
        session: &mut S,
        batch: &Dataset,
        train_result: ExecutionResult,
        epoch: usize,
    ) -> Result<()>
    where
        S: ?Sized,
        R: Runner<S>,
    {
        let (mut results, outputs) = run_on_dataset(
            session,
            self.runners,
            batch,
            None,
            false,
            self.config.runners_batch_size(),
        )?;
        let eval = evaluation(self.evaluators, batch, self.runners, &results, &outputs);
        results.insert(0, train_result);
        log_continuous_evaluation(
            self.logger,
            &self.main_metric,
            &eval,
            self.state.seen_instances,
            epoch,
            self.config.epochs,
            &results,
            true,
        );
        Ok(())
    }

    fn run_validation<S>(
        &self,
        session: &mut S,
    ) -> Result<(Vec<ExecutionResult>, Evaluation, Outputs)>
    where
        S: ?Sized,
        R: Runner<S>,
    {
        let val = &self.datasets.val;
        let (results, outputs) = run_on_dataset(
            session,
            self.runners,
            val,
            self.datasets.postprocess.as_deref(),
            false,
            self.config.runners_batch_size(),
        )?;
        let eval = evaluation(self.evaluators, val, self.runners, &results, &outputs);
        Ok((results, eval, outputs))
    }

    /// Score the untrained model on the validation data.
    pub fn initial_validation<S>(&self, session: &mut S) -> Result<()>
    where
        S: ?Sized,
        R: Runner<S>,
    {
        let (results, eval, _) = self.run_validation(session)?;
        tracing::info!("Initial result on dev:");
        log_continuous_evaluation(
            self.logger,
            &self.main_metric,
            &eval,
            self.state.seen_instances,
            0,
            self.config.epochs,
            &results,
            false,
        );
        Ok(())
    }

    /// Validate, track the best score, and offer the parameters to the ring.
    pub fn validation<S>(&mut self, session: &mut S, epoch: usize, batch_n: usize) -> Result<()>
    where
        S: Checkpointable + ?Sized,
        R: Runner<S>,
    {
        let (results, eval, outputs) = self.run_validation(session)?;
        let score = eval.get(&self.main_metric).ok_or_else(|| {
            BanditError::Config(format!(
                "Main metric '{}' is missing from the validation results",
                self.main_metric
            ))
        })?;

        let is_best = self.state.record_validation(score, epoch, batch_n);
        self.ring.offer(&*session, score)?;

        tracing::info!(
            "{}",
            format!("Validation (epoch {}, batch number {}):", epoch, batch_n).blue()
        );
        log_continuous_evaluation(
            self.logger,
            &self.main_metric,
            &eval,
            self.state.seen_instances,
            epoch,
            self.config.epochs,
            &results,
            false,
        );

        let best = format_g4(self.state.best_score);
        let best = if is_best { best.bold().to_string() } else { best };
        tracing::info!(
            "best {} on validation: {} (in epoch {}, after batch number {})",
            self.main_metric,
            best,
            self.state.best_epoch,
            self.state.best_batch
        );

        print_examples(&self.datasets.val, &outputs, self.config.num_examples);
        Ok(())
    }

    /// Restore the best parameters, evaluate on the test sets, and close the logger.
    pub fn finish<S>(self, session: &mut S) -> Result<TrainingReport>
    where
        S: Checkpointable + ?Sized,
        R: Runner<S>,
    {
        tracing::info!(
            "Training finished. Maximum {} on validation data: {}, epoch {}",
            self.main_metric,
            format_g4(self.state.best_score),
            self.state.best_epoch
        );

        let mut test_evaluations = Vec::with_capacity(self.datasets.test.len());
        if !self.datasets.test.is_empty() && self.ring.has_best_link() {
            self.ring.restore_best(session)?;
        }
        for dataset in &self.datasets.test {
            let (results, outputs) = run_on_dataset(
                session,
                self.runners,
                dataset,
                self.datasets.postprocess.as_deref(),
                true,
                self.config.runners_batch_size(),
            )?;
            let eval = evaluation(self.evaluators, dataset, self.runners, &results, &outputs);
            print_final_evaluation(dataset.name(), &eval);
            test_evaluations.push((dataset.name().to_string(), eval));
        }

        tracing::info!("Finished.");
        self.logger.close();

        Ok(TrainingReport {
            main_metric: self.main_metric,
            best_score: self.state.best(),
            best_epoch: self.state.best_epoch,
            best_batch: self.state.best_batch,
            steps: self.state.step,
            seen_instances: self.state.seen_instances,
            interrupted: self.state.interrupted,
            retained_scores: self.ring.retained_scores(),
            test_evaluations,
        })
    }
}

//! Bandit training loop.

use super::driver::LoopDriver;
use super::rewards::{compute_rewards, log_reward_diagnostics, RewardMode};
use super::{Interrupt, TrainingDatasets, TrainingReport};
use crate::checkpoint::Checkpointable;
use crate::config::TrainingConfig;
use crate::evaluators::EvalConfig;
use crate::log::MetricLogger;
use crate::runners::Runner;
use crate::trainers::BanditTrainer;
use crate::Result;

/// Train from sentence-level feedback on sampled translations.
///
/// Every batch is sampled without updating the model, the samples are scored
/// against the references by the evaluators, and the resulting rewards are
/// passed to `update`. Validation, checkpointing, interruption, and the final
/// test phase behave as in [`super::training_loop`]; the untrained model is
/// additionally validated once before the first batch.
#[allow(clippy::too_many_arguments)]
pub fn bandit_training_loop<S, T, R, L>(
    session: &mut S,
    trainer: &mut T,
    runners: &[R],
    datasets: &TrainingDatasets,
    evaluators: &[EvalConfig],
    config: &TrainingConfig,
    logger: &L,
    interrupt: &Interrupt,
) -> Result<TrainingReport>
where
    S: Checkpointable + ?Sized,
    T: BanditTrainer<S> + ?Sized,
    R: Runner<S>,
    L: MetricLogger + ?Sized,
{
    let mut driver = LoopDriver::setup(&*session, runners, datasets, evaluators, config, logger)?;
    let mode = RewardMode::new(trainer.is_pairwise(), trainer.binary_feedback());

    driver.initial_validation(session)?;

    'epochs: for epoch in 1..=driver.epochs() {
        trainer.set_epoch(epoch - 1);

        for (batch_n, batch) in driver.epoch_batches(epoch).iter().enumerate() {
            if interrupt.is_triggered() {
                driver.mark_interrupted();
                break 'epochs;
            }
            driver.state.advance(batch.len());
            let logging_tick = driver.logging_tick();

            let samples = trainer.sample(session, batch)?;
            let sentences = samples.sentences(trainer.vocabulary());
            let rewards = compute_rewards(evaluators, batch, &sentences, mode)?;
            if logging_tick {
                let references = batch.get_series(trainer.data_id()).ok();
                log_reward_diagnostics(references, &sentences, &samples, &rewards);
            }

            let result = trainer.update(session, batch, &rewards, logging_tick)?;
            tracing::debug!("loss: {}", result.loss());

            if logging_tick {
                driver.train_evaluation(session, batch, result, epoch)?;
            }
            if driver.validation_tick() {
                driver.validation(session, epoch, batch_n)?;
            }
        }
    }

    driver.finish(session)
}

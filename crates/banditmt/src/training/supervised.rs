//! Supervised training loop.

use super::driver::LoopDriver;
use super::{Interrupt, TrainingDatasets, TrainingReport};
use crate::checkpoint::Checkpointable;
use crate::config::TrainingConfig;
use crate::evaluators::EvalConfig;
use crate::log::MetricLogger;
use crate::runners::Runner;
use crate::trainers::Trainer;
use crate::Result;

/// Train with one `train_step` per batch, validating periodically.
///
/// Logging ticks rerun the runners on the batch just trained on; validation
/// ticks score the validation set and offer the parameters to the
/// checkpoint ring. After the last epoch, or when `interrupt` is triggered,
/// the best parameters are restored and every test set is evaluated with
/// its outputs written out.
#[allow(clippy::too_many_arguments)]
pub fn training_loop<S, T, R, L>(
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
    T: Trainer<S> + ?Sized,
    R: Runner<S>,
    L: MetricLogger + ?Sized,
{
    let mut driver = LoopDriver::setup(&*session, runners, datasets, evaluators, config, logger)?;

    'epochs: for epoch in 1..=driver.epochs() {
        for (batch_n, batch) in driver.epoch_batches(epoch).iter().enumerate() {
            if interrupt.is_triggered() {
                driver.mark_interrupted();
                break 'epochs;
            }
            driver.state.advance(batch.len());

            if driver.logging_tick() {
                let result = trainer.train_step(session, batch, true)?;
                driver.train_evaluation(session, batch, result, epoch)?;
            } else {
                trainer.train_step(session, batch, false)?;
            }

            if driver.validation_tick() {
                driver.validation(session, epoch, batch_n)?;
            }
        }
    }

    driver.finish(session)
}

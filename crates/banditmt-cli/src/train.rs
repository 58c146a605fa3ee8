//! `banditmt train`: run a training loop on the toy policy.

use anyhow::{Context, Result};
use clap::ValueEnum;
use std::path::Path;
use std::sync::atomic::Ordering;

use banditmt::config::RunConfig;
use banditmt::data::Vocabulary;
use banditmt::engine::{Decoder, UpdateConfig};
use banditmt::log::{CompositeLogger, ConsoleLogger};
use banditmt::runners::GreedyRunner;
use banditmt::trainers::{CrossEntropyTrainer, GenericBanditTrainer, MixerTrainer, Trainer};
use banditmt::training::{bandit_training_loop, training_loop, Interrupt, TrainingDatasets};
use banditmt::utils::format_g4;
use banditmt_toy::{copy_dataset, UnigramPolicy};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Bandit,
    Supervised,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SupervisedKind {
    Xent,
    Mixer,
}

pub struct TrainOptions {
    pub mode: Mode,
    pub trainer: SupervisedKind,
    pub xent_calls: usize,
    pub moving_calls: usize,
    pub toy_size: usize,
}

pub fn run(config_path: &Path, options: &TrainOptions) -> Result<()> {
    let config = RunConfig::from_file(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let datasets = load_datasets(&config, options.toy_size)?;

    let max_size = config.decoder.vocabulary_size;
    let source_vocabulary =
        Vocabulary::from_datasets(&[&datasets.train], &[&config.decoder.source], max_size)?;
    let target_vocabulary =
        Vocabulary::from_datasets(&[&datasets.train], &[&config.decoder.data_id], max_size)?;
    tracing::info!(
        source = source_vocabulary.len(),
        target = target_vocabulary.len(),
        "Built vocabularies"
    );

    let decoder = Decoder::new(
        config.decoder.name.clone(),
        config.decoder.data_id.clone(),
        target_vocabulary.clone(),
        config.decoder.max_output_len,
    );
    let mut engine = UnigramPolicy::new(
        config.decoder.source.clone(),
        source_vocabulary,
        &target_vocabulary,
    )
    .with_seed(config.training.seed);

    let runners = vec![GreedyRunner::new(decoder.clone())];
    let evaluators = config.eval_configs();
    let logger = metric_logger(&config)?;
    let interrupt = Interrupt::new();
    install_sigint_handler(&interrupt)?;

    let report = match options.mode {
        Mode::Bandit => {
            let mut trainer = GenericBanditTrainer::from_config(decoder, &config.bandit)?;
            tracing::info!(objective = %trainer.objective().name, "Bandit training");
            bandit_training_loop(
                &mut engine,
                &mut trainer,
                &runners,
                &datasets,
                &evaluators,
                &config.training,
                &logger,
                &interrupt,
            )?
        }
        Mode::Supervised => {
            let update = UpdateConfig {
                l1_weight: config.bandit.l1_weight,
                l2_weight: config.bandit.l2_weight,
                clip_norm: config.bandit.clip_norm,
            };
            let mut trainer: Box<dyn Trainer<UnigramPolicy>> = match options.trainer {
                SupervisedKind::Xent => {
                    let mut trainer = CrossEntropyTrainer::new(decoder).with_l2(update.l2_weight);
                    if let Some(clip_norm) = update.clip_norm {
                        trainer = trainer.with_clip_norm(clip_norm);
                    }
                    Box::new(trainer)
                }
                SupervisedKind::Mixer => Box::new(
                    MixerTrainer::new(decoder, options.xent_calls, options.moving_calls)
                        .with_update(update),
                ),
            };
            tracing::info!(trainer = ?options.trainer, "Supervised training");
            training_loop(
                &mut engine,
                &mut *trainer,
                &runners,
                &datasets,
                &evaluators,
                &config.training,
                &logger,
                &interrupt,
            )?
        }
    };

    if let Some(best) = report.best_score {
        println!("Best {}: {}", report.main_metric, format_g4(best));
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn load_datasets(config: &RunConfig, toy_size: usize) -> Result<TrainingDatasets> {
    match &config.data {
        Some(data) => {
            let mut datasets = TrainingDatasets::new(data.train.load()?, data.val.load()?);
            for spec in &data.test {
                datasets = datasets.with_test(spec.load()?);
            }
            Ok(datasets)
        }
        None => {
            tracing::info!(size = toy_size, "No data configured, generating the copy task");
            let seed = config.training.seed;
            let held_out = (toy_size / 4).max(1);
            Ok(TrainingDatasets::new(
                copy_dataset("train", toy_size, seed)?,
                copy_dataset("val", held_out, seed + 1)?,
            )
            .with_test(copy_dataset("test", held_out, seed + 2)?))
        }
    }
}

#[cfg(feature = "tensorboard")]
fn metric_logger(config: &RunConfig) -> Result<CompositeLogger> {
    let mut logger = CompositeLogger::new(vec![Box::new(ConsoleLogger::new())]);
    logger.add(Box::new(banditmt::log::TensorBoardLogger::new(
        config.training.output_dir.join("tensorboard"),
    )?));
    Ok(logger)
}

#[cfg(not(feature = "tensorboard"))]
fn metric_logger(_config: &RunConfig) -> Result<CompositeLogger> {
    Ok(CompositeLogger::new(vec![Box::new(ConsoleLogger::new())]))
}

/// Ctrl-C stops training after the current step.
fn install_sigint_handler(interrupt: &Interrupt) -> Result<()> {
    let flag = interrupt.flag();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("Failed to install the Ctrl-C handler")?;
    tracing::debug!("Installed Ctrl-C handler");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigint_handler_installs_once() {
        let interrupt = Interrupt::new();
        install_sigint_handler(&interrupt).unwrap();
        assert!(!interrupt.is_triggered());

        let err = install_sigint_handler(&Interrupt::new()).unwrap_err();
        assert!(err.to_string().contains("Ctrl-C handler"));
    }
}

//! banditmt CLI
//!
//! Command-line interface for training, scoring, and inspecting run files.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use banditmt::config::RunConfig;
use banditmt::data::Dataset;
use banditmt::evaluators::{
    main_metric, BeerWrapper, BleuEvaluator, BleuReferenceWrapper, Evaluator, ExactMatch,
};
use banditmt::trainers::TemperatureSchedule;
use banditmt::utils::format_g4;

mod train;

#[derive(Parser)]
#[command(name = "banditmt")]
#[command(version, about = "banditmt - Bandit training for sequence-to-sequence models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the toy policy from a run file
    Train {
        /// TOML run file
        #[arg(long)]
        config: PathBuf,

        /// Training mode
        #[arg(long, value_enum, default_value = "bandit")]
        mode: train::Mode,

        /// Supervised trainer (supervised mode only)
        #[arg(long, value_enum, default_value = "xent")]
        trainer: train::SupervisedKind,

        /// MIXER: calls trained with cross-entropy only
        #[arg(long, default_value = "50")]
        xent_calls: usize,

        /// MIXER: calls before one more step switches to REINFORCE
        #[arg(long, default_value = "20")]
        moving_calls: usize,

        /// Generated copy-task instances when the run file has no data section
        #[arg(long, default_value = "200")]
        toy_size: usize,
    },

    /// Score a hypothesis file against a reference file
    Score {
        #[arg(long, value_enum)]
        evaluator: EvaluatorKind,

        /// Hypotheses, one tokenized sentence per line
        #[arg(long)]
        hyp: PathBuf,

        /// References, one tokenized sentence per line
        #[arg(long = "ref")]
        reference: PathBuf,

        /// BEER wrapper or reference BLEU script
        #[arg(long)]
        wrapper: Option<PathBuf>,

        /// Maximum n-gram order for BLEU
        #[arg(long, default_value = "4")]
        max_order: usize,
    },

    /// Print the annealed entropy temperature per epoch
    Schedule {
        /// Initial temperature
        #[arg(long)]
        t0: f64,

        /// Number of epochs
        #[arg(long, default_value = "10")]
        epochs: usize,

        /// Use T0 / (epoch + 1)^(1/3)
        #[arg(long)]
        cube_root: bool,
    },

    /// Validate a run file without training
    CheckConfig {
        /// TOML run file
        config: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EvaluatorKind {
    Bleu,
    Exact,
    Beer,
    BleuRef,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            config,
            mode,
            trainer,
            xent_calls,
            moving_calls,
            toy_size,
        } => {
            let options = train::TrainOptions {
                mode,
                trainer,
                xent_calls,
                moving_calls,
                toy_size,
            };
            train::run(&config, &options)?;
        }
        Commands::Score {
            evaluator,
            hyp,
            reference,
            wrapper,
            max_order,
        } => {
            score(evaluator, &hyp, &reference, wrapper, max_order)?;
        }
        Commands::Schedule {
            t0,
            epochs,
            cube_root,
        } => {
            schedule(t0, epochs, cube_root);
        }
        Commands::CheckConfig { config } => {
            check_config(&config)?;
        }
    }

    Ok(())
}

fn score(
    kind: EvaluatorKind,
    hyp: &Path,
    reference: &Path,
    wrapper: Option<PathBuf>,
    max_order: usize,
) -> Result<()> {
    let evaluator: Box<dyn Evaluator> = match (kind, wrapper) {
        (EvaluatorKind::Bleu, _) => Box::new(BleuEvaluator::new(max_order)),
        (EvaluatorKind::Exact, _) => Box::new(ExactMatch),
        (EvaluatorKind::Beer, Some(path)) => Box::new(BeerWrapper::new(path)),
        (EvaluatorKind::BleuRef, Some(path)) => Box::new(BleuReferenceWrapper::new(path)),
        (kind, None) => bail!("--wrapper is required for the {:?} evaluator", kind),
    };

    let data = Dataset::from_files("score", &[("hyp", hyp), ("ref", reference)])?;
    let value = evaluator.score(data.get_series("hyp")?, data.get_series("ref")?);
    tracing::info!(sentences = data.len(), "Scored hypotheses");
    println!("{}: {}", evaluator.name(), format_g4(value));
    Ok(())
}

fn schedule(t0: f64, epochs: usize, cube_root: bool) {
    let schedule = if cube_root {
        TemperatureSchedule::InverseCubeRoot
    } else {
        TemperatureSchedule::InverseLinear
    };
    println!("Temperature schedule ({:?}, T0 = {}):", schedule, t0);
    for epoch in 0..epochs {
        println!("  epoch {:>3}: {}", epoch + 1, format_g4(schedule.temperature(t0, epoch)));
    }
}

fn check_config(path: &Path) -> Result<()> {
    let config = RunConfig::from_file(path)?;
    let evaluators = config.eval_configs();
    let main = main_metric(&evaluators).unwrap_or_default();

    println!("Configuration OK: {}", path.display());
    println!("  objective:    {:?}", config.bandit.objective);
    println!("  epochs:       {}", config.training.epochs);
    println!("  batch size:   {}", config.training.batch_size);
    println!(
        "  periods:      logging {}, validation {}",
        config.training.logging_period, config.training.validation_period
    );
    println!("  main metric:  {}", main);
    if config.data.is_none() {
        println!("  data:         toy copy task");
    }
    Ok(())
}

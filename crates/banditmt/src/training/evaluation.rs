//! Running the model on datasets, scoring the outputs, and reporting.

use crate::data::Dataset;
use crate::evaluators::EvalConfig;
use crate::log::MetricLogger;
use crate::runners::{ExecutionResult, Runner, RunnerInfo, RunnerOutput};
use crate::utils::format_g4;
use crate::Result;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;

/// Runner outputs keyed by series name.
pub type Outputs = BTreeMap<String, RunnerOutput>;

/// Rewrites outputs before they are written and evaluated.
pub type Postprocess = dyn Fn(&Dataset, Outputs) -> Outputs;

/// Column width of the names in the final evaluation.
const FINAL_NAME_WIDTH: usize = 22;

/// Evaluation results in insertion order: losses first, then metrics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation(Vec<(String, f64)>);

impl Evaluation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite, keeping the original position.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries with `"{prefix}_"` prepended, for the metric logger.
    pub fn prefixed(&self, prefix: &str) -> Vec<(String, f64)> {
        self.0
            .iter()
            .map(|(n, v)| (format!("{}_{}", prefix, n), *v))
            .collect()
    }
}

/// Apply the runners to a dataset and optionally write their outputs.
///
/// Losses are only computed when the dataset holds every runner's
/// reference series.
pub fn run_on_dataset<S, R>(
    session: &mut S,
    runners: &[R],
    dataset: &Dataset,
    postprocess: Option<&Postprocess>,
    write_out: bool,
    batch_size: usize,
) -> Result<(Vec<ExecutionResult>, Outputs)>
where
    S: ?Sized,
    R: Runner<S>,
{
    let contains_targets = runners
        .iter()
        .all(|runner| dataset.has_series(runner.decoder_data_id()));

    let mut results = Vec::with_capacity(runners.len());
    let mut raw = Outputs::new();
    for runner in runners {
        let mut result = runner.run(session, dataset, contains_targets, batch_size)?;
        raw.insert(
            runner.output_series().to_string(),
            std::mem::take(&mut result.outputs),
        );
        results.push(result);
    }

    let outputs = match postprocess {
        Some(postprocess) => postprocess(dataset, raw),
        None => raw,
    };

    if write_out {
        write_outputs(dataset, &outputs)?;
    }

    Ok((results, outputs))
}

fn write_outputs(dataset: &Dataset, outputs: &Outputs) -> Result<()> {
    for (series, data) in outputs {
        let Some(path) = dataset.series_outputs.get(series) else {
            tracing::warn!(
                dataset = dataset.name(),
                series = %series,
                "There is no output file for dataset"
            );
            continue;
        };
        match data {
            RunnerOutput::Numeric(array) => {
                let rows: Vec<Vec<f64>> = array.outer_iter().map(|row| row.to_vec()).collect();
                fs::write(path, serde_json::to_vec(&rows)?)?;
                tracing::info!(path = %path.display(), "Result saved as JSON array");
            }
            RunnerOutput::Sentences(sentences) => {
                let mut file = fs::File::create(path)?;
                for sentence in sentences {
                    writeln!(file, "{}", sentence.join(" "))?;
                }
                tracing::info!(path = %path.display(), "Result saved as plain text");
            }
            RunnerOutput::Empty => {}
        }
    }
    Ok(())
}

/// Collect runner losses and evaluator scores.
///
/// Losses are keyed `"{series}/{loss}"`. A metric is skipped when the
/// dataset lacks its reference series or no runner produced its series.
pub fn evaluation<R: RunnerInfo>(
    evaluators: &[EvalConfig],
    dataset: &Dataset,
    runners: &[R],
    results: &[ExecutionResult],
    outputs: &Outputs,
) -> Evaluation {
    let mut eval = Evaluation::new();

    for (runner, result) in runners.iter().zip(results) {
        for (name, value) in runner.loss_names().iter().zip(&result.losses) {
            eval.insert(format!("{}/{}", runner.output_series(), name), *value);
        }
    }

    for config in evaluators {
        let Ok(references) = dataset.get_series(config.reference()) else {
            continue;
        };
        let Some(hypotheses) = outputs.get(&config.generated).and_then(RunnerOutput::sentences)
        else {
            continue;
        };
        eval.insert(
            config.metric_name(),
            config.evaluator.score(hypotheses, references),
        );
    }

    eval
}

/// One line with every value, the main metric last and in bold.
pub fn format_evaluation_line(eval: &Evaluation, main_metric: &str) -> String {
    let mut line = eval
        .iter()
        .filter(|(name, _)| *name != main_metric)
        .map(|(name, value)| format!("{}: {}", name, format_g4(value)))
        .collect::<Vec<_>>()
        .join("    ");

    if let Some(value) = eval.get(main_metric) {
        let main = format!("    {}: {}", main_metric, format_g4(value));
        line.push_str(&main.bold().to_string());
    }
    line
}

/// Lines of the final evaluation on a test dataset.
pub fn final_evaluation_lines(name: &str, eval: &Evaluation) -> Vec<String> {
    let mut lines = vec![format!("Evaluating model on \"{}\"", name)];
    for (metric, value) in eval.iter() {
        let padding = " ".repeat(FINAL_NAME_WIDTH.saturating_sub(metric.len()));
        lines.push(format!("... {}:{} {}", metric, padding, format_g4(value)));
    }
    lines
}

pub fn print_final_evaluation(name: &str, eval: &Evaluation) {
    for line in final_evaluation_lines(name, eval) {
        tracing::info!("{}", line);
    }
}

/// Lines showing up to `num_examples` instances: inputs, outputs, references.
pub fn example_lines(dataset: &Dataset, outputs: &Outputs, num_examples: usize) -> Vec<String> {
    let mut lines = vec!["Examples:".bold().to_string()];

    let sources: Vec<(&str, &[crate::data::Sentence])> = dataset
        .series_ids()
        .filter(|id| !outputs.contains_key(*id))
        .filter_map(|id| dataset.get_series(id).ok().map(|data| (id, data)))
        .collect();

    for i in 0..dataset.len().min(num_examples) {
        lines.push(format!("  [{}]", i + 1).magenta().bold().to_string());

        for (id, data) in &sources {
            if let Some(sentence) = data.get(i) {
                lines.push(format!("  {}: {}", id.yellow(), sentence.join(" ")));
            }
        }

        for (id, output) in outputs {
            lines.push(format!("  {}: {}", id.magenta(), output.item_to_string(i)));
            if let Ok(references) = dataset.get_series(id) {
                if let Some(reference) = references.get(i) {
                    let label = format!("{} (ref)", id);
                    lines.push(format!("  {}: {}", label.red(), reference.join(" ")));
                }
            }
        }
    }
    lines
}

pub fn print_examples(dataset: &Dataset, outputs: &Outputs, num_examples: usize) {
    for line in example_lines(dataset, outputs, num_examples) {
        tracing::info!("{}", line);
    }
}

/// Log an evaluation line and send the values to the metric logger.
///
/// Scalars are named `"{train|val}_{name}"` and stepped by seen instances;
/// runner and trainer summaries are forwarded under their own names.
#[allow(clippy::too_many_arguments)]
pub fn log_continuous_evaluation<L: MetricLogger + ?Sized>(
    logger: &L,
    main_metric: &str,
    eval: &Evaluation,
    seen_instances: usize,
    epoch: usize,
    max_epochs: usize,
    results: &[ExecutionResult],
    train: bool,
) {
    let prefix = if train { "train" } else { "val" };
    let line = format!(
        "Epoch {}/{}  Instances {}  {}",
        epoch,
        max_epochs,
        seen_instances,
        format_evaluation_line(eval, main_metric)
    );
    if train {
        tracing::info!("{}", line.yellow());
    } else {
        tracing::info!("{}", line.blue());
    }

    let step = seen_instances as u64;
    for result in results {
        logger.log_metrics(&result.summaries, step);
    }
    logger.log_metrics(&eval.prefixed(prefix), step);
}

//! Console logging backend.

use super::MetricLogger;

/// Writes scalars through tracing at debug level; the training loop already
/// prints a formatted line per evaluation at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleLogger;

impl ConsoleLogger {
    pub fn new() -> Self {
        Self
    }
}

impl MetricLogger for ConsoleLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        tracing::debug!("Instances {}: {} = {:.4}", step, name, value);
    }

    fn log_metrics(&self, metrics: &[(String, f64)], step: u64) {
        if metrics.is_empty() {
            return;
        }
        let fields: Vec<String> = metrics
            .iter()
            .map(|(name, value)| format!("{}={:.4}", name, value))
            .collect();
        tracing::debug!("Instances {}: {}", step, fields.join(", "));
    }
}

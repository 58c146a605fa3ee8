//! TensorBoard event files for the dashboard.

use super::MetricLogger;
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tensorboard_rs::summary_writer::SummaryWriter;

/// Dashboard backend. Steps are the number of training instances seen, so
/// runs with different batch sizes line up.
pub struct TensorBoardLogger {
    log_dir: PathBuf,
    writer: Mutex<SummaryWriter>,
}

impl TensorBoardLogger {
    /// Create `log_dir` if needed and open a new event file in it.
    pub fn new(log_dir: impl AsRef<Path>) -> Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&log_dir)?;
        tracing::info!(dir = %log_dir.display(), "Writing TensorBoard events");
        Ok(Self {
            writer: Mutex::new(SummaryWriter::new(&log_dir)),
            log_dir,
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

impl MetricLogger for TensorBoardLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        if let Ok(mut writer) = self.writer.lock() {
            writer.add_scalar(name, value as f32, step as usize);
        }
    }

    /// One evaluation's scalars are flushed together.
    fn log_metrics(&self, metrics: &[(String, f64)], step: u64) {
        let Ok(mut writer) = self.writer.lock() else {
            return;
        };
        for (name, value) in metrics.iter().filter(|(_, v)| v.is_finite()) {
            writer.add_scalar(name, *value as f32, step as usize);
        }
        writer.flush();
    }

    fn close(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            writer.flush();
        }
    }
}

//! Bookkeeping of a training run.

use crate::checkpoint::is_better;

/// Counters and best-score tracking shared by both training loops.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingState {
    /// Batches processed so far
    pub step: usize,
    pub seen_instances: usize,
    pub best_score: f64,
    pub best_epoch: usize,
    pub best_batch: usize,
    pub validations: usize,
    pub interrupted: bool,
    minimize: bool,
}

impl TrainingState {
    pub fn new(minimize: bool) -> Self {
        Self {
            step: 0,
            seen_instances: 0,
            best_score: if minimize { f64::INFINITY } else { f64::NEG_INFINITY },
            best_epoch: 0,
            best_batch: 0,
            validations: 0,
            interrupted: false,
            minimize,
        }
    }

    /// Count a batch of `size` instances.
    pub fn advance(&mut self, size: usize) {
        self.step += 1;
        self.seen_instances += size;
    }

    /// Periodic events fire when `step % period == period - 1`.
    pub fn is_tick(&self, period: usize) -> bool {
        period > 0 && self.step % period == period - 1
    }

    /// Record a validation score. Returns whether it is the best so far.
    pub fn record_validation(&mut self, score: f64, epoch: usize, batch: usize) -> bool {
        self.validations += 1;
        if is_better(score, self.best_score, self.minimize) {
            self.best_score = score;
            self.best_epoch = epoch;
            self.best_batch = batch;
        }
        score == self.best_score
    }

    /// Best validation score, once one has been recorded.
    pub fn best(&self) -> Option<f64> {
        self.best_score.is_finite().then_some(self.best_score)
    }
}

//! Checkpoint trait and ring metadata.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Trait for models whose parameters can be checkpointed.
///
/// # Example
///
/// ```ignore
/// impl Checkpointable for MyEngine {
///     fn save_state(&self) -> Result<Vec<u8>> {
///         Ok(serde_json::to_vec(&self.params)?)
///     }
///
///     fn load_state(&mut self, data: &[u8]) -> Result<()> {
///         self.params = serde_json::from_slice(data)?;
///         Ok(())
///     }
/// }
/// ```
pub trait Checkpointable {
    /// Serialize the parameters to bytes.
    fn save_state(&self) -> Result<Vec<u8>>;

    /// Restore the parameters from bytes.
    fn load_state(&mut self, data: &[u8]) -> Result<()>;
}

/// One retained snapshot.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SlotRecord {
    pub path: PathBuf,
    /// `None` while the slot still holds the initial (unscored) parameters
    pub score: Option<f64>,
}

/// Snapshot of the ring written as `<prefix>.scores.json`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RingRecord {
    pub minimize: bool,
    pub best_link: PathBuf,
    pub best_index: Option<usize>,
    pub slots: Vec<SlotRecord>,
    pub version: String,
}

impl RingRecord {
    /// Scores of the slots that hold a validated snapshot.
    pub fn retained_scores(&self) -> Vec<f64> {
        self.slots.iter().filter_map(|s| s.score).collect()
    }
}

//! Checkpointing of the best validation models.
//!
//! Provides:
//! - `Checkpointable` trait for models that can be saved/restored
//! - `CheckpointRing` keeping the N best-scoring snapshots and a stable "best" link
//! - `RingRecord` metadata written next to the snapshots

mod ring;
mod state;

pub use ring::{is_better, CheckpointRing};
pub use state::{Checkpointable, RingRecord, SlotRecord};

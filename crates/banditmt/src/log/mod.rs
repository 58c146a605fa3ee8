//! Scalar metric streams.
//!
//! Provides:
//! - `MetricLogger` trait for composable backends
//! - `ConsoleLogger` writing through tracing
//! - `MemoryLogger` keeping every record for later inspection
//! - `TensorBoardLogger` for the dashboard (feature `tensorboard`)
//! - `CompositeLogger` for fanning out to several backends

mod console;
mod logger;
#[cfg(feature = "tensorboard")]
mod tensorboard;

pub use console::ConsoleLogger;
pub use logger::{CompositeLogger, MemoryLogger, MetricLogger, MetricRecord, NoOpLogger};
#[cfg(feature = "tensorboard")]
pub use tensorboard::TensorBoardLogger;

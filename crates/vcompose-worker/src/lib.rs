//! Composition worker.
//!
//! This crate provides:
//! - The composition orchestrator and its fallback state machine
//! - A bounded concurrent job executor with per-job cancellation
//! - Configuration, structured job logging, progress and metrics

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod progress;

pub use config::{TimeoutPolicy, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::{CancelHandle, JobExecutor, JobHandle};
pub use logging::JobLogger;
pub use orchestrator::CompositionOrchestrator;
pub use progress::ProgressSink;

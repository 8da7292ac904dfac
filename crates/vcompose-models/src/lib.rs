//! Shared data models for the VCompose pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Composition jobs and scene assets
//! - Encoding parameters and quality preset resolution
//! - Chapter markers
//! - Validation results and the encoder attempt audit log
//! - Progress events and composition results

pub mod attempt;
pub mod chapter;
pub mod encoding;
pub mod job;
pub mod preset;
pub mod progress;
pub mod result;
pub mod scene;
pub mod validation;

// Re-export common types
pub use attempt::{AttemptLog, AttemptOutcome, AttemptRecord, EncoderTier};
pub use chapter::ChapterMarker;
pub use encoding::{
    probe_codec_name, EncodingParams, QualityTier, Resolution, SpeedPreset, NARRATION_CHANNELS,
    NARRATION_SAMPLE_RATE,
};
pub use job::{CompositionJob, JobId, JobMetadata, QualityRequest};
pub use preset::{resolve, PresetError};
pub use progress::{JobStage, ProgressUpdate};
pub use result::{ArtifactKind, CompositionResult, CompositionStatus};
pub use scene::{SceneAsset, Transition};
pub use validation::{ExpectedOutput, ValidationResult};

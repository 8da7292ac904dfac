//! Composition results returned to callers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::attempt::{AttemptRecord, EncoderTier};
use crate::chapter::ChapterMarker;
use crate::encoding::EncodingParams;
use crate::job::JobId;
use crate::validation::ValidationResult;

/// Terminal status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CompositionStatus {
    /// A tier produced a file passing every hard check
    Success,
    /// Every tier failed in both cycles; a fallback artifact was emitted
    Degraded,
    /// The caller cancelled the job
    Cancelled,
}

impl CompositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompositionStatus::Success => "success",
            CompositionStatus::Degraded => "degraded",
            CompositionStatus::Cancelled => "cancelled",
        }
    }
}

/// What was written to `output_path`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// File passed validation
    Validated,
    /// Encoder output kept despite failing validation
    UnvalidatedEncode,
    /// JSON failure report; no encoder produced any output
    FailureReport,
    /// Nothing was written
    None,
}

/// Structured result of one composition job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompositionResult {
    pub job_id: JobId,
    pub status: CompositionStatus,
    pub artifact: ArtifactKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Tier whose output was emitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<EncoderTier>,
    /// Parameters the emitted file was encoded with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<EncodingParams>,
    /// Validation of the emitted file (default when none was validated)
    pub validation: ValidationResult,
    pub attempts: Vec<AttemptRecord>,
    #[serde(default)]
    pub chapters: Vec<ChapterMarker>,
    /// Total timeline duration after audio sync
    pub effective_duration: f64,
    /// Non-blocking issues (audio sync, soft validation)
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Failure explanation for degraded and cancelled results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl CompositionResult {
    pub fn is_success(&self) -> bool {
        self.status == CompositionStatus::Success
    }

    pub fn is_degraded(&self) -> bool {
        self.status == CompositionStatus::Degraded
    }
}

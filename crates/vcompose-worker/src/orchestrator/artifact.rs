//! Fallback artifacts for exhausted jobs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use vcompose_media::fs_utils::{ensure_parent_dir, file_size};
use vcompose_media::MediaResult;
use vcompose_models::{AttemptRecord, ChapterMarker, EncoderTier, EncodingParams, JobId, ValidationResult};

/// A finished encode kept in the job dir until the job ends.
#[derive(Debug, Clone)]
pub struct EncodedOutput {
    pub tier: EncoderTier,
    pub cycle: u8,
    pub path: PathBuf,
    pub params: EncodingParams,
    pub validation: ValidationResult,
}

/// Most recent non-empty tertiary output, else the most recent non-empty
/// output of any tier.
pub async fn pick_fallback(outputs: &[EncodedOutput]) -> Option<&EncodedOutput> {
    for output in outputs.iter().rev().filter(|o| o.tier == EncoderTier::Tertiary) {
        if file_size(&output.path).await > 0 {
            return Some(output);
        }
    }
    for output in outputs.iter().rev() {
        if file_size(&output.path).await > 0 {
            return Some(output);
        }
    }
    None
}

/// Written in place of a video when no encoder produced any output.
#[derive(Debug, Serialize)]
pub struct FailureReport<'a> {
    pub job_id: &'a JobId,
    pub status: &'static str,
    pub reason: &'a str,
    pub generated_at: DateTime<Utc>,
    pub attempts: &'a [AttemptRecord],
    pub chapters: &'a [ChapterMarker],
}

pub async fn write_failure_report(path: &Path, report: &FailureReport<'_>) -> MediaResult<()> {
    ensure_parent_dir(path).await?;
    let body = serde_json::to_vec_pretty(report)?;
    tokio::fs::write(path, body).await?;
    Ok(())
}

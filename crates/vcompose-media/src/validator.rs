//! Output validation.
//!
//! Every check is scored and reported; nothing short-circuits. Format, codec,
//! audio and size failures are hard. Duration off by more than one frame is
//! a failure too, but is only hard beyond the looser soft tolerance.

use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use vcompose_models::{ExpectedOutput, ValidationResult};

use crate::fs_utils::file_size;
use crate::probe::{MediaInfo, MediaProbe};

/// Clamp for float noise when comparing against one frame interval.
const DURATION_EPSILON: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatorConfig {
    /// Smallest acceptable output, in bytes
    pub min_file_size: u64,
    /// Duration mismatch tolerated as a warning, in seconds
    pub soft_duration_tolerance: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_file_size: 1024,
            soft_duration_tolerance: 0.5,
        }
    }
}

/// Container short name ffprobe reports for an output extension.
pub fn container_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("mkv") => "matroska",
        Some("webm") => "webm",
        Some("mov") => "mov",
        _ => "mp4",
    }
}

pub struct Validator {
    probe: Arc<dyn MediaProbe>,
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(probe: Arc<dyn MediaProbe>, config: ValidatorConfig) -> Self {
        Self { probe, config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub async fn validate(&self, path: &Path, expected: &ExpectedOutput) -> ValidationResult {
        let size = file_size(path).await;
        let info = self.probe.probe(path).await;

        let result = match info {
            Ok(info) => self.score(&info, size, expected),
            Err(e) => {
                let mut result = ValidationResult {
                    file_size_valid: size >= self.config.min_file_size,
                    ..Default::default()
                };
                result.errors.push(format!("probe failed: {}", e));
                if !result.file_size_valid {
                    result.errors.push(size_error(size, self.config.min_file_size));
                }
                result.hard_failure = true;
                result
            }
        };

        debug!(
            path = %path.display(),
            is_valid = result.is_valid,
            hard_failure = result.hard_failure,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "Validated output"
        );

        result
    }

    /// Score a probed file against the contract.
    pub fn score(&self, info: &MediaInfo, size: u64, expected: &ExpectedOutput) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. Container
        let format_valid = info.format_matches(&expected.container);
        if !format_valid {
            errors.push(format!(
                "container is '{}', expected {}",
                info.format_name, expected.container
            ));
        }

        // 2 + 4. Codecs, pixel format and resolution
        let mut codec_valid = true;
        match &info.video {
            Some(video) => {
                if video.codec != expected.video_codec {
                    codec_valid = false;
                    errors.push(format!(
                        "video codec is {}, expected {}",
                        video.codec, expected.video_codec
                    ));
                }
                if video.width != expected.resolution.width || video.height != expected.resolution.height {
                    codec_valid = false;
                    errors.push(format!(
                        "resolution is {}x{}, expected {}",
                        video.width, video.height, expected.resolution
                    ));
                }
                if video.pix_fmt.as_deref() != Some(expected.pixel_format.as_str()) {
                    codec_valid = false;
                    errors.push(format!(
                        "pixel format is {}, expected {}",
                        video.pix_fmt.as_deref().unwrap_or("unknown"),
                        expected.pixel_format
                    ));
                }
            }
            None => {
                codec_valid = false;
                errors.push("no video stream".to_string());
            }
        }

        let audio_valid = info.audio.is_some();
        match &info.audio {
            Some(audio) if audio.codec != expected.audio_codec => {
                codec_valid = false;
                errors.push(format!(
                    "audio codec is {}, expected {}",
                    audio.codec, expected.audio_codec
                ));
            }
            Some(_) => {}
            None => errors.push("no audio stream".to_string()),
        }

        // 3. Duration
        let measured = info.best_duration();
        let mut duration_hard = false;
        let duration_valid = match measured {
            Some(measured) => {
                let diff = (measured - expected.duration).abs();
                if diff <= expected.frame_interval + DURATION_EPSILON {
                    true
                } else if diff <= self.config.soft_duration_tolerance {
                    warnings.push(format!(
                        "duration {:.3}s differs from expected {:.3}s by {:.3}s",
                        measured, expected.duration, diff
                    ));
                    false
                } else {
                    duration_hard = true;
                    errors.push(format!(
                        "duration {:.3}s differs from expected {:.3}s by {:.3}s",
                        measured, expected.duration, diff
                    ));
                    false
                }
            }
            None => {
                duration_hard = true;
                errors.push("duration unavailable".to_string());
                false
            }
        };

        // 5. Size
        let file_size_valid = size >= self.config.min_file_size;
        if !file_size_valid {
            errors.push(size_error(size, self.config.min_file_size));
        }

        let is_valid = format_valid && codec_valid && audio_valid && duration_valid && file_size_valid;
        let hard_failure = !format_valid || !codec_valid || !audio_valid || !file_size_valid || duration_hard;

        ValidationResult {
            is_valid,
            format_valid,
            duration_valid,
            codec_valid,
            audio_valid,
            file_size_valid,
            hard_failure,
            measured_duration: measured,
            errors,
            warnings,
        }
    }
}

fn size_error(size: u64, min: u64) -> String {
    format!("file is {} bytes, below the {} byte minimum", size, min)
}

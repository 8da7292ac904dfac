//! Output validation contract and results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::encoding::{EncodingParams, Resolution};

/// What a finished file is expected to look like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExpectedOutput {
    /// Container short name (e.g. `mp4`, `matroska`)
    pub container: String,
    /// Expected total duration in seconds
    pub duration: f64,
    /// One frame interval in seconds (strict duration tolerance)
    pub frame_interval: f64,
    pub resolution: Resolution,
    pub video_codec: String,
    pub audio_codec: String,
    pub pixel_format: String,
}

impl ExpectedOutput {
    /// Build the contract for a file encoded with `params`.
    pub fn from_params(params: &EncodingParams, container: impl Into<String>, duration: f64) -> Self {
        Self {
            container: container.into(),
            duration,
            frame_interval: params.frame_interval(),
            resolution: params.resolution,
            video_codec: params.expected_video_codec().to_string(),
            audio_codec: params.expected_audio_codec().to_string(),
            pixel_format: params.pixel_format.clone(),
        }
    }
}

/// Result of inspecting one encoded file. Produced fresh per attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub format_valid: bool,
    pub duration_valid: bool,
    pub codec_valid: bool,
    pub audio_valid: bool,
    pub file_size_valid: bool,
    /// A check failed that must trigger fallback to the next tier
    pub hard_failure: bool,
    /// Duration reported by the container, if it could be read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measured_duration: Option<f64>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Whether every hard check passed (soft warnings allowed).
    pub fn passes_hard_checks(&self) -> bool {
        !self.hard_failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::resolve;
    use std::collections::BTreeMap;

    #[test]
    fn test_expected_from_params() {
        let params = resolve("low", &BTreeMap::new()).unwrap();
        let expected = ExpectedOutput::from_params(&params, "mp4", 30.0);
        assert_eq!(expected.video_codec, "h264");
        assert_eq!(expected.audio_codec, "aac");
        assert_eq!(expected.resolution, Resolution::new(1280, 720));
        assert!((expected.frame_interval - 1.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_hard_failure_blocks() {
        let result = ValidationResult {
            hard_failure: true,
            ..Default::default()
        };
        assert!(!result.passes_hard_checks());
    }
}

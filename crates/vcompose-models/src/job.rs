//! Composition job definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::encoding::EncodingParams;
use crate::preset::{self, PresetError};
use crate::scene::SceneAsset;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Requested output quality: a preset name plus optional overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QualityRequest {
    /// `low`, `medium`, `high` or `custom`
    pub preset: String,

    /// Per-field overrides (`resolution`, `video_bitrate`, `crf`, `speed_preset`, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, serde_json::Value>,
}

impl QualityRequest {
    pub fn preset(name: impl Into<String>) -> Self {
        Self {
            preset: name.into(),
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// Resolve into concrete parameters.
    pub fn resolve(&self) -> Result<EncodingParams, PresetError> {
        preset::resolve(&self.preset, &self.overrides)
    }
}

impl Default for QualityRequest {
    fn default() -> Self {
        Self::preset("medium")
    }
}

/// Metadata embedded into the output container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A request to compose one video from an ordered list of scenes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompositionJob {
    /// Unique job ID
    #[serde(default)]
    pub job_id: JobId,

    /// Scenes in playback order
    pub scenes: Vec<SceneAsset>,

    /// Requested quality
    #[serde(default)]
    pub quality: QualityRequest,

    /// Final output file
    pub output_path: PathBuf,

    /// Container metadata
    #[serde(default)]
    pub metadata: JobMetadata,
}

impl CompositionJob {
    pub fn new(scenes: Vec<SceneAsset>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            job_id: JobId::new(),
            scenes,
            quality: QualityRequest::default(),
            output_path: output_path.into(),
            metadata: JobMetadata::default(),
        }
    }

    pub fn with_quality(mut self, quality: QualityRequest) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_metadata(mut self, metadata: JobMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sum of declared scene durations.
    pub fn declared_duration(&self) -> f64 {
        self.scenes.iter().map(|s| s.declared_duration).sum()
    }

    /// Validate the job structure.
    pub fn validate(&self) -> Result<(), String> {
        if self.scenes.is_empty() {
            return Err("At least one scene is required".to_string());
        }

        if self.output_path.as_os_str().is_empty() {
            return Err("Output path must be specified".to_string());
        }

        let mut seen = HashSet::new();
        for scene in &self.scenes {
            if !seen.insert(scene.scene_id) {
                return Err(format!("Duplicate scene id {}", scene.scene_id));
            }

            if !scene.declared_duration.is_finite() || scene.declared_duration <= 0.0 {
                return Err(format!(
                    "Scene {} has invalid duration {}",
                    scene.scene_id, scene.declared_duration
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(scenes: Vec<SceneAsset>) -> CompositionJob {
        CompositionJob::new(scenes, "/tmp/out.mp4")
    }

    #[test]
    fn test_validate_ok() {
        let job = job(vec![SceneAsset::new(1, 10.0), SceneAsset::new(2, 5.0)]);
        assert!(job.validate().is_ok());
        assert!((job.declared_duration() - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_rejects_bad_jobs() {
        assert!(job(vec![]).validate().is_err());
        assert!(job(vec![SceneAsset::new(1, 1.0), SceneAsset::new(1, 2.0)])
            .validate()
            .is_err());
        assert!(job(vec![SceneAsset::new(1, 0.0)]).validate().is_err());
        assert!(job(vec![SceneAsset::new(1, f64::NAN)]).validate().is_err());

        let mut no_output = job(vec![SceneAsset::new(1, 1.0)]);
        no_output.output_path = PathBuf::new();
        assert!(no_output.validate().is_err());
    }

    #[test]
    fn test_job_from_json() {
        let job: CompositionJob = serde_json::from_str(
            r#"{
                "job_id": "job-1",
                "scenes": [{"scene_id": 1, "declared_duration": 10.0, "visual_path": "/a.mp4"}],
                "quality": {"preset": "high", "overrides": {"crf": 20}},
                "output_path": "/tmp/final.mp4",
                "metadata": {"title": "Demo", "tags": ["a", "b"]}
            }"#,
        )
        .unwrap();

        assert_eq!(job.job_id.as_str(), "job-1");
        assert_eq!(job.quality.preset, "high");
        assert_eq!(job.metadata.tags.len(), 2);
        assert!(job.quality.resolve().is_ok());
    }

    #[test]
    fn test_quality_request_builder() {
        let request = QualityRequest::preset("low").with_override("crf", 30);
        let params = request.resolve().unwrap();
        assert_eq!(params.crf, 30);
    }
}

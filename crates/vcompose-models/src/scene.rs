//! Scene assets supplied by upstream renderers and TTS engines.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Transition into a scene from the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Hard cut
    #[default]
    Cut,
    /// Fade through black
    Fade,
    /// Cross dissolve
    Dissolve,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Cut => "cut",
            Transition::Fade => "fade",
            Transition::Dissolve => "dissolve",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scene of the composition.
///
/// Paths are produced by external collaborators. A `None` path, or a path
/// that does not exist, means the asset is missing and will be replaced by a
/// generated placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SceneAsset {
    /// Scene identifier, unique within a job
    pub scene_id: u32,

    /// Human readable title used for chapters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Rendered scene video
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_path: Option<PathBuf>,

    /// Narration audio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_path: Option<PathBuf>,

    /// Declared scene length in seconds
    pub declared_duration: f64,

    /// Transition from the previous scene into this one
    #[serde(default)]
    pub transition: Transition,
}

impl SceneAsset {
    /// Create a scene with no assets attached.
    pub fn new(scene_id: u32, declared_duration: f64) -> Self {
        Self {
            scene_id,
            title: None,
            visual_path: None,
            narration_path: None,
            declared_duration,
            transition: Transition::Cut,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_visual(mut self, path: impl Into<PathBuf>) -> Self {
        self.visual_path = Some(path.into());
        self
    }

    pub fn with_narration(mut self, path: impl Into<PathBuf>) -> Self {
        self.narration_path = Some(path.into());
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transition = transition;
        self
    }

    /// Chapter title: the declared title, or "Scene N" (1-based position).
    pub fn display_title(&self, index: usize) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => format!("Scene {}", index + 1),
        }
    }

    /// Whether the visual asset is absent or points at a missing file.
    pub fn visual_missing(&self) -> bool {
        !self.visual_path.as_ref().is_some_and(|p| p.is_file())
    }

    /// Whether the narration asset is absent or points at a missing file.
    pub fn narration_missing(&self) -> bool {
        !self.narration_path.as_ref().is_some_and(|p| p.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_title_fallback() {
        let scene = SceneAsset::new(7, 3.0);
        assert_eq!(scene.display_title(0), "Scene 1");

        let scene = scene.with_title("  ");
        assert_eq!(scene.display_title(2), "Scene 3");

        let scene = SceneAsset::new(7, 3.0).with_title("Intro");
        assert_eq!(scene.display_title(0), "Intro");
    }

    #[test]
    fn test_missing_assets() {
        let scene = SceneAsset::new(1, 1.0).with_visual("/definitely/not/here.mp4");
        assert!(scene.visual_missing());
        assert!(scene.narration_missing());
    }

    #[test]
    fn test_deserialize_defaults() {
        let scene: SceneAsset =
            serde_json::from_str(r#"{"scene_id": 2, "declared_duration": 8.0}"#).unwrap();
        assert_eq!(scene.transition, Transition::Cut);
        assert!(scene.visual_path.is_none());

        let scene: SceneAsset = serde_json::from_str(
            r#"{"scene_id": 3, "declared_duration": 2.5, "transition": "dissolve"}"#,
        )
        .unwrap();
        assert_eq!(scene.transition, Transition::Dissolve);
    }
}

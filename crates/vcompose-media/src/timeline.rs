//! Timeline preparation: resolved visuals, synced narration, chapters.
//!
//! A [`Timeline`] is built once per job and shared read-only by every encoder
//! attempt, including the retry cycle.

use futures::future::join_all;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use vcompose_models::{ChapterMarker, SceneAsset, Transition};

use crate::audio_sync::{AudioSyncProcessor, SyncedAudioRef};
use crate::chapters::ChapterMarkerBuilder;
use crate::command::{is_cancelled, CancelReceiver};
use crate::error::{MediaError, TimelineError};
use crate::placeholder::{AssetPlaceholderGenerator, ResolvedAsset};
use crate::probe::{MediaInfo, MediaProbe};

const STILL_IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "webp", "bmp", "tiff"];

/// One scene, ready to encode.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineScene {
    pub scene: SceneAsset,
    /// Position in the job, 0-based
    pub index: usize,
    pub visual: PathBuf,
    pub visual_placeholder: bool,
    /// Probe result for caller-supplied visuals
    pub visual_info: Option<MediaInfo>,
    pub audio: SyncedAudioRef,
    /// Timeline offset in seconds
    pub start: f64,
    pub effective_duration: f64,
}

impl TimelineScene {
    /// Whether the visual is a single image that must be looped.
    pub fn visual_is_still(&self) -> bool {
        if let Some(info) = &self.visual_info {
            if info.format_name == "image2" || info.format_name.ends_with("_pipe") {
                return true;
            }
        }
        is_still_image_path(&self.visual)
    }

    pub fn title(&self) -> String {
        self.scene.display_title(self.index)
    }
}

/// Ordered scene list with final timing.
#[derive(Debug, Clone, Serialize)]
pub struct Timeline {
    pub scenes: Vec<TimelineScene>,
    pub chapters: Vec<ChapterMarker>,
    pub total_duration: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Timeline {
    /// Effective duration and incoming transition of each scene.
    pub fn clips(&self) -> Vec<(f64, Transition)> {
        self.scenes
            .iter()
            .map(|s| (s.effective_duration, s.scene.transition))
            .collect()
    }
}

pub fn is_still_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| STILL_IMAGE_EXTENSIONS.iter().any(|s| ext.eq_ignore_ascii_case(s)))
}

/// Runs placeholder synthesis, visual probing, narration sync and chapter
/// building in that order.
pub struct TimelinePreparer {
    placeholders: Arc<AssetPlaceholderGenerator>,
    audio: AudioSyncProcessor,
    probe: Arc<dyn MediaProbe>,
    max_parallel: usize,
    cancel: Option<CancelReceiver>,
}

impl TimelinePreparer {
    pub fn new(
        placeholders: Arc<AssetPlaceholderGenerator>,
        audio: AudioSyncProcessor,
        probe: Arc<dyn MediaProbe>,
        max_parallel: usize,
    ) -> Self {
        Self {
            placeholders,
            audio,
            probe,
            max_parallel: max_parallel.max(1),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Option<CancelReceiver>) -> Self {
        self.audio = self.audio.with_cancel(cancel.clone());
        self.cancel = cancel;
        self
    }

    pub async fn prepare(&self, scenes: &[SceneAsset], dir: &Path) -> Result<Timeline, TimelineError> {
        check_scenes(scenes)?;

        let visuals = self.resolve_visuals(scenes).await?;
        let audio = self.audio.prepare(scenes, dir).await?;

        if is_cancelled(self.cancel.as_ref()) {
            return Err(TimelineError::Cancelled);
        }

        let chapters = ChapterMarkerBuilder::build(
            scenes.iter().zip(audio.iter().map(|a| a.effective_duration)),
        );

        let mut warnings: Vec<String> = audio.iter().flat_map(|a| a.warnings.clone()).collect();
        let mut timeline_scenes = Vec::with_capacity(scenes.len());

        for (index, ((scene, (visual, info)), audio)) in
            scenes.iter().zip(visuals).zip(audio).enumerate()
        {
            let effective_duration = audio.effective_duration;
            let start = chapters[index].start_time;

            if let Some(visual_duration) = info.as_ref().and_then(|i| i.duration) {
                if visual_duration + 0.05 < effective_duration && !is_still_image_path(&visual.path) {
                    let message = format!(
                        "Scene {}: visual is {:.2}s for a {:.2}s scene; holding last frame",
                        scene.scene_id, visual_duration, effective_duration
                    );
                    warn!(scene_id = scene.scene_id, "{}", message);
                    warnings.push(message);
                }
            }

            timeline_scenes.push(TimelineScene {
                scene: scene.clone(),
                index,
                visual: visual.path,
                visual_placeholder: visual.placeholder,
                visual_info: info,
                audio,
                start,
                effective_duration,
            });
        }

        let total_duration = timeline_scenes.iter().map(|s| s.effective_duration).sum();

        info!(
            scenes = timeline_scenes.len(),
            total_duration, "Timeline prepared"
        );

        Ok(Timeline {
            scenes: timeline_scenes,
            chapters,
            total_duration,
            warnings,
        })
    }

    async fn resolve_visuals(
        &self,
        scenes: &[SceneAsset],
    ) -> Result<Vec<(ResolvedAsset, Option<MediaInfo>)>, TimelineError> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));

        let futures = scenes.iter().map(|scene| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| TimelineError::Cancelled)?;
                if is_cancelled(self.cancel.as_ref()) {
                    return Err(TimelineError::Cancelled);
                }
                self.resolve_visual(scene).await
            }
        });

        join_all(futures).await.into_iter().collect()
    }

    async fn resolve_visual(&self, scene: &SceneAsset) -> Result<(ResolvedAsset, Option<MediaInfo>), TimelineError> {
        let scene_id = scene.scene_id;
        let visual = self
            .placeholders
            .ensure_visual(scene)
            .await
            .map_err(|e| match e {
                MediaError::Cancelled => TimelineError::Cancelled,
                source => TimelineError::Placeholder { scene_id, source },
            })?;

        if visual.placeholder {
            return Ok((visual, None));
        }

        let info = self
            .probe
            .probe(&visual.path)
            .await
            .map_err(|e| TimelineError::AssetUnreadable {
                scene_id,
                path: visual.path.clone(),
                reason: e.to_string(),
            })?;

        match &info.video {
            Some(video) if video.width > 0 && video.height > 0 => {}
            _ => {
                return Err(TimelineError::AssetUnreadable {
                    scene_id,
                    path: visual.path.clone(),
                    reason: "no decodable video stream".to_string(),
                })
            }
        }

        Ok((visual, Some(info)))
    }
}

fn check_scenes(scenes: &[SceneAsset]) -> Result<(), TimelineError> {
    if scenes.is_empty() {
        return Err(TimelineError::InvalidScenes("no scenes".to_string()));
    }
    for scene in scenes {
        if !scene.declared_duration.is_finite() || scene.declared_duration <= 0.0 {
            return Err(TimelineError::InvalidScenes(format!(
                "scene {} has non-positive duration {}",
                scene.scene_id, scene.declared_duration
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_sync::{AudioMeasurement, AudioRenderPlan, AudioSyncConfig, AudioTool};
    use crate::error::MediaResult;
    use crate::placeholder::{write_silent_wav, PlaceholderSynthesizer, VisualSpec};
    use crate::probe::{parse_probe_output, VideoStreamInfo};
    use async_trait::async_trait;
    use tempfile::TempDir;
    use vcompose_models::Resolution;

    struct FileSynth;

    #[async_trait]
    impl PlaceholderSynthesizer for FileSynth {
        async fn solid_color_clip(&self, _spec: &VisualSpec, dest: &Path) -> MediaResult<()> {
            tokio::fs::write(dest, b"clip").await?;
            Ok(())
        }

        async fn silent_track(&self, duration: f64, dest: &Path) -> MediaResult<()> {
            write_silent_wav(dest, duration, 44_100, 2).map(|_| ())
        }
    }

    struct FixedAudio;

    #[async_trait]
    impl AudioTool for FixedAudio {
        async fn measure(&self, _path: &Path) -> MediaResult<AudioMeasurement> {
            Ok(AudioMeasurement {
                duration: Some(6.0),
                integrated_lufs: Some(-16.0),
                speech_end: 6.0,
            })
        }

        async fn render(&self, _plan: &AudioRenderPlan) -> MediaResult<()> {
            Ok(())
        }
    }

    /// Every file is a 2 second 640x360 clip; `.txt` files fail to probe.
    struct ShortClipProbe;

    #[async_trait]
    impl MediaProbe for ShortClipProbe {
        async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
            if path.extension().is_some_and(|e| e == "txt") {
                return Err(MediaError::invalid_media("not media"));
            }
            let mut info = parse_probe_output(br#"{"streams": [], "format": {"format_name": "mov,mp4", "duration": "2.0"}}"#)?;
            info.video = Some(VideoStreamInfo {
                codec: "h264".to_string(),
                width: 640,
                height: 360,
                pix_fmt: Some("yuv420p".to_string()),
                fps: 30.0,
            });
            Ok(info)
        }
    }

    fn preparer(dir: &TempDir) -> TimelinePreparer {
        let placeholders = Arc::new(AssetPlaceholderGenerator::new(
            dir.path(),
            Resolution::new(1280, 720),
            30,
            Arc::new(FileSynth),
        ));
        let audio = AudioSyncProcessor::new(
            Arc::clone(&placeholders),
            Arc::new(FixedAudio),
            AudioSyncConfig::default(),
        );
        TimelinePreparer::new(placeholders, audio, Arc::new(ShortClipProbe), 2)
    }

    #[tokio::test]
    async fn test_prepare_timeline() {
        let dir = TempDir::new().unwrap();
        let visual = dir.path().join("s1.mp4");
        let narration = dir.path().join("s1.wav");
        std::fs::write(&visual, b"v").unwrap();
        std::fs::write(&narration, b"a").unwrap();

        let scenes = vec![
            SceneAsset::new(1, 4.0).with_visual(&visual).with_narration(&narration),
            SceneAsset::new(2, 3.0).with_transition(Transition::Fade),
        ];

        let timeline = preparer(&dir).prepare(&scenes, dir.path()).await.unwrap();

        // Narration of 6s extends scene 1
        assert_eq!(timeline.scenes.len(), 2);
        assert_eq!(timeline.scenes[0].effective_duration, 6.0);
        assert_eq!(timeline.scenes[1].start, 6.0);
        assert!(timeline.scenes[1].visual_placeholder);
        assert_eq!(timeline.total_duration, 9.0);
        assert_eq!(timeline.chapters.len(), 2);
        assert_eq!(timeline.clips()[1], (3.0, Transition::Fade));

        // Extension warning plus short-visual warning
        assert_eq!(timeline.warnings.len(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_visual_is_fatal() {
        let dir = TempDir::new().unwrap();
        let visual = dir.path().join("notes.txt");
        std::fs::write(&visual, b"hello").unwrap();

        let scenes = vec![SceneAsset::new(9, 4.0).with_visual(&visual)];
        let err = preparer(&dir).prepare(&scenes, dir.path()).await.unwrap_err();
        assert!(matches!(err, TimelineError::AssetUnreadable { scene_id: 9, .. }));
    }

    #[tokio::test]
    async fn test_empty_scene_list() {
        let dir = TempDir::new().unwrap();
        let err = preparer(&dir).prepare(&[], dir.path()).await.unwrap_err();
        assert!(matches!(err, TimelineError::InvalidScenes(_)));
    }

    #[test]
    fn test_still_image_detection() {
        assert!(is_still_image_path(Path::new("/a/frame.PNG")));
        assert!(!is_still_image_path(Path::new("/a/clip.mp4")));
    }
}

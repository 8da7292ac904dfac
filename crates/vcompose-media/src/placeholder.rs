//! Placeholder assets for scenes whose visual or narration is missing.
//!
//! Placeholders are written into the job work dir and generated at most once
//! per scene and kind, so repeated calls within a job return the same path.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use vcompose_models::{Resolution, SceneAsset, NARRATION_CHANNELS, NARRATION_SAMPLE_RATE};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Solid colour used for visual placeholders.
pub const PLACEHOLDER_COLOR: &str = "black";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceholderKind {
    Visual,
    Narration,
}

/// Solid-colour clip to synthesize.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualSpec {
    pub resolution: Resolution,
    pub frame_rate: u32,
    pub duration: f64,
}

/// An asset path plus whether it was synthesized for this job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    pub path: PathBuf,
    pub placeholder: bool,
}

/// Backend that writes placeholder media files.
#[async_trait]
pub trait PlaceholderSynthesizer: Send + Sync {
    async fn solid_color_clip(&self, spec: &VisualSpec, dest: &Path) -> MediaResult<()>;

    /// 44.1 kHz stereo silence of exactly `duration` seconds.
    async fn silent_track(&self, duration: f64, dest: &Path) -> MediaResult<()>;
}

/// FFmpeg `color` source for visuals, `hound` for silence.
#[derive(Debug, Clone, Default)]
pub struct FfmpegSynthesizer {
    runner: FfmpegRunner,
}

impl FfmpegSynthesizer {
    pub fn new(runner: FfmpegRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl PlaceholderSynthesizer for FfmpegSynthesizer {
    async fn solid_color_clip(&self, spec: &VisualSpec, dest: &Path) -> MediaResult<()> {
        let source = format!(
            "color=c={}:s={}:r={}:d={:.3}",
            PLACEHOLDER_COLOR,
            spec.resolution.to_ffmpeg_size(),
            spec.frame_rate,
            spec.duration
        );

        let cmd = FfmpegCommand::new(dest)
            .lavfi_input(source)
            .video_codec("libx264")
            .output_args(["-preset", "ultrafast", "-pix_fmt", "yuv420p", "-an"])
            .without_progress();

        self.runner.run(&cmd).await
    }

    async fn silent_track(&self, duration: f64, dest: &Path) -> MediaResult<()> {
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || {
            write_silent_wav(&dest, duration, NARRATION_SAMPLE_RATE, NARRATION_CHANNELS)
        })
        .await
        .map_err(|e| MediaError::internal(format!("silence writer panicked: {}", e)))?
        .map(|_| ())
    }
}

/// Write a 16-bit PCM WAV of digital silence. Returns the frame count.
pub fn write_silent_wav(path: &Path, duration: f64, sample_rate: u32, channels: u16) -> MediaResult<u64> {
    if !duration.is_finite() || duration < 0.0 {
        return Err(MediaError::invalid_media(format!(
            "cannot synthesize {} seconds of silence",
            duration
        )));
    }

    let frames = (duration * sample_rate as f64).round() as u64;
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for _ in 0..frames * channels as u64 {
        writer.write_sample(0i16)?;
    }
    writer.finalize()?;

    Ok(frames)
}

type CellMap = HashMap<(u32, PlaceholderKind), Arc<OnceCell<PathBuf>>>;

/// Resolves scene assets, synthesizing placeholders for missing ones.
pub struct AssetPlaceholderGenerator {
    dir: PathBuf,
    resolution: Resolution,
    frame_rate: u32,
    synth: Arc<dyn PlaceholderSynthesizer>,
    cells: Mutex<CellMap>,
}

impl AssetPlaceholderGenerator {
    /// `resolution`/`frame_rate` must match the eventual encode.
    pub fn new(
        dir: impl Into<PathBuf>,
        resolution: Resolution,
        frame_rate: u32,
        synth: Arc<dyn PlaceholderSynthesizer>,
    ) -> Self {
        Self {
            dir: dir.into(),
            resolution,
            frame_rate,
            synth,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// The scene's visual, or a solid-colour clip of `declared_duration`.
    pub async fn ensure_visual(&self, scene: &SceneAsset) -> MediaResult<ResolvedAsset> {
        if !scene.visual_missing() {
            if let Some(path) = &scene.visual_path {
                return Ok(ResolvedAsset {
                    path: path.clone(),
                    placeholder: false,
                });
            }
        }

        if let Some(path) = &scene.visual_path {
            warn!(scene_id = scene.scene_id, path = %path.display(), "Visual not found, using placeholder");
        }

        let spec = VisualSpec {
            resolution: self.resolution,
            frame_rate: self.frame_rate,
            duration: scene.declared_duration,
        };
        let dest = self.dir.join(format!("placeholder-visual-{}.mp4", scene.scene_id));

        let path = self
            .ensure(scene.scene_id, PlaceholderKind::Visual, dest, |dest| async move {
                self.synth.solid_color_clip(&spec, &dest).await
            })
            .await?;

        Ok(ResolvedAsset {
            path,
            placeholder: true,
        })
    }

    /// The scene's narration, or silence of `declared_duration`.
    pub async fn ensure_narration(&self, scene: &SceneAsset) -> MediaResult<ResolvedAsset> {
        if !scene.narration_missing() {
            if let Some(path) = &scene.narration_path {
                return Ok(ResolvedAsset {
                    path: path.clone(),
                    placeholder: false,
                });
            }
        }

        if let Some(path) = &scene.narration_path {
            warn!(scene_id = scene.scene_id, path = %path.display(), "Narration not found, using silence");
        }

        let duration = scene.declared_duration;
        let dest = self.dir.join(format!("placeholder-silence-{}.wav", scene.scene_id));

        let path = self
            .ensure(scene.scene_id, PlaceholderKind::Narration, dest, |dest| async move {
                self.synth.silent_track(duration, &dest).await
            })
            .await?;

        Ok(ResolvedAsset {
            path,
            placeholder: true,
        })
    }

    async fn ensure<F, Fut>(&self, scene_id: u32, kind: PlaceholderKind, dest: PathBuf, make: F) -> MediaResult<PathBuf>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: std::future::Future<Output = MediaResult<()>>,
    {
        let cell = {
            let mut cells = self
                .cells
                .lock()
                .map_err(|_| MediaError::internal("placeholder cache poisoned"))?;
            Arc::clone(cells.entry((scene_id, kind)).or_default())
        };

        let path = cell
            .get_or_try_init(|| async {
                debug!(scene_id, ?kind, dest = %dest.display(), "Synthesizing placeholder");
                make(dest.clone()).await?;
                Ok::<_, MediaError>(dest)
            })
            .await?;

        Ok(path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingSynth {
        visuals: AtomicUsize,
        silences: AtomicUsize,
    }

    #[async_trait]
    impl PlaceholderSynthesizer for CountingSynth {
        async fn solid_color_clip(&self, _spec: &VisualSpec, dest: &Path) -> MediaResult<()> {
            self.visuals.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(dest, b"clip").await?;
            Ok(())
        }

        async fn silent_track(&self, duration: f64, dest: &Path) -> MediaResult<()> {
            self.silences.fetch_add(1, Ordering::SeqCst);
            write_silent_wav(dest, duration, NARRATION_SAMPLE_RATE, NARRATION_CHANNELS)?;
            Ok(())
        }
    }

    fn generator(dir: &TempDir, synth: Arc<CountingSynth>) -> AssetPlaceholderGenerator {
        AssetPlaceholderGenerator::new(dir.path(), Resolution::new(1280, 720), 30, synth)
    }

    #[tokio::test]
    async fn test_ensure_visual_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let synth = Arc::new(CountingSynth::default());
        let gen = generator(&dir, Arc::clone(&synth));
        let scene = SceneAsset::new(3, 4.0);

        let first = gen.ensure_visual(&scene).await.unwrap();
        let second = gen.ensure_visual(&scene).await.unwrap();

        assert!(first.placeholder);
        assert_eq!(first, second);
        assert_eq!(synth.visuals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_existing_assets_pass_through() {
        let dir = TempDir::new().unwrap();
        let visual = dir.path().join("scene.mp4");
        std::fs::write(&visual, b"video").unwrap();

        let synth = Arc::new(CountingSynth::default());
        let gen = generator(&dir, Arc::clone(&synth));
        let scene = SceneAsset::new(1, 4.0).with_visual(&visual);

        let resolved = gen.ensure_visual(&scene).await.unwrap();
        assert_eq!(resolved.path, visual);
        assert!(!resolved.placeholder);
        assert_eq!(synth.visuals.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_narration_file_gets_silence() {
        let dir = TempDir::new().unwrap();
        let synth = Arc::new(CountingSynth::default());
        let gen = generator(&dir, Arc::clone(&synth));
        let scene = SceneAsset::new(2, 8.0).with_narration(dir.path().join("gone.wav"));

        let resolved = gen.ensure_narration(&scene).await.unwrap();
        let again = gen.ensure_narration(&scene).await.unwrap();
        assert!(resolved.placeholder);
        assert_eq!(resolved.path, again.path);
        assert_eq!(synth.silences.load(Ordering::SeqCst), 1);

        let reader = hound::WavReader::open(&resolved.path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.channels, 2);
        assert_eq!(reader.duration(), 8 * 44_100);
    }

    #[test]
    fn test_silence_is_sample_exact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("silence.wav");

        let frames = write_silent_wav(&path, 2.5, 44_100, 2).unwrap();
        assert_eq!(frames, 110_250);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration() as u64, frames);
        assert!(write_silent_wav(&path, f64::NAN, 44_100, 2).is_err());
    }
}

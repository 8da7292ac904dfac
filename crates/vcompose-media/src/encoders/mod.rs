//! Encoder tiers.
//!
//! All tiers take the same prepared [`Timeline`] and [`EncodingParams`] and
//! write a single file to [`EncodeRequest::output`]. They keep no state
//! between invocations.

mod primary;
mod secondary;
mod tertiary;

pub use primary::{concat_manifest, escape_concat_path, PrimaryEncoder};
pub use secondary::SecondaryEncoder;
pub use tertiary::{render_still_frame, TertiaryEncoder};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use vcompose_models::{EncoderTier, EncodingParams, JobMetadata};

use crate::chapters::render_ffmetadata;
use crate::command::{CancelReceiver, FfmpegRunner, DEFAULT_FFMPEG};
use crate::error::{EncodeError, EncodeErrorKind, MediaError};
use crate::native::StopSignal;
use crate::progress::EncodeProgress;
use crate::timeline::{Timeline, TimelineScene};

/// Everything an encoder attempt needs. Owned so attempts can run as
/// independent tasks.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub timeline: Arc<Timeline>,
    pub params: EncodingParams,
    pub metadata: JobMetadata,
    /// Attempt output file, inside the job work dir
    pub output: PathBuf,
    /// Scratch directory for this attempt
    pub work_dir: PathBuf,
    /// FFmpeg binary name or path
    pub ffmpeg: String,
    /// Per-subprocess wall clock limit
    pub timeout_secs: u64,
    pub cancel: Option<CancelReceiver>,
    /// Fraction of this attempt completed, 0.0 to 1.0
    pub progress: Option<EncodeProgress>,
}

impl EncodeRequest {
    pub fn new(timeline: Arc<Timeline>, params: EncodingParams, output: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            timeline,
            params,
            metadata: JobMetadata::default(),
            output: output.into(),
            work_dir: work_dir.into(),
            ffmpeg: DEFAULT_FFMPEG.to_string(),
            timeout_secs: 600,
            cancel: None,
            progress: None,
        }
    }

    pub fn report_progress(&self, fraction: f64) {
        if let Some(progress) = &self.progress {
            progress.report(fraction);
        }
    }

    /// Progress for the sub-range `offset..offset + span` of this attempt.
    pub fn scoped_progress(&self, offset: f64, span: f64) -> Option<EncodeProgress> {
        self.progress.as_ref().map(|p| p.scoped(offset, span))
    }

    /// Stop conditions for in-process work, sharing this attempt's cancel signal.
    pub fn stop_signal(&self) -> StopSignal {
        StopSignal::new(self.cancel.clone(), self.timeout_secs)
    }

    /// Runner bound to this attempt's binary, work dir, timeout and cancel signal.
    pub fn runner(&self) -> FfmpegRunner {
        FfmpegRunner::new()
            .with_binary(&self.ffmpeg)
            .with_work_dir(&self.work_dir)
            .with_timeout(self.timeout_secs)
            .with_optional_cancel(self.cancel.clone())
    }
}

/// One encoder tier.
#[async_trait]
pub trait EncoderBackend: Send + Sync {
    fn tier(&self) -> EncoderTier;

    /// Encode the timeline, returning the written file.
    async fn encode(&self, request: &EncodeRequest) -> Result<PathBuf, EncodeError>;
}

/// The three built-in tiers in priority order.
pub fn default_backends(tertiary_text: bool) -> Vec<Arc<dyn EncoderBackend>> {
    vec![
        Arc::new(PrimaryEncoder),
        Arc::new(SecondaryEncoder),
        Arc::new(TertiaryEncoder::new(tertiary_text)),
    ]
}

/// Write job metadata and chapters for `-map_metadata`/`-map_chapters`.
pub(crate) async fn write_metadata_file(request: &EncodeRequest, tier: EncoderTier) -> Result<PathBuf, EncodeError> {
    let path = request.work_dir.join("metadata.txt");
    let doc = render_ffmetadata(&request.metadata, &request.timeline.chapters);
    tokio::fs::write(&path, doc)
        .await
        .map_err(|e| EncodeError::from_media(tier, MediaError::Io(e)))?;
    Ok(path)
}

/// Input options for a scene visual of `length` seconds.
pub(crate) fn visual_input_args(scene: &TimelineScene, length: f64, frame_rate: u32) -> Vec<String> {
    if scene.visual_is_still() {
        vec![
            "-loop".to_string(),
            "1".to_string(),
            "-framerate".to_string(),
            frame_rate.to_string(),
            "-t".to_string(),
            format!("{:.3}", length),
        ]
    } else {
        Vec::new()
    }
}

/// Container-specific muxer flags.
pub(crate) fn muxer_args(output: &Path) -> Vec<String> {
    match output
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("mp4") | Some("m4v") | Some("mov") => {
            vec!["-movflags".to_string(), "+faststart".to_string()]
        }
        _ => Vec::new(),
    }
}

/// Absolute form of `path`, without touching the filesystem.
pub(crate) fn absolute(path: &Path, tier: EncoderTier) -> Result<PathBuf, EncodeError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| EncodeError::new(tier, EncodeErrorKind::Io, format!("cannot resolve {}: {}", path.display(), e)))
}

/// Fail fast when the attempt has already been cancelled.
pub(crate) fn check_cancelled(request: &EncodeRequest, tier: EncoderTier) -> Result<(), EncodeError> {
    if crate::command::is_cancelled(request.cancel.as_ref()) {
        return Err(EncodeError::new(tier, EncodeErrorKind::Cancelled, "cancelled before start"));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::audio_sync::{SyncAdjustment, SyncedAudioRef};
    use vcompose_models::{resolve, ChapterMarker, SceneAsset, Transition};

    /// A timeline of scenes with the given durations and transitions, all
    /// pointing at files under `dir`.
    pub fn timeline(dir: &Path, clips: &[(f64, Transition)]) -> Arc<Timeline> {
        let mut start = 0.0;
        let mut scenes = Vec::new();
        let mut chapters = Vec::new();
        for (index, (duration, transition)) in clips.iter().enumerate() {
            let id = index as u32 + 1;
            let scene = SceneAsset::new(id, *duration).with_transition(*transition);
            chapters.push(ChapterMarker {
                title: scene.display_title(index),
                start_time: start,
                end_time: start + duration,
            });
            scenes.push(TimelineScene {
                index,
                visual: dir.join(format!("visual {}.mp4", id)),
                visual_placeholder: false,
                visual_info: None,
                audio: SyncedAudioRef {
                    scene_id: id,
                    path: dir.join(format!("narration-{}.wav", id)),
                    declared_duration: *duration,
                    narration_duration: *duration,
                    effective_duration: *duration,
                    placeholder: false,
                    normalized: false,
                    adjustment: SyncAdjustment::None,
                    warnings: Vec::new(),
                },
                start,
                effective_duration: *duration,
                scene,
            });
            start += duration;
        }
        Arc::new(Timeline {
            scenes,
            chapters,
            total_duration: start,
            warnings: Vec::new(),
        })
    }

    pub fn request(dir: &Path, clips: &[(f64, Transition)]) -> EncodeRequest {
        let params = resolve("low", &Default::default()).unwrap();
        EncodeRequest::new(timeline(dir, clips), params, dir.join("out.mp4"), dir)
    }
}

//! Narration loudness normalization and length sync.
//!
//! Every scene ends up with a 44.1 kHz stereo WAV whose length is the scene's
//! effective duration. Narration is padded with trailing silence or has its
//! trailing silence trimmed; speech is never cut. When speech runs past the
//! declared duration the scene is extended instead.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use vcompose_models::{SceneAsset, NARRATION_CHANNELS, NARRATION_SAMPLE_RATE};

use crate::command::{is_cancelled, CancelReceiver, FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult, TimelineError};
use crate::placeholder::AssetPlaceholderGenerator;
use crate::probe::MediaProbe;

/// Duration differences below this are treated as already in sync.
pub const SYNC_TOLERANCE_SECS: f64 = 0.05;
/// Silence threshold used to find where speech ends.
pub const SILENCE_THRESHOLD_DB: i32 = -50;
/// Shortest run counted as silence.
pub const SILENCE_MIN_SECS: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioSyncConfig {
    /// Job-wide integrated loudness target (LUFS)
    pub target_lufs: f64,
    /// Allowed deviation from the target before normalization kicks in (LU)
    pub tolerance_lu: f64,
    /// Scenes prepared concurrently
    pub max_parallel: usize,
}

impl Default for AudioSyncConfig {
    fn default() -> Self {
        Self {
            target_lufs: -16.0,
            tolerance_lu: 1.5,
            max_parallel: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
        }
    }
}

/// Analysis of one narration file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioMeasurement {
    /// `None` when the container reports no usable duration
    pub duration: Option<f64>,
    /// Integrated loudness; `None` for digital silence
    pub integrated_lufs: Option<f64>,
    /// Where the last non-silent audio ends
    pub speech_end: f64,
}

/// What was done to a narration track to fit its scene.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncAdjustment {
    None,
    PaddedSilence { seconds: f64 },
    TrimmedSilence { seconds: f64 },
    ExtendedScene { seconds: f64 },
}

/// Length decision for one scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncPlan {
    pub effective_duration: f64,
    pub adjustment: SyncAdjustment,
}

/// Render instructions for one narration track.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioRenderPlan {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Loudness target when normalization is needed
    pub normalize_to: Option<f64>,
    pub duration: f64,
}

/// Synced narration for one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedAudioRef {
    pub scene_id: u32,
    pub path: PathBuf,
    pub declared_duration: f64,
    pub narration_duration: f64,
    pub effective_duration: f64,
    /// Silence synthesized for a missing narration
    pub placeholder: bool,
    pub normalized: bool,
    pub adjustment: SyncAdjustment,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Audio measurement and rendering backend.
#[async_trait]
pub trait AudioTool: Send + Sync {
    async fn measure(&self, path: &Path) -> MediaResult<AudioMeasurement>;
    async fn render(&self, plan: &AudioRenderPlan) -> MediaResult<()>;
}

/// Decide the effective duration of a scene from its narration.
pub fn plan_sync(declared: f64, narration_duration: f64, speech_end: f64) -> SyncPlan {
    let diff = narration_duration - declared;

    if diff.abs() <= SYNC_TOLERANCE_SECS {
        return SyncPlan {
            effective_duration: declared,
            adjustment: SyncAdjustment::None,
        };
    }

    if diff < 0.0 {
        return SyncPlan {
            effective_duration: declared,
            adjustment: SyncAdjustment::PaddedSilence { seconds: -diff },
        };
    }

    let speech_end = speech_end.clamp(0.0, narration_duration);
    if speech_end <= declared + SYNC_TOLERANCE_SECS {
        SyncPlan {
            effective_duration: declared,
            adjustment: SyncAdjustment::TrimmedSilence { seconds: diff },
        }
    } else {
        SyncPlan {
            effective_duration: speech_end,
            adjustment: SyncAdjustment::ExtendedScene {
                seconds: speech_end - declared,
            },
        }
    }
}

/// Whether a measured loudness is far enough from the target to normalize.
pub fn needs_normalization(integrated_lufs: Option<f64>, config: &AudioSyncConfig) -> bool {
    match integrated_lufs {
        Some(lufs) if lufs.is_finite() => (lufs - config.target_lufs).abs() > config.tolerance_lu,
        _ => false,
    }
}

/// Prepares per-scene narration for the encoders.
pub struct AudioSyncProcessor {
    placeholders: Arc<AssetPlaceholderGenerator>,
    tool: Arc<dyn AudioTool>,
    config: AudioSyncConfig,
    cancel: Option<CancelReceiver>,
}

impl AudioSyncProcessor {
    pub fn new(
        placeholders: Arc<AssetPlaceholderGenerator>,
        tool: Arc<dyn AudioTool>,
        config: AudioSyncConfig,
    ) -> Self {
        Self {
            placeholders,
            tool,
            config,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Option<CancelReceiver>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sync every scene's narration, preserving scene order.
    pub async fn prepare(
        &self,
        scenes: &[SceneAsset],
        job_temp_dir: &Path,
    ) -> Result<Vec<SyncedAudioRef>, TimelineError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));

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
                self.prepare_scene(scene, job_temp_dir).await
            }
        });

        let synced: Vec<SyncedAudioRef> = join_all(futures)
            .await
            .into_iter()
            .collect::<Result<_, _>>()?;

        info!(
            scenes = synced.len(),
            extended = synced
                .iter()
                .filter(|s| matches!(s.adjustment, SyncAdjustment::ExtendedScene { .. }))
                .count(),
            "Narration synced"
        );

        Ok(synced)
    }

    async fn prepare_scene(&self, scene: &SceneAsset, dir: &Path) -> Result<SyncedAudioRef, TimelineError> {
        let scene_id = scene.scene_id;
        let declared = scene.declared_duration;

        let narration = self
            .placeholders
            .ensure_narration(scene)
            .await
            .map_err(|e| match e {
                MediaError::Cancelled => TimelineError::Cancelled,
                source => TimelineError::Placeholder { scene_id, source },
            })?;

        // Synthesized silence is already 44.1 kHz stereo at the exact length
        if narration.placeholder {
            return Ok(SyncedAudioRef {
                scene_id,
                path: narration.path,
                declared_duration: declared,
                narration_duration: declared,
                effective_duration: declared,
                placeholder: true,
                normalized: false,
                adjustment: SyncAdjustment::None,
                warnings: Vec::new(),
            });
        }

        let measurement = self.tool.measure(&narration.path).await.map_err(|e| match e {
            MediaError::Cancelled => TimelineError::Cancelled,
            e => TimelineError::AssetUnreadable {
                scene_id,
                path: narration.path.clone(),
                reason: e.to_string(),
            },
        })?;

        let narration_duration = measurement
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .ok_or_else(|| TimelineError::DurationUnparseable {
                scene_id,
                path: narration.path.clone(),
            })?;

        let plan = plan_sync(declared, narration_duration, measurement.speech_end);
        let normalize = needs_normalization(measurement.integrated_lufs, &self.config);

        let mut warnings = Vec::new();
        if let SyncAdjustment::ExtendedScene { seconds } = plan.adjustment {
            let message = format!(
                "Scene {}: narration runs {:.2}s past the declared {:.2}s; scene extended to {:.2}s",
                scene_id, seconds, declared, plan.effective_duration
            );
            warn!(scene_id, "{}", message);
            warnings.push(message);
        }

        let output = dir.join(format!("narration-{}.wav", scene_id));
        let render = AudioRenderPlan {
            input: narration.path.clone(),
            output: output.clone(),
            normalize_to: normalize.then_some(self.config.target_lufs),
            duration: plan.effective_duration,
        };

        debug!(
            scene_id,
            narration_duration,
            effective = plan.effective_duration,
            normalize,
            "Rendering synced narration"
        );

        self.tool.render(&render).await.map_err(|e| match e {
            MediaError::Cancelled => TimelineError::Cancelled,
            source => TimelineError::AudioSync { scene_id, source },
        })?;

        Ok(SyncedAudioRef {
            scene_id,
            path: output,
            declared_duration: declared,
            narration_duration,
            effective_duration: plan.effective_duration,
            placeholder: false,
            normalized: normalize,
            adjustment: plan.adjustment,
            warnings,
        })
    }
}

/// [`AudioTool`] using `loudnorm` and `silencedetect` analysis passes.
pub struct FfmpegAudioTool {
    runner: FfmpegRunner,
    probe: Arc<dyn MediaProbe>,
}

impl FfmpegAudioTool {
    pub fn new(runner: FfmpegRunner, probe: Arc<dyn MediaProbe>) -> Self {
        Self { runner, probe }
    }
}

#[async_trait]
impl AudioTool for FfmpegAudioTool {
    async fn measure(&self, path: &Path) -> MediaResult<AudioMeasurement> {
        let info = self.probe.probe(path).await?;
        if info.audio.is_none() {
            return Err(MediaError::invalid_media(format!(
                "no audio stream in {}",
                path.display()
            )));
        }
        let duration = info.best_duration();

        let analysis = format!(
            "loudnorm=print_format=json,silencedetect=n={}dB:d={}",
            SILENCE_THRESHOLD_DB, SILENCE_MIN_SECS
        );
        let cmd = FfmpegCommand::new("-")
            .input(path)
            .audio_filter(analysis)
            .output_args(["-vn", "-f", "null"])
            .log_level("info")
            .without_progress();

        let log = self.runner.run_collect_stderr(&cmd).await?;

        Ok(AudioMeasurement {
            duration,
            integrated_lufs: parse_loudnorm_input_i(&log),
            speech_end: parse_speech_end(&log, duration.unwrap_or(0.0)),
        })
    }

    async fn render(&self, plan: &AudioRenderPlan) -> MediaResult<()> {
        let mut chain = Vec::new();
        if let Some(target) = plan.normalize_to {
            chain.push(format!("loudnorm=I={}:TP=-1.5:LRA=11", target));
        }
        chain.push(format!("aresample={}", NARRATION_SAMPLE_RATE));
        chain.push("aformat=sample_fmts=s16:channel_layouts=stereo".to_string());
        chain.push("apad".to_string());
        chain.push(format!("atrim=duration={:.6}", plan.duration));

        let cmd = FfmpegCommand::new(&plan.output)
            .input(&plan.input)
            .audio_filter(chain.join(","))
            .output_args([
                "-vn".to_string(),
                "-c:a".to_string(),
                "pcm_s16le".to_string(),
                "-ar".to_string(),
                NARRATION_SAMPLE_RATE.to_string(),
                "-ac".to_string(),
                NARRATION_CHANNELS.to_string(),
            ])
            .without_progress();

        self.runner.run(&cmd).await
    }
}

#[derive(Debug, Deserialize)]
struct LoudnormStats {
    input_i: String,
}

/// Integrated loudness from `loudnorm=print_format=json` output.
fn parse_loudnorm_input_i(log: &str) -> Option<f64> {
    let start = log.rfind('{')?;
    let end = log[start..].find('}')? + start;
    let stats: LoudnormStats = serde_json::from_str(&log[start..=end]).ok()?;
    stats.input_i.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// End of the last non-silent region, from `silencedetect` output.
fn parse_speech_end(log: &str, duration: f64) -> f64 {
    let mut last: Option<(f64, Option<f64>)> = None;

    for line in log.lines() {
        if let Some(value) = field_after(line, "silence_start:") {
            last = Some((value, None));
        } else if let Some(value) = field_after(line, "silence_end:") {
            if let Some((start, _)) = last {
                last = Some((start, Some(value)));
            }
        }
    }

    match last {
        // Silence still open at EOF, or closed at EOF by newer FFmpeg releases
        Some((start, None)) => start,
        Some((start, Some(end))) if end >= duration - SYNC_TOLERANCE_SECS => start,
        _ => duration,
    }
    .max(0.0)
}

fn field_after(line: &str, key: &str) -> Option<f64> {
    let rest = &line[line.find(key)? + key.len()..];
    rest.split_whitespace().next()?.parse().ok()
}

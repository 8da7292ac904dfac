//! Tertiary tier: one static frame per scene plus its synced narration.
//!
//! Frames are rendered in-process with `image` and titled with cosmic-text,
//! so no optional FFmpeg filter is needed. The frames are joined by the
//! FFmpeg CLI when present and by the in-process composer when it is not.
//! Transitions are ignored.

use async_trait::async_trait;
use image::{ImageBuffer, Rgb};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use vcompose_models::{EncoderTier, Resolution};

use super::{absolute, check_cancelled, muxer_args, write_metadata_file, EncodeRequest, EncoderBackend};
use crate::caption::draw_caption;
use crate::command::FfmpegCommand;
use crate::error::{EncodeError, EncodeErrorKind, MediaError, MediaResult};
use crate::filters::{audio_conform_chain, video_conform_chain, ClipEdges};
use crate::native::{self, load_still, ClipVisual, NativeClip, NativeJob};

const TIER: EncoderTier = EncoderTier::Tertiary;

/// Background colours cycled per scene so consecutive frames differ.
const PALETTE: [[u8; 3]; 4] = [[24, 28, 38], [38, 24, 34], [22, 36, 30], [36, 32, 22]];

#[derive(Debug, Clone, Copy)]
pub struct TertiaryEncoder {
    text_overlay: bool,
}

impl Default for TertiaryEncoder {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TertiaryEncoder {
    pub fn new(text_overlay: bool) -> Self {
        Self { text_overlay }
    }

    async fn prepare_frames(&self, request: &EncodeRequest, work_dir: &Path) -> Result<Vec<PathBuf>, EncodeError> {
        let resolution = request.params.resolution;
        let mut frames = Vec::with_capacity(request.timeline.scenes.len());

        for scene in &request.timeline.scenes {
            let frame = work_dir.join(format!("frame-{:03}.png", scene.index));
            let color = PALETTE[scene.index % PALETTE.len()];
            let caption = self
                .text_overlay
                .then(|| format!("{}\n{:.1}s", scene.title(), scene.effective_duration));
            let frame_path = frame.clone();
            tokio::task::spawn_blocking(move || render_still_frame(resolution, color, caption.as_deref(), &frame_path))
                .await
                .map_err(|e| EncodeError::new(TIER, EncodeErrorKind::Panicked, format!("frame render panicked: {}", e)))?
                .map_err(|e| EncodeError::from_media(TIER, e))?;

            frames.push(frame);
        }

        Ok(frames)
    }

    fn build_command(&self, request: &EncodeRequest, frames: &[PathBuf], metadata: &Path) -> Result<FfmpegCommand, EncodeError> {
        let params = &request.params;
        let mut cmd = FfmpegCommand::new(&request.output);
        let mut parts = Vec::new();
        let mut labels = Vec::new();

        for (scene, frame) in request.timeline.scenes.iter().zip(frames) {
            let i = scene.index;
            let edges = still_edges(scene.effective_duration);
            let video_input = cmd.input_count();

            cmd = cmd
                .input_with(
                    [
                        "-loop".to_string(),
                        "1".to_string(),
                        "-framerate".to_string(),
                        params.frame_rate.to_string(),
                        "-t".to_string(),
                        format!("{:.3}", scene.effective_duration),
                    ],
                    frame,
                )
                .input(absolute(&scene.audio.path, TIER)?);

            parts.push(format!("[{}:v]{}[v{i}]", video_input, video_conform_chain(params, &edges)));
            parts.push(format!("[{}:a]{}[a{i}]", video_input + 1, audio_conform_chain(&edges)));
            labels.push(format!("v{i}"));
            labels.push(format!("a{i}"));
        }

        let n = request.timeline.scenes.len();
        let joined: String = labels.iter().map(|l| format!("[{l}]")).collect();
        parts.push(format!("{joined}concat=n={n}:v=1:a=1[vout][aout]"));

        let metadata_input = cmd.input_count();
        Ok(cmd
            .input(metadata)
            .filter_complex(parts.join(";"))
            .map("[vout]")
            .map("[aout]")
            .output_args([
                "-map_metadata".to_string(),
                metadata_input.to_string(),
                "-map_chapters".to_string(),
                metadata_input.to_string(),
            ])
            .output_args(request.params.to_ffmpeg_args())
            .output_args(muxer_args(&request.output)))
    }

    /// The same frames and narration muxed without the FFmpeg CLI.
    fn native_job(&self, request: &EncodeRequest, frames: &[PathBuf]) -> Result<NativeJob, EncodeError> {
        let resolution = request.params.resolution;
        let clips = request
            .timeline
            .scenes
            .iter()
            .zip(frames)
            .map(|(scene, frame)| {
                Ok(NativeClip {
                    visual: ClipVisual::Still(
                        load_still(frame, resolution).map_err(|e| EncodeError::from_media(TIER, e))?,
                    ),
                    audio: absolute(&scene.audio.path, TIER)?,
                    edges: still_edges(scene.effective_duration),
                })
            })
            .collect::<Result<Vec<_>, EncodeError>>()?;

        Ok(NativeJob {
            clips,
            params: request.params.clone(),
            metadata: request.metadata.clone(),
            chapters: request.timeline.chapters.clone(),
            output: request.output.clone(),
        })
    }
}

fn still_edges(duration: f64) -> ClipEdges {
    ClipEdges {
        duration,
        ..Default::default()
    }
}

/// Render a solid frame with a darker lower band and an optional centred caption.
pub fn render_still_frame(resolution: Resolution, color: [u8; 3], caption: Option<&str>, dest: &Path) -> MediaResult<()> {
    let Resolution { width, height } = resolution;
    if width == 0 || height == 0 {
        return Err(MediaError::invalid_media("frame resolution must be positive"));
    }

    let band_start = height - height / 5;
    let mut frame: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_fn(width, height, |_, y| {
        if y >= band_start {
            Rgb([color[0] / 2, color[1] / 2, color[2] / 2])
        } else {
            Rgb(color)
        }
    });
    if let Some(caption) = caption {
        let font_size = (height / 18).max(12) as f32;
        if draw_caption(&mut frame, caption, font_size) == 0 {
            warn!("No usable font for the frame caption, rendering untitled");
        }
    }
    frame.save(dest)?;
    Ok(())
}

#[async_trait]
impl EncoderBackend for TertiaryEncoder {
    fn tier(&self) -> EncoderTier {
        TIER
    }

    async fn encode(&self, request: &EncodeRequest) -> Result<PathBuf, EncodeError> {
        check_cancelled(request, TIER)?;
        if request.timeline.scenes.is_empty() {
            return Err(EncodeError::new(TIER, EncodeErrorKind::Internal, "empty timeline"));
        }

        let work_dir = absolute(&request.work_dir, TIER)?;
        let frames = self.prepare_frames(request, &work_dir).await?;
        let metadata = write_metadata_file(request, TIER).await?;

        let cmd = self.build_command(request, &frames, &metadata)?;
        let progress = request.progress.clone();
        let total = request.timeline.total_duration;
        let result = request
            .runner()
            .run_with_progress(&cmd, move |p| {
                if let Some(progress) = &progress {
                    progress.report(p.fraction(total));
                }
            })
            .await;

        match result {
            Ok(()) => {
                request.report_progress(1.0);
                info!(output = %request.output.display(), "Tertiary encode finished");
                Ok(request.output.clone())
            }
            Err(MediaError::FfmpegNotFound(binary)) if native::available() => {
                warn!(binary = %binary, "FFmpeg CLI unavailable, muxing frames in-process");
                check_cancelled(request, TIER)?;
                let job = self.native_job(request, &frames)?;
                native::compose(job, request.stop_signal(), request.progress.clone())
                    .await
                    .map_err(|e| EncodeError::from_media(TIER, e))?;
                info!(output = %request.output.display(), "Tertiary encode finished in-process");
                Ok(request.output.clone())
            }
            Err(e) => Err(EncodeError::from_media(TIER, e)),
        }
    }
}

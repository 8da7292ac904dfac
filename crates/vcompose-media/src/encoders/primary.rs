//! Primary tier: per-scene conformed segments joined with the concat demuxer.
//!
//! Each scene is rendered once with its synced narration muxed in, then the
//! segments are stream-copied into the output together with the metadata
//! file. Dissolves cannot overlap under stream copy and are rendered as
//! fades through black.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use vcompose_models::{EncoderTier, Transition};

use super::{absolute, check_cancelled, muxer_args, visual_input_args, write_metadata_file, EncodeRequest, EncoderBackend};
use crate::command::FfmpegCommand;
use crate::error::{EncodeError, EncodeErrorKind, MediaError};
use crate::filters::{audio_conform_chain, plan_edges, video_conform_chain};

const TIER: EncoderTier = EncoderTier::Primary;
/// Share of the attempt spent rendering segments; the stream-copy join is the rest
const SEGMENT_SHARE: f64 = 0.95;

#[derive(Debug, Clone, Copy, Default)]
pub struct PrimaryEncoder;

/// Escape a path for an unquoted `file` line of an ffconcat manifest.
pub fn escape_concat_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut escaped = String::with_capacity(raw.len() + 8);
    for ch in raw.chars() {
        if matches!(ch, '\\' | '\'' | '"' | ':' | '#') || ch.is_whitespace() {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// ffconcat manifest listing `segments` in order.
pub fn concat_manifest(segments: &[PathBuf]) -> String {
    let mut out = String::from("ffconcat version 1.0\n");
    for segment in segments {
        out.push_str("file ");
        out.push_str(&escape_concat_path(segment));
        out.push('\n');
    }
    out
}

/// `(offset, span)` of each segment within the attempt, weighted by duration.
fn segment_spans(durations: &[f64]) -> Vec<(f64, f64)> {
    let total: f64 = durations.iter().sum();
    let mut offset = 0.0;
    durations
        .iter()
        .map(|d| {
            let span = if total > 0.0 {
                SEGMENT_SHARE * d / total
            } else {
                SEGMENT_SHARE / durations.len() as f64
            };
            let out = (offset, span);
            offset += span;
            out
        })
        .collect()
}

impl PrimaryEncoder {
    async fn render_segments(&self, request: &EncodeRequest) -> Result<Vec<PathBuf>, EncodeError> {
        let runner = request.runner();
        let params = &request.params;

        let clips: Vec<(f64, Transition)> = request
            .timeline
            .clips()
            .into_iter()
            .map(|(duration, transition)| match transition {
                Transition::Dissolve => (duration, Transition::Fade),
                other => (duration, other),
            })
            .collect();
        let edges = plan_edges(&clips);

        let work_dir = absolute(&request.work_dir, TIER)?;
        let mut segments = Vec::with_capacity(edges.len());
        let durations: Vec<f64> = edges.iter().map(|e| e.duration).collect();
        let spans = segment_spans(&durations);

        // Sequential: one encoder process per job at a time
        for ((scene, edge), (offset, span)) in request.timeline.scenes.iter().zip(&edges).zip(spans) {
            check_cancelled(request, TIER)?;

            let segment = work_dir.join(format!("segment-{:03}.mp4", scene.index));
            let graph = format!(
                "[0:v]{}[v];[1:a]{}[a]",
                video_conform_chain(params, edge),
                audio_conform_chain(edge)
            );

            let cmd = FfmpegCommand::new(&segment)
                .input_with(
                    visual_input_args(scene, edge.duration, params.frame_rate),
                    absolute(&scene.visual, TIER)?,
                )
                .input(absolute(&scene.audio.path, TIER)?)
                .filter_complex(graph)
                .map("[v]")
                .map("[a]")
                .output_args(params.to_ffmpeg_args());

            debug!(scene_id = scene.scene.scene_id, segment = %segment.display(), "Rendering segment");

            let progress = request.scoped_progress(offset, span);
            let length = edge.duration;
            runner
                .run_with_progress(&cmd, move |p| {
                    if let Some(progress) = &progress {
                        progress.report(p.fraction(length));
                    }
                })
                .await
                .map_err(|e| segment_error(scene.scene.scene_id, e))?;
            request.report_progress(offset + span);
            segments.push(segment);
        }

        Ok(segments)
    }
}

fn segment_error(scene_id: u32, err: MediaError) -> EncodeError {
    let mut error = EncodeError::from_media(TIER, err);
    error.message = format!("scene {} segment: {}", scene_id, error.message);
    error
}

#[async_trait]
impl EncoderBackend for PrimaryEncoder {
    fn tier(&self) -> EncoderTier {
        TIER
    }

    async fn encode(&self, request: &EncodeRequest) -> Result<PathBuf, EncodeError> {
        check_cancelled(request, TIER)?;
        if request.timeline.scenes.is_empty() {
            return Err(EncodeError::new(TIER, EncodeErrorKind::Internal, "empty timeline"));
        }

        let segments = self.render_segments(request).await?;

        let manifest = absolute(&request.work_dir, TIER)?.join("concat.txt");
        tokio::fs::write(&manifest, concat_manifest(&segments))
            .await
            .map_err(|e| EncodeError::from_media(TIER, MediaError::Io(e)))?;
        let metadata = write_metadata_file(request, TIER).await?;

        let cmd = FfmpegCommand::new(&request.output)
            .input_with(["-f", "concat", "-safe", "0"], &manifest)
            .input(&metadata)
            .map("0:v")
            .map("0:a")
            .output_args(["-map_metadata", "1", "-map_chapters", "1"])
            .codec_copy()
            .output_args(muxer_args(&request.output));

        check_cancelled(request, TIER)?;
        request
            .runner()
            .run(&cmd)
            .await
            .map_err(|e| EncodeError::from_media(TIER, e))?;
        request.report_progress(1.0);

        info!(
            segments = segments.len(),
            output = %request.output.display(),
            "Primary encode finished"
        );

        Ok(request.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoders::test_support::request;
    use tempfile::TempDir;

    #[test]
    fn test_escape_concat_path() {
        assert_eq!(
            escape_concat_path(Path::new("/tmp/job 1/it's:a\"b#c\\d.mp4")),
            "/tmp/job\\ 1/it\\'s\\:a\\\"b\\#c\\\\d.mp4"
        );
        assert_eq!(escape_concat_path(Path::new("/plain/seg.mp4")), "/plain/seg.mp4");
    }

    #[test]
    fn test_concat_manifest() {
        let manifest = concat_manifest(&[PathBuf::from("/w/segment-000.mp4"), PathBuf::from("/w/a b.mp4")]);
        assert_eq!(
            manifest,
            "ffconcat version 1.0\nfile /w/segment-000.mp4\nfile /w/a\\ b.mp4\n"
        );
    }

    #[test]
    fn test_segment_spans_follow_duration() {
        let spans = segment_spans(&[1.0, 3.0]);
        assert_eq!(spans.len(), 2);
        assert!((spans[0].0).abs() < 1e-9);
        assert!((spans[0].1 - 0.2375).abs() < 1e-9);
        assert!((spans[1].0 - 0.2375).abs() < 1e-9);
        assert!((spans[1].0 + spans[1].1 - SEGMENT_SHARE).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_binary_is_binary_unavailable() {
        let dir = TempDir::new().unwrap();
        let mut req = request(dir.path(), &[(2.0, Transition::Cut)]);
        req.ffmpeg = "/nonexistent/vcompose-ffmpeg".to_string();

        let err = PrimaryEncoder.encode(&req).await.unwrap_err();
        assert_eq!(err.backend, EncoderTier::Primary);
        assert_eq!(err.kind, EncodeErrorKind::BinaryUnavailable);
        assert!(err.message.contains("scene 1 segment"));
    }

    #[tokio::test]
    async fn test_cancelled_request() {
        let dir = TempDir::new().unwrap();
        let (_tx, rx) = tokio::sync::watch::channel(true);
        let mut req = request(dir.path(), &[(2.0, Transition::Cut)]);
        req.cancel = Some(rx);

        let err = PrimaryEncoder.encode(&req).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}

//! Secondary tier: the whole timeline composed in-process.
//!
//! Scenes are decoded through the linked libav libraries, joined with their
//! requested transitions frame by frame and encoded in one pass. It does not
//! depend on the FFmpeg CLI, so it still runs when the primary tier's
//! subprocess toolchain is missing or broken.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

use vcompose_models::EncoderTier;

use super::{absolute, check_cancelled, EncodeRequest, EncoderBackend};
use crate::error::{EncodeError, EncodeErrorKind};
use crate::filters::plan_edges;
use crate::native::{self, load_still, ClipVisual, NativeClip, NativeJob};

const TIER: EncoderTier = EncoderTier::Secondary;

#[derive(Debug, Clone, Copy, Default)]
pub struct SecondaryEncoder;

impl SecondaryEncoder {
    /// Clips with planned transition edges; still visuals are loaded at the output size.
    fn build_job(&self, request: &EncodeRequest) -> Result<NativeJob, EncodeError> {
        let timeline = &request.timeline;
        let resolution = request.params.resolution;
        let edges = plan_edges(&timeline.clips());

        let clips = timeline
            .scenes
            .iter()
            .zip(edges)
            .map(|(scene, edges)| {
                let path = absolute(&scene.visual, TIER)?;
                let visual = if scene.visual_is_still() {
                    ClipVisual::Still(load_still(&path, resolution).map_err(|e| EncodeError::from_media(TIER, e))?)
                } else {
                    ClipVisual::Video(path)
                };
                Ok(NativeClip {
                    visual,
                    audio: absolute(&scene.audio.path, TIER)?,
                    edges,
                })
            })
            .collect::<Result<Vec<_>, EncodeError>>()?;

        Ok(NativeJob {
            clips,
            params: request.params.clone(),
            metadata: request.metadata.clone(),
            chapters: timeline.chapters.clone(),
            output: absolute(&request.output, TIER)?,
        })
    }
}

#[async_trait]
impl EncoderBackend for SecondaryEncoder {
    fn tier(&self) -> EncoderTier {
        TIER
    }

    async fn encode(&self, request: &EncodeRequest) -> Result<PathBuf, EncodeError> {
        check_cancelled(request, TIER)?;
        if request.timeline.scenes.is_empty() {
            return Err(EncodeError::new(TIER, EncodeErrorKind::Internal, "empty timeline"));
        }

        let job = self.build_job(request)?;
        let scenes = job.clips.len();
        native::compose(job, request.stop_signal(), request.progress.clone())
            .await
            .map_err(|e| EncodeError::from_media(TIER, e))?;

        info!(
            scenes,
            output = %request.output.display(),
            "Secondary encode finished"
        );

        Ok(request.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoders::test_support::request;
    use crate::placeholder::write_silent_wav;
    use crate::progress::EncodeProgress;
    use image::{Rgb, RgbImage};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use vcompose_models::{Transition, NARRATION_CHANNELS, NARRATION_SAMPLE_RATE};

    #[test]
    fn test_job_carries_transition_edges() {
        let dir = TempDir::new().unwrap();
        let req = request(
            dir.path(),
            &[(4.0, Transition::Cut), (4.0, Transition::Dissolve), (2.0, Transition::Fade)],
        );

        let job = SecondaryEncoder.build_job(&req).unwrap();
        assert_eq!(job.clips.len(), 3);
        assert_eq!(job.chapters.len(), 3);
        assert!(matches!(job.clips[0].visual, ClipVisual::Video(_)));

        // Outgoing clip is padded by the dissolve so total length is preserved
        assert_eq!(job.clips[0].edges.tail_pad, 0.5);
        assert_eq!(job.clips[1].edges.dissolve_in, Some(0.5));
        assert!(job.clips[2].edges.fade_in.is_some());
        assert!(job.clips.iter().all(|c| c.audio.is_absolute()));
    }

    #[test]
    fn test_still_visual_loaded_at_output_size() {
        let dir = TempDir::new().unwrap();
        let mut req = request(dir.path(), &[(2.0, Transition::Cut)]);
        let still = dir.path().join("slide.png");
        RgbImage::from_pixel(16, 16, Rgb([200, 0, 0])).save(&still).unwrap();
        Arc::make_mut(&mut req.timeline).scenes[0].visual = still;

        let job = SecondaryEncoder.build_job(&req).unwrap();
        match &job.clips[0].visual {
            ClipVisual::Still(canvas) => {
                assert_eq!(canvas.width, req.params.resolution.width);
                assert_eq!(canvas.height, req.params.resolution.height);
            }
            ClipVisual::Video(_) => panic!("png should load as a still"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_request() {
        let dir = TempDir::new().unwrap();
        let (_tx, rx) = tokio::sync::watch::channel(true);
        let mut req = request(dir.path(), &[(2.0, Transition::Cut)]);
        req.cancel = Some(rx);

        let err = SecondaryEncoder.encode(&req).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    #[ignore = "requires libav with libx264"]
    async fn test_encodes_without_cli() {
        let dir = TempDir::new().unwrap();
        let mut req = request(dir.path(), &[(1.0, Transition::Cut), (1.0, Transition::Dissolve)]);
        let timeline = Arc::make_mut(&mut req.timeline);
        for (i, scene) in timeline.scenes.iter_mut().enumerate() {
            let still = dir.path().join(format!("slide-{}.png", i));
            RgbImage::from_pixel(32, 18, Rgb([40 * i as u8, 80, 120])).save(&still).unwrap();
            scene.visual = still;
            write_silent_wav(&scene.audio.path, 1.0, NARRATION_SAMPLE_RATE, NARRATION_CHANNELS).unwrap();
        }
        req.ffmpeg = "/nonexistent/vcompose-ffmpeg".to_string();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        req.progress = Some(EncodeProgress::new(move |f| sink.lock().unwrap().push(f)));

        let output = SecondaryEncoder.encode(&req).await.unwrap();
        assert!(std::fs::metadata(&output).unwrap().len() > 0);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.last().copied(), Some(1.0));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}

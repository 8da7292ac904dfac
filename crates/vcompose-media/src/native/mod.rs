//! In-process media through the linked libav libraries (ffmpeg-next).
//!
//! Nothing here spawns a subprocess, so these paths keep working when the
//! FFmpeg CLI is missing or misconfigured. Builds without the `libav`
//! feature report [`MediaError::LibavUnavailable`] instead.

#[cfg(feature = "libav")]
mod libav;

use async_trait::async_trait;
use image::imageops::FilterType;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use vcompose_models::{ChapterMarker, EncodingParams, JobMetadata, Resolution};

use crate::command::{is_cancelled, CancelReceiver};
use crate::compose::{fit_within, Canvas};
use crate::error::{MediaError, MediaResult};
use crate::filters::ClipEdges;
use crate::probe::{MediaInfo, MediaProbe};
use crate::progress::EncodeProgress;

/// Whether this build links libav.
pub const fn available() -> bool {
    cfg!(feature = "libav")
}

/// Visual source of one clip.
#[derive(Debug, Clone)]
pub enum ClipVisual {
    /// Decoded frame by frame
    Video(PathBuf),
    /// Already at the output resolution
    Still(Canvas),
}

#[derive(Debug, Clone)]
pub struct NativeClip {
    pub visual: ClipVisual,
    pub audio: PathBuf,
    pub edges: ClipEdges,
}

/// A full composition, ready to encode.
#[derive(Debug, Clone)]
pub struct NativeJob {
    pub clips: Vec<NativeClip>,
    pub params: EncodingParams,
    pub metadata: JobMetadata,
    pub chapters: Vec<ChapterMarker>,
    pub output: PathBuf,
}

/// Stop conditions polled between frames of a blocking composition.
#[derive(Debug, Clone)]
pub struct StopSignal {
    cancel: Option<CancelReceiver>,
    deadline: Option<Instant>,
    timeout_secs: u64,
    abandoned: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new(cancel: Option<CancelReceiver>, timeout_secs: u64) -> Self {
        let timeout_secs = timeout_secs.max(1);
        Self {
            cancel,
            deadline: Instant::now().checked_add(Duration::from_secs(timeout_secs)),
            timeout_secs,
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Guard that stops the worker thread once the awaiting task is dropped.
    pub fn guard(&self) -> AbandonGuard {
        AbandonGuard(Arc::clone(&self.abandoned))
    }

    pub fn check(&self) -> MediaResult<()> {
        if self.abandoned.load(Ordering::Relaxed) || is_cancelled(self.cancel.as_ref()) {
            return Err(MediaError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(MediaError::Timeout(self.timeout_secs));
        }
        Ok(())
    }
}

/// Marks a [`StopSignal`] abandoned on drop.
#[derive(Debug)]
pub struct AbandonGuard(Arc<AtomicBool>);

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Encode `job` on a blocking thread.
pub async fn compose(job: NativeJob, stop: StopSignal, progress: Option<EncodeProgress>) -> MediaResult<()> {
    stop.check()?;
    let _guard = stop.guard();
    debug!(clips = job.clips.len(), output = %job.output.display(), "Composing in-process");

    tokio::task::spawn_blocking(move || compose_blocking(&job, &stop, progress.as_ref()))
        .await
        .map_err(|e| MediaError::internal(format!("in-process composer failed: {}", e)))?
}

#[cfg(feature = "libav")]
fn compose_blocking(job: &NativeJob, stop: &StopSignal, progress: Option<&EncodeProgress>) -> MediaResult<()> {
    libav::compose(job, stop, progress)
}

#[cfg(not(feature = "libav"))]
fn compose_blocking(_job: &NativeJob, _stop: &StopSignal, _progress: Option<&EncodeProgress>) -> MediaResult<()> {
    Err(MediaError::LibavUnavailable("built without the libav feature".to_string()))
}

/// Load an image and letterbox it to `resolution`.
pub fn load_still(path: &Path, resolution: Resolution) -> MediaResult<Canvas> {
    let image = image::open(path)?.to_rgb8();
    let (w, h) = fit_within(image.width(), image.height(), resolution.width, resolution.height);
    let scaled = image::imageops::resize(&image, w, h, FilterType::Triangle);
    Ok(Canvas::letterbox(&Canvas::from_image(&scaled), resolution.width, resolution.height))
}

/// [`MediaProbe`] reading container and stream headers through libav.
#[derive(Debug, Clone, Copy, Default)]
pub struct LibavProbe;

#[async_trait]
impl MediaProbe for LibavProbe {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || probe_blocking(&path))
            .await
            .map_err(|e| MediaError::internal(format!("libav probe failed: {}", e)))?
    }
}

#[cfg(feature = "libav")]
fn probe_blocking(path: &Path) -> MediaResult<MediaInfo> {
    libav::probe(path)
}

#[cfg(not(feature = "libav"))]
fn probe_blocking(_path: &Path) -> MediaResult<MediaInfo> {
    Err(MediaError::LibavUnavailable("built without the libav feature".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;
    use tokio::sync::watch;

    #[test]
    fn test_stop_signal_cancel_and_abandon() {
        let (tx, rx) = watch::channel(false);
        let stop = StopSignal::new(Some(rx), 60);
        assert!(stop.check().is_ok());

        tx.send(true).unwrap();
        assert!(matches!(stop.check(), Err(MediaError::Cancelled)));

        let stop = StopSignal::new(None, 60);
        drop(stop.guard());
        assert!(matches!(stop.check(), Err(MediaError::Cancelled)));
    }

    #[test]
    fn test_stop_signal_deadline() {
        let mut stop = StopSignal::new(None, 5);
        stop.deadline = Some(Instant::now());
        assert!(matches!(stop.check(), Err(MediaError::Timeout(5))));
    }

    #[test]
    fn test_load_still_letterboxes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tall.png");
        RgbImage::from_pixel(10, 20, Rgb([255, 0, 0])).save(&path).unwrap();

        let canvas = load_still(&path, Resolution::new(40, 20)).unwrap();
        assert_eq!((canvas.width, canvas.height), (40, 20));
        assert_eq!(canvas.pixel(0, 10), [0, 0, 0]);
        assert_eq!(canvas.pixel(20, 10), [255, 0, 0]);
    }

    #[tokio::test]
    async fn test_libav_missing_file() {
        let err = LibavProbe.probe(Path::new("/nonexistent/clip.mp4")).await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}

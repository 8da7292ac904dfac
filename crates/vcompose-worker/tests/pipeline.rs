//! End-to-end composition against a real FFmpeg install.
//!
//! Run with `cargo test -p vcompose-worker --test pipeline -- --ignored`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

use vcompose_media::{
    EncodeError, EncodeErrorKind, EncodeRequest, EncoderBackend, PrimaryEncoder, TertiaryEncoder,
};
use vcompose_models::{
    ArtifactKind, AttemptOutcome, CompositionJob, CompositionResult, CompositionStatus, EncoderTier,
    JobMetadata, QualityRequest, SceneAsset, Transition,
};
use vcompose_worker::{CompositionOrchestrator, WorkerConfig};

const MISSING_FFMPEG: &str = "/nonexistent/ffmpeg";

/// A tier whose toolchain is missing entirely.
struct Disabled(EncoderTier);

#[async_trait]
impl EncoderBackend for Disabled {
    fn tier(&self) -> EncoderTier {
        self.0
    }

    async fn encode(&self, _request: &EncodeRequest) -> Result<PathBuf, EncodeError> {
        Err(EncodeError::new(self.0, EncodeErrorKind::BinaryUnavailable, "toolchain not installed"))
    }
}

fn ffmpeg(args: &[&str]) {
    let status = Command::new("ffmpeg")
        .args(["-y", "-hide_banner", "-v", "error"])
        .args(args)
        .status()
        .expect("ffmpeg not runnable");
    assert!(status.success(), "ffmpeg {:?} failed", args);
}

fn make_visual(dir: &Path, name: &str, seconds: u32) -> PathBuf {
    let path = dir.join(name);
    let source = format!("testsrc=size=1280x720:rate=30:duration={}", seconds);
    ffmpeg(&[
        "-f", "lavfi", "-i", &source,
        "-c:v", "libx264", "-preset", "ultrafast", "-pix_fmt", "yuv420p",
        path.to_str().unwrap(),
    ]);
    path
}

fn make_narration(dir: &Path, name: &str, seconds: u32) -> PathBuf {
    let path = dir.join(name);
    let source = format!("sine=frequency=440:duration={}", seconds);
    ffmpeg(&[
        "-f", "lavfi", "-i", &source,
        "-ar", "44100", "-ac", "2",
        path.to_str().unwrap(),
    ]);
    path
}

fn config(dir: &TempDir) -> WorkerConfig {
    WorkerConfig {
        work_dir: dir.path().join("work"),
        ..WorkerConfig::from_env()
    }
}

/// Timeline preparation keeps a working CLI; the given tiers get a missing one.
fn config_breaking(dir: &TempDir, primary: bool, tertiary: bool) -> WorkerConfig {
    WorkerConfig {
        primary_ffmpeg_bin: primary.then(|| MISSING_FFMPEG.to_string()),
        tertiary_ffmpeg_bin: tertiary.then(|| MISSING_FFMPEG.to_string()),
        ..config(dir)
    }
}

fn job(scenes: Vec<SceneAsset>, output: PathBuf) -> CompositionJob {
    CompositionJob::new(scenes, output)
        .with_quality(QualityRequest::preset("low"))
        .with_metadata(JobMetadata {
            title: "Pipeline test".to_string(),
            description: "End-to-end composition".to_string(),
            tags: vec!["test".to_string()],
        })
}

fn outcomes(result: &CompositionResult) -> Vec<(EncoderTier, AttemptOutcome)> {
    result.attempts.iter().map(|a| (a.backend_name, a.outcome)).collect()
}

fn probe_chapter_count(path: &Path) -> usize {
    let output = Command::new("ffprobe")
        .args(["-v", "error", "-print_format", "json", "-show_chapters"])
        .arg(path)
        .output()
        .expect("ffprobe not runnable");
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    value["chapters"].as_array().map(|c| c.len()).unwrap_or(0)
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_three_full_scenes_succeed_on_primary() {
    let dir = TempDir::new().unwrap();
    let scenes = (1..=3)
        .map(|i| {
            SceneAsset::new(i, 10.0)
                .with_visual(make_visual(dir.path(), &format!("v{}.mp4", i), 10))
                .with_narration(make_narration(dir.path(), &format!("n{}.wav", i), 10))
        })
        .collect();
    let output = dir.path().join("out.mp4");

    let result = CompositionOrchestrator::new(config(&dir))
        .run(&job(scenes, output.clone()))
        .await;

    assert_eq!(result.status, CompositionStatus::Success, "{:?}", result.error_detail);
    assert_eq!(outcomes(&result), vec![(EncoderTier::Primary, AttemptOutcome::Success)]);
    assert!((result.effective_duration - 30.0).abs() < 0.05);

    let starts: Vec<f64> = result.chapters.iter().map(|c| c.start_time).collect();
    assert_eq!(starts, vec![0.0, 10.0, 20.0]);
    assert_eq!(probe_chapter_count(&output), 3);

    let measured = result.validation.measured_duration.unwrap();
    assert!((measured - 30.0).abs() <= 1.0 / 30.0 + 1e-3, "measured {}", measured);
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_missing_narration_gets_silence() {
    let dir = TempDir::new().unwrap();
    let scenes = vec![
        SceneAsset::new(1, 8.0)
            .with_visual(make_visual(dir.path(), "v1.mp4", 8))
            .with_narration(make_narration(dir.path(), "n1.wav", 8)),
        SceneAsset::new(2, 8.0)
            .with_visual(make_visual(dir.path(), "v2.mp4", 8))
            .with_transition(Transition::Fade),
    ];
    let output = dir.path().join("out.mp4");

    let result = CompositionOrchestrator::new(config(&dir))
        .run(&job(scenes, output))
        .await;

    assert!(result.is_success(), "{:?}", result.error_detail);
    assert!((result.effective_duration - 16.0).abs() < 0.05);
    assert!(result.validation.audio_valid);
    assert!(
        !result.warnings.iter().any(|w| w.contains("audio")),
        "{:?}",
        result.warnings
    );
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_unavailable_primary_falls_back_to_secondary() {
    let dir = TempDir::new().unwrap();
    let scenes = vec![
        SceneAsset::new(1, 3.0).with_visual(make_visual(dir.path(), "v1.mp4", 3)),
        SceneAsset::new(2, 3.0).with_transition(Transition::Dissolve),
    ];

    let result = CompositionOrchestrator::new(config_breaking(&dir, true, false))
        .run(&job(scenes, dir.path().join("out.mp4")))
        .await;

    assert_eq!(result.status, CompositionStatus::Success, "{:?}", result.error_detail);
    assert_eq!(
        outcomes(&result),
        vec![
            (EncoderTier::Primary, AttemptOutcome::Failure),
            (EncoderTier::Secondary, AttemptOutcome::Success),
        ]
    );
    let detail = result.attempts[0].error_detail.as_deref().unwrap();
    assert!(detail.contains("binary_unavailable"), "{}", detail);
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_secondary_encodes_with_cli_missing_for_every_tier() {
    let dir = TempDir::new().unwrap();
    let scenes = vec![
        SceneAsset::new(1, 2.0).with_narration(make_narration(dir.path(), "n1.wav", 2)),
        SceneAsset::new(2, 2.0).with_transition(Transition::Fade),
    ];

    let result = CompositionOrchestrator::new(config_breaking(&dir, true, true))
        .run(&job(scenes, dir.path().join("out.mp4")))
        .await;

    assert_eq!(result.tier, Some(EncoderTier::Secondary), "{:?}", result.error_detail);
    assert!(result.validation.codec_valid);
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_tertiary_output_is_valid_when_others_fail() {
    let dir = TempDir::new().unwrap();
    let scenes = vec![
        SceneAsset::new(1, 2.0).with_title("Opening"),
        SceneAsset::new(2, 2.0).with_narration(make_narration(dir.path(), "n2.wav", 2)),
    ];
    let backends: Vec<Arc<dyn EncoderBackend>> = vec![
        Arc::new(PrimaryEncoder),
        Arc::new(Disabled(EncoderTier::Secondary)),
        Arc::new(TertiaryEncoder::new(true)),
    ];

    let result = CompositionOrchestrator::new(config_breaking(&dir, true, false))
        .with_backends(backends)
        .run(&job(scenes, dir.path().join("out.mp4")))
        .await;

    assert!(result.is_success(), "{:?}", result.error_detail);
    assert_eq!(result.tier, Some(EncoderTier::Tertiary));
    assert!(result.validation.format_valid);
    assert!(result.validation.codec_valid);
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_tertiary_muxes_in_process_without_cli() {
    let dir = TempDir::new().unwrap();
    let scenes = vec![SceneAsset::new(1, 2.0).with_title("Opening"), SceneAsset::new(2, 2.0)];
    let backends: Vec<Arc<dyn EncoderBackend>> = vec![
        Arc::new(PrimaryEncoder),
        Arc::new(Disabled(EncoderTier::Secondary)),
        Arc::new(TertiaryEncoder::new(true)),
    ];

    let result = CompositionOrchestrator::new(config_breaking(&dir, true, true))
        .with_backends(backends)
        .run(&job(scenes, dir.path().join("out.mp4")))
        .await;

    assert!(result.is_success(), "{:?}", result.error_detail);
    assert_eq!(result.tier, Some(EncoderTier::Tertiary));
    assert_eq!(probe_chapter_count(&dir.path().join("out.mp4")), 2);
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_all_tiers_unavailable_is_degraded() {
    let dir = TempDir::new().unwrap();
    let scenes = vec![SceneAsset::new(1, 2.0), SceneAsset::new(2, 2.0)];
    let output = dir.path().join("out.mp4");
    let backends: Vec<Arc<dyn EncoderBackend>> = EncoderTier::ORDER
        .into_iter()
        .map(|tier| Arc::new(Disabled(tier)) as Arc<dyn EncoderBackend>)
        .collect();

    let result = CompositionOrchestrator::new(config(&dir))
        .with_backends(backends)
        .run(&job(scenes, output.clone()))
        .await;

    assert_eq!(result.status, CompositionStatus::Degraded);
    assert!(result.attempts.len() >= 6);
    assert_ne!(result.artifact, ArtifactKind::None);
    assert!(std::fs::metadata(&output).unwrap().len() > 0);
    assert!(result.error_detail.is_some());
}

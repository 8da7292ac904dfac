//! FFprobe media information.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

use crate::command::DEFAULT_FFPROBE;
use crate::error::{MediaError, MediaResult};

/// Video stream details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStreamInfo {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub pix_fmt: Option<String>,
    /// Frame rate (fps)
    pub fps: f64,
}

/// Audio stream details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    pub codec: String,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    /// Stream duration when the container reports one
    pub duration: Option<f64>,
}

/// Media file information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Demuxer names, e.g. `mov,mp4,m4a,3gp,3g2,mj2`
    pub format_name: String,
    /// Duration in seconds, when parseable
    pub duration: Option<f64>,
    /// File size in bytes
    pub size: u64,
    /// Bitrate in bits/second
    pub bitrate: u64,
    /// First video stream, if any
    pub video: Option<VideoStreamInfo>,
    /// First audio stream, if any
    pub audio: Option<AudioStreamInfo>,
}

impl MediaInfo {
    /// Whether the demuxer list names `container` (e.g. `mp4`, `matroska`).
    pub fn format_matches(&self, container: &str) -> bool {
        self.format_name
            .split(',')
            .any(|name| name.trim().eq_ignore_ascii_case(container))
    }

    /// Best-known duration: container first, then the audio stream.
    pub fn best_duration(&self) -> Option<f64> {
        self.duration
            .or_else(|| self.audio.as_ref().and_then(|a| a.duration))
            .filter(|d| d.is_finite() && *d > 0.0)
    }
}

/// Something that can inspect a media file.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo>;
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
    duration: Option<String>,
}

/// [`MediaProbe`] backed by the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    binary: String,
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new(DEFAULT_FFPROBE)
    }
}

impl FfprobeProbe {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        // Check FFprobe exists
        let binary = which::which(&self.binary)
            .map_err(|_| MediaError::FfprobeNotFound(self.binary.clone()))?;

        let output = Command::new(binary)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(MediaError::FfprobeFailed {
                message: format!("FFprobe failed for {}", path.display()),
                stderr: Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            });
        }

        parse_probe_output(&output.stdout)
    }
}

/// Tries `primary`, then `fallback` when the primary's tool is missing or fails.
#[derive(Clone)]
pub struct FallbackProbe {
    primary: Arc<dyn MediaProbe>,
    fallback: Arc<dyn MediaProbe>,
}

impl FallbackProbe {
    pub fn new(primary: Arc<dyn MediaProbe>, fallback: Arc<dyn MediaProbe>) -> Self {
        Self { primary, fallback }
    }
}

impl std::fmt::Debug for FallbackProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackProbe").finish_non_exhaustive()
    }
}

#[async_trait]
impl MediaProbe for FallbackProbe {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        match self.primary.probe(path).await {
            Err(err @ (MediaError::FfprobeNotFound(_) | MediaError::FfprobeFailed { .. })) => {
                debug!(path = %path.display(), error = %err, "Falling back to in-process media inspection");
                self.fallback.probe(path).await
            }
            other => other,
        }
    }
}

/// Parse `ffprobe -print_format json` output.
pub fn parse_probe_output(stdout: &[u8]) -> MediaResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .map(|s| VideoStreamInfo {
            codec: s.codec_name.clone().unwrap_or_default(),
            width: s.width.unwrap_or(0),
            height: s.height.unwrap_or(0),
            pix_fmt: s.pix_fmt.clone(),
            fps: s
                .avg_frame_rate
                .as_deref()
                .and_then(parse_frame_rate)
                .or_else(|| s.r_frame_rate.as_deref().and_then(parse_frame_rate))
                .unwrap_or(0.0),
        });

    let audio = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .map(|s| AudioStreamInfo {
            codec: s.codec_name.clone().unwrap_or_default(),
            sample_rate: s.sample_rate.as_deref().and_then(|r| r.parse().ok()),
            channels: s.channels,
            duration: s.duration.as_deref().and_then(parse_seconds),
        });

    Ok(MediaInfo {
        format_name: probe.format.format_name.unwrap_or_default(),
        duration: probe.format.duration.as_deref().and_then(parse_seconds),
        size: probe
            .format
            .size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        bitrate: probe
            .format
            .bit_rate
            .as_deref()
            .and_then(|b| b.parse().ok())
            .unwrap_or(0),
        video,
        audio,
    })
}

fn parse_seconds(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|d| d.is_finite() && *d >= 0.0)
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok().filter(|f: &f64| *f > 0.0)
}

//! Video encoding parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::preset::PresetError;

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "192k";
/// Default pixel format (widest player compatibility)
pub const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";
/// Default output frame rate
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Sample rate every narration track is resampled to.
pub const NARRATION_SAMPLE_RATE: u32 = 44_100;
/// Channel count of every narration track.
pub const NARRATION_CHANNELS: u16 = 2;

/// Output resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// FFmpeg `WxH` size string.
    pub fn to_ffmpeg_size(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = PresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PresetError::invalid(format!("resolution '{}' is not WxH", s));

        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.parse().map_err(|_| invalid())?;
        let height: u32 = h.parse().map_err(|_| invalid())?;

        if width == 0 || height == 0 {
            return Err(PresetError::invalid(format!(
                "resolution '{}' must have positive dimensions",
                s
            )));
        }

        Ok(Self { width, height })
    }
}

/// x264/x265 speed preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SpeedPreset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl SpeedPreset {
    pub const ALL: [SpeedPreset; 9] = [
        SpeedPreset::Ultrafast,
        SpeedPreset::Superfast,
        SpeedPreset::Veryfast,
        SpeedPreset::Faster,
        SpeedPreset::Fast,
        SpeedPreset::Medium,
        SpeedPreset::Slow,
        SpeedPreset::Slower,
        SpeedPreset::Veryslow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpeedPreset::Ultrafast => "ultrafast",
            SpeedPreset::Superfast => "superfast",
            SpeedPreset::Veryfast => "veryfast",
            SpeedPreset::Faster => "faster",
            SpeedPreset::Fast => "fast",
            SpeedPreset::Medium => "medium",
            SpeedPreset::Slow => "slow",
            SpeedPreset::Slower => "slower",
            SpeedPreset::Veryslow => "veryslow",
        }
    }
}

impl fmt::Display for SpeedPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpeedPreset {
    type Err = PresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == needle)
            .ok_or_else(|| PresetError::invalid(format!("unknown speed preset '{}'", s)))
    }
}

/// Quality tier a set of parameters was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Low,
    Medium,
    High,
    /// Parameters no longer match a built-in tier.
    Custom,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Low => "low",
            QualityTier::Medium => "medium",
            QualityTier::High => "high",
            QualityTier::Custom => "custom",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete encoding parameters shared by every encoder tier.
///
/// Produced by [`crate::preset::resolve`]; treat as immutable once resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EncodingParams {
    pub tier: QualityTier,
    pub resolution: Resolution,
    /// Target video bitrate, always `<digits>k`
    pub video_bitrate: String,
    /// Constant Rate Factor (0-51, lower is better)
    pub crf: u8,
    pub speed_preset: SpeedPreset,
    pub frame_rate: u32,
    pub video_codec: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub pixel_format: String,
}

impl EncodingParams {
    /// Video bitrate in kbit/s.
    pub fn video_bitrate_kbps(&self) -> Option<u32> {
        self.video_bitrate.strip_suffix('k')?.parse().ok()
    }

    /// One frame interval in seconds.
    pub fn frame_interval(&self) -> f64 {
        1.0 / self.frame_rate.max(1) as f64
    }

    /// Whether `crf` and `resolution` still match the tier they claim.
    pub fn is_consistent_with_tier(&self) -> bool {
        match crate::preset::tier_spec(self.tier) {
            Some(spec) => spec.crf == self.crf && spec.resolution == self.resolution,
            None => true,
        }
    }

    /// Parameters for the single retry cycle: one tier lower in bitrate and
    /// resolution. The lowest tier drops to a 480p floor.
    pub fn relaxed(&self) -> EncodingParams {
        let next = match self.tier {
            QualityTier::High => crate::preset::tier_spec(QualityTier::Medium),
            QualityTier::Medium => crate::preset::tier_spec(QualityTier::Low),
            QualityTier::Low | QualityTier::Custom => None,
        };

        match next {
            Some(spec) => EncodingParams {
                tier: spec.tier,
                resolution: spec.resolution,
                video_bitrate: spec.video_bitrate.to_string(),
                crf: spec.crf,
                speed_preset: spec.speed_preset,
                ..self.clone()
            },
            None => EncodingParams {
                tier: QualityTier::Custom,
                resolution: Resolution::new(854, 480),
                video_bitrate: "1500k".to_string(),
                crf: 32,
                speed_preset: SpeedPreset::Veryfast,
                ..self.clone()
            },
        }
    }

    /// Identifier ffprobe reports for the configured video encoder.
    pub fn expected_video_codec(&self) -> &str {
        probe_codec_name(&self.video_codec)
    }

    /// Identifier ffprobe reports for the configured audio encoder.
    pub fn expected_audio_codec(&self) -> &str {
        probe_codec_name(&self.audio_codec)
    }

    /// Convert to FFmpeg output arguments.
    ///
    /// CRF drives quality; the bitrate caps it through `-maxrate`/`-bufsize`.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args = vec![
            "-c:v".to_string(),
            self.video_codec.clone(),
            "-preset".to_string(),
            self.speed_preset.as_str().to_string(),
            "-crf".to_string(),
            self.crf.to_string(),
        ];

        if let Some(kbps) = self.video_bitrate_kbps() {
            args.extend_from_slice(&[
                "-maxrate".to_string(),
                format!("{}k", kbps),
                "-bufsize".to_string(),
                format!("{}k", kbps.saturating_mul(2)),
            ]);
        }

        args.extend_from_slice(&[
            "-pix_fmt".to_string(),
            self.pixel_format.clone(),
            "-r".to_string(),
            self.frame_rate.to_string(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
            "-ar".to_string(),
            NARRATION_SAMPLE_RATE.to_string(),
            "-ac".to_string(),
            NARRATION_CHANNELS.to_string(),
        ]);

        args
    }
}

/// Map an FFmpeg encoder name to the codec name ffprobe reports.
pub fn probe_codec_name(encoder: &str) -> &str {
    match encoder {
        "libx264" | "libx264rgb" | "h264_nvenc" | "h264_qsv" | "h264_vaapi"
        | "h264_videotoolbox" => "h264",
        "libx265" | "hevc_nvenc" | "hevc_qsv" | "hevc_vaapi" | "hevc_videotoolbox" => "hevc",
        "libvpx" => "vp8",
        "libvpx-vp9" => "vp9",
        "libaom-av1" | "libsvtav1" | "librav1e" => "av1",
        "aac" | "libfdk_aac" => "aac",
        "libopus" => "opus",
        "libmp3lame" => "mp3",
        "libvorbis" => "vorbis",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::resolve;
    use std::collections::BTreeMap;

    #[test]
    fn test_resolution_parse() {
        let res: Resolution = "1920x1080".parse().unwrap();
        assert_eq!(res, Resolution::new(1920, 1080));
        assert_eq!(res.to_string(), "1920x1080");

        assert!("1920".parse::<Resolution>().is_err());
        assert!("0x1080".parse::<Resolution>().is_err());
        assert!("-1x1080".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_speed_preset_parse() {
        assert_eq!("Slow".parse::<SpeedPreset>().unwrap(), SpeedPreset::Slow);
        assert!("warp".parse::<SpeedPreset>().is_err());
    }

    #[test]
    fn test_ffmpeg_args() {
        let params = resolve("medium", &BTreeMap::new()).unwrap();
        let args = params.to_ffmpeg_args();
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"-crf".to_string()));
        assert!(args.contains(&"23".to_string()));
        assert!(args.contains(&"5500k".to_string()));
        assert!(args.contains(&"11000k".to_string()));
        assert!(args.contains(&"yuv420p".to_string()));
    }

    #[test]
    fn test_relaxed_steps_down_one_tier() {
        let high = resolve("high", &BTreeMap::new()).unwrap();
        let relaxed = high.relaxed();
        assert_eq!(relaxed.tier, QualityTier::Medium);
        assert_eq!(relaxed.video_bitrate, "5500k");

        let low = resolve("low", &BTreeMap::new()).unwrap();
        let floor = low.relaxed();
        assert_eq!(floor.tier, QualityTier::Custom);
        assert_eq!(floor.resolution, Resolution::new(854, 480));
        assert!(floor.video_bitrate_kbps().unwrap() < low.video_bitrate_kbps().unwrap());
    }

    #[test]
    fn test_probe_codec_names() {
        assert_eq!(probe_codec_name("libx264"), "h264");
        assert_eq!(probe_codec_name("aac"), "aac");
        assert_eq!(probe_codec_name("prores"), "prores");
    }
}

//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use vcompose_models::EncoderTier;

/// Hard wall-clock limit for one encoder attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutPolicy {
    pub floor: Duration,
    pub ceiling: Duration,
    /// Seconds of budget per second of output media
    pub per_media_second: f64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(60),
            ceiling: Duration::from_secs(1800),
            per_media_second: 6.0,
        }
    }
}

impl TimeoutPolicy {
    /// `clamp(total_duration * per_media_second, floor, ceiling)`.
    pub fn for_duration(&self, total_duration: f64) -> Duration {
        let secs = total_duration * self.per_media_second;
        let scaled = if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs.min(self.ceiling.as_secs_f64()))
        } else {
            self.floor
        };
        scaled.clamp(self.floor, self.ceiling.max(self.floor))
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Maximum scenes prepared in parallel within a single job
    pub max_scene_parallel: usize,
    /// Parent directory for per-job temp directories
    pub work_dir: PathBuf,
    /// FFmpeg binary name or path
    pub ffmpeg_bin: String,
    /// Primary tier binary, when it differs from `ffmpeg_bin`
    pub primary_ffmpeg_bin: Option<String>,
    /// Tertiary tier binary, when it differs from `ffmpeg_bin`
    pub tertiary_ffmpeg_bin: Option<String>,
    /// FFprobe binary name or path
    pub ffprobe_bin: String,
    /// Encoder attempt timeout
    pub timeout: TimeoutPolicy,
    /// Outputs smaller than this fail validation
    pub min_output_bytes: u64,
    /// Duration mismatch tolerated as a warning, in seconds
    pub soft_duration_tolerance: f64,
    /// Narration loudness target (LUFS)
    pub target_lufs: f64,
    /// Allowed loudness deviation before normalization (LU)
    pub loudness_tolerance_lu: f64,
    /// Draw titles on tertiary frames
    pub tertiary_text_overlay: bool,
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            max_scene_parallel: default_parallelism(),
            work_dir: std::env::temp_dir().join("vcompose"),
            ffmpeg_bin: "ffmpeg".to_string(),
            primary_ffmpeg_bin: None,
            tertiary_ffmpeg_bin: None,
            ffprobe_bin: "ffprobe".to_string(),
            timeout: TimeoutPolicy::default(),
            min_output_bytes: 1024,
            soft_duration_tolerance: 0.5,
            target_lufs: -16.0,
            loudness_tolerance_lu: 1.5,
            tertiary_text_overlay: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key lookup (environment, tests).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            max_concurrent_jobs: lookup("VCOMPOSE_MAX_JOBS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_concurrent_jobs),
            max_scene_parallel: lookup("VCOMPOSE_MAX_SCENE_PARALLEL")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_scene_parallel),
            work_dir: lookup("VCOMPOSE_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            ffmpeg_bin: lookup("VCOMPOSE_FFMPEG").unwrap_or(defaults.ffmpeg_bin),
            primary_ffmpeg_bin: lookup("VCOMPOSE_PRIMARY_FFMPEG").filter(|s| !s.trim().is_empty()),
            tertiary_ffmpeg_bin: lookup("VCOMPOSE_TERTIARY_FFMPEG").filter(|s| !s.trim().is_empty()),
            ffprobe_bin: lookup("VCOMPOSE_FFPROBE").unwrap_or(defaults.ffprobe_bin),
            timeout: TimeoutPolicy {
                floor: Duration::from_secs(
                    lookup("VCOMPOSE_TIMEOUT_FLOOR_SECS")
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(60),
                ),
                ceiling: Duration::from_secs(
                    lookup("VCOMPOSE_TIMEOUT_CEILING_SECS")
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(1800),
                ),
                per_media_second: lookup("VCOMPOSE_TIMEOUT_PER_MEDIA_SEC")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.timeout.per_media_second),
            },
            min_output_bytes: lookup("VCOMPOSE_MIN_OUTPUT_BYTES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.min_output_bytes),
            soft_duration_tolerance: defaults.soft_duration_tolerance,
            target_lufs: lookup("VCOMPOSE_TARGET_LUFS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.target_lufs),
            loudness_tolerance_lu: lookup("VCOMPOSE_LOUDNESS_TOLERANCE_LU")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.loudness_tolerance_lu),
            tertiary_text_overlay: lookup("VCOMPOSE_TERTIARY_TEXT")
                .map(|s| !matches!(s.trim().to_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(defaults.tertiary_text_overlay),
        }
    }

    /// FFmpeg CLI handed to `tier`. The secondary tier composes in-process
    /// and only sees this name in logs.
    pub fn ffmpeg_for(&self, tier: EncoderTier) -> &str {
        let specific = match tier {
            EncoderTier::Primary => self.primary_ffmpeg_bin.as_deref(),
            EncoderTier::Secondary => None,
            EncoderTier::Tertiary => self.tertiary_ffmpeg_bin.as_deref(),
        };
        specific.unwrap_or(&self.ffmpeg_bin)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_jobs == 0 {
            return Err("VCOMPOSE_MAX_JOBS must be at least 1".to_string());
        }
        if self.max_scene_parallel == 0 {
            return Err("VCOMPOSE_MAX_SCENE_PARALLEL must be at least 1".to_string());
        }
        if self.timeout.floor > self.timeout.ceiling {
            return Err(format!(
                "timeout floor ({:?}) exceeds ceiling ({:?})",
                self.timeout.floor, self.timeout.ceiling
            ));
        }
        if !self.timeout.per_media_second.is_finite() || self.timeout.per_media_second <= 0.0 {
            return Err("VCOMPOSE_TIMEOUT_PER_MEDIA_SEC must be positive".to_string());
        }
        if !self.target_lufs.is_finite() || self.target_lufs > 0.0 {
            return Err("VCOMPOSE_TARGET_LUFS must be a negative loudness".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_from_lookup_defaults() {
        let config = WorkerConfig::from_lookup(|_| None);
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.ffmpeg_bin, "ffmpeg");
        assert_eq!(config.timeout, TimeoutPolicy::default());
        assert!(config.tertiary_text_overlay);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let env: HashMap<&str, &str> = [
            ("VCOMPOSE_MAX_JOBS", "8"),
            ("VCOMPOSE_FFMPEG", "/opt/ffmpeg/bin/ffmpeg"),
            ("VCOMPOSE_TIMEOUT_FLOOR_SECS", "10"),
            ("VCOMPOSE_TERTIARY_TEXT", "off"),
            ("VCOMPOSE_MIN_OUTPUT_BYTES", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = WorkerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.max_concurrent_jobs, 8);
        assert_eq!(config.ffmpeg_bin, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.timeout.floor, Duration::from_secs(10));
        assert!(!config.tertiary_text_overlay);
        assert_eq!(config.min_output_bytes, 1024);
    }

    #[test]
    fn test_per_tier_ffmpeg() {
        let env: HashMap<&str, &str> = [
            ("VCOMPOSE_FFMPEG", "/usr/bin/ffmpeg"),
            ("VCOMPOSE_PRIMARY_FFMPEG", "/broken/ffmpeg"),
            ("VCOMPOSE_TERTIARY_FFMPEG", " "),
        ]
        .into_iter()
        .collect();

        let config = WorkerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.ffmpeg_for(EncoderTier::Primary), "/broken/ffmpeg");
        assert_eq!(config.ffmpeg_for(EncoderTier::Secondary), "/usr/bin/ffmpeg");
        assert_eq!(config.ffmpeg_for(EncoderTier::Tertiary), "/usr/bin/ffmpeg");
        assert!(config.tertiary_ffmpeg_bin.is_none());
    }

    #[test]
    fn test_timeout_policy_clamps() {
        let policy = TimeoutPolicy::default();
        assert_eq!(policy.for_duration(1.0), Duration::from_secs(60));
        assert_eq!(policy.for_duration(30.0), Duration::from_secs(180));
        assert_eq!(policy.for_duration(10_000.0), Duration::from_secs(1800));
        assert_eq!(policy.for_duration(f64::NAN), Duration::from_secs(60));
    }

    #[test]
    fn test_validate_rejects_inverted_timeouts() {
        let config = WorkerConfig {
            timeout: TimeoutPolicy {
                floor: Duration::from_secs(100),
                ceiling: Duration::from_secs(10),
                per_media_second: 6.0,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

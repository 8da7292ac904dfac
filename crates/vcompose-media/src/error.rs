//! Error types for media operations.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use vcompose_models::EncoderTier;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg binary not found: {0}")]
    FfmpegNotFound(String),

    #[error("FFprobe binary not found: {0}")]
    FfprobeNotFound(String),

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid media file: {0}")]
    InvalidMedia(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("libav unavailable: {0}")]
    LibavUnavailable(String),

    #[cfg(feature = "libav")]
    #[error("libav error: {0}")]
    Libav(#[from] ffmpeg_next::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an invalid media error.
    pub fn invalid_media(message: impl Into<String>) -> Self {
        Self::InvalidMedia(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Captured stderr, when the failure came from a subprocess.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            MediaError::FfmpegFailed { stderr, .. } | MediaError::FfprobeFailed { stderr, .. } => {
                stderr.as_deref()
            }
            _ => None,
        }
    }
}

/// Fatal timeline preparation failures. No encoder can run without a timeline.
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("Invalid scene list: {0}")]
    InvalidScenes(String),

    #[error("Scene {scene_id}: asset unreadable ({path}): {reason}")]
    AssetUnreadable {
        scene_id: u32,
        path: PathBuf,
        reason: String,
    },

    #[error("Scene {scene_id}: duration unparseable for {path}")]
    DurationUnparseable { scene_id: u32, path: PathBuf },

    #[error("Scene {scene_id}: placeholder synthesis failed: {source}")]
    Placeholder {
        scene_id: u32,
        #[source]
        source: MediaError,
    },

    #[error("Scene {scene_id}: audio sync failed: {source}")]
    AudioSync {
        scene_id: u32,
        #[source]
        source: MediaError,
    },

    #[error("Timeline preparation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why an encoder attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodeErrorKind {
    /// Encoder binary (or library) missing on this host
    BinaryUnavailable,
    NonZeroExit,
    /// In-process codec call failed
    Codec,
    Timeout,
    Cancelled,
    Io,
    /// Encoder task panicked
    Panicked,
    Internal,
}

impl EncodeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncodeErrorKind::BinaryUnavailable => "binary_unavailable",
            EncodeErrorKind::NonZeroExit => "non_zero_exit",
            EncodeErrorKind::Codec => "codec_error",
            EncodeErrorKind::Timeout => "timeout",
            EncodeErrorKind::Cancelled => "cancelled",
            EncodeErrorKind::Io => "io",
            EncodeErrorKind::Panicked => "panicked",
            EncodeErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for EncodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one encoder tier.
#[derive(Debug, Clone, Error)]
#[error("{backend} encoder failed ({kind}): {message}")]
pub struct EncodeError {
    pub backend: EncoderTier,
    pub kind: EncodeErrorKind,
    pub message: String,
    pub stderr_excerpt: Option<String>,
    pub exit_code: Option<i32>,
}

impl EncodeError {
    pub fn new(backend: EncoderTier, kind: EncodeErrorKind, message: impl Into<String>) -> Self {
        Self {
            backend,
            kind,
            message: message.into(),
            stderr_excerpt: None,
            exit_code: None,
        }
    }

    /// Translate a media error raised inside a tier.
    pub fn from_media(backend: EncoderTier, err: MediaError) -> Self {
        let kind = match &err {
            MediaError::FfmpegNotFound(_) | MediaError::FfprobeNotFound(_) | MediaError::LibavUnavailable(_) => {
                EncodeErrorKind::BinaryUnavailable
            }
            #[cfg(feature = "libav")]
            MediaError::Libav(_) => EncodeErrorKind::Codec,
            MediaError::FfmpegFailed { .. } | MediaError::FfprobeFailed { .. } => {
                EncodeErrorKind::NonZeroExit
            }
            MediaError::Timeout(_) => EncodeErrorKind::Timeout,
            MediaError::Cancelled => EncodeErrorKind::Cancelled,
            MediaError::Io(_) | MediaError::FileNotFound(_) => EncodeErrorKind::Io,
            _ => EncodeErrorKind::Internal,
        };

        let (stderr_excerpt, exit_code) = match &err {
            MediaError::FfmpegFailed {
                stderr, exit_code, ..
            } => (stderr.clone(), *exit_code),
            MediaError::FfprobeFailed { stderr, .. } => (stderr.clone(), None),
            _ => (None, None),
        };

        Self {
            backend,
            kind,
            message: err.to_string(),
            stderr_excerpt,
            exit_code,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == EncodeErrorKind::Cancelled
    }

    /// Single-line detail for the attempt audit log.
    pub fn detail(&self) -> String {
        let mut detail = self.to_string();
        if let Some(code) = self.exit_code {
            detail.push_str(&format!(" [exit {}]", code));
        }
        if let Some(stderr) = self.stderr_excerpt.as_deref().filter(|s| !s.is_empty()) {
            detail.push_str(" | stderr: ");
            detail.push_str(&stderr.replace('\n', " / "));
        }
        detail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_error_from_media() {
        let err = EncodeError::from_media(
            EncoderTier::Primary,
            MediaError::ffmpeg_failed("boom", Some("line1\nline2".to_string()), Some(1)),
        );
        assert_eq!(err.kind, EncodeErrorKind::NonZeroExit);
        assert_eq!(err.exit_code, Some(1));
        let detail = err.detail();
        assert!(detail.contains("primary encoder failed"));
        assert!(detail.contains("[exit 1]"));
        assert!(detail.contains("line1 / line2"));
    }

    #[test]
    fn test_missing_binary_kind() {
        let err = EncodeError::from_media(
            EncoderTier::Secondary,
            MediaError::FfmpegNotFound("/nope/ffmpeg".to_string()),
        );
        assert_eq!(err.kind, EncodeErrorKind::BinaryUnavailable);
        assert!(!err.is_cancelled());

        let err = EncodeError::from_media(EncoderTier::Tertiary, MediaError::Timeout(30));
        assert_eq!(err.kind, EncodeErrorKind::Timeout);

        let err = EncodeError::from_media(
            EncoderTier::Secondary,
            MediaError::LibavUnavailable("no libx264".to_string()),
        );
        assert_eq!(err.kind, EncodeErrorKind::BinaryUnavailable);
    }
}

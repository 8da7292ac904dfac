//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Preset error: {0}")]
    Preset(#[from] vcompose_models::PresetError),

    #[error("Timeline error: {0}")]
    Timeline(#[from] vcompose_media::TimelineError),

    #[error("Media error: {0}")]
    Media(#[from] vcompose_media::MediaError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    /// Check if this error came from a cancellation request.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            WorkerError::Cancelled
                | WorkerError::Timeline(vcompose_media::TimelineError::Cancelled)
                | WorkerError::Media(vcompose_media::MediaError::Cancelled)
        )
    }
}

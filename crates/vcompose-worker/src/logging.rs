//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for composition jobs with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};
use vcompose_models::{EncoderTier, JobId};

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
}

impl JobLogger {
    /// Create a new job logger for a specific job and operation.
    ///
    /// # Arguments
    /// * `job_id` - The unique identifier for the job
    /// * `operation` - The type of operation (e.g., "composition")
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Create a new job logger from a string job ID.
    pub fn from_string(job_id: &str, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    /// Log the start of an encoder attempt.
    pub fn log_attempt(&self, tier: EncoderTier, cycle: u8) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            tier = %tier,
            cycle,
            "Encoder attempt started"
        );
    }

    /// Log a failed encoder attempt. Never fatal on its own.
    pub fn log_attempt_failed(&self, tier: EncoderTier, cycle: u8, detail: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            tier = %tier,
            cycle,
            "Encoder attempt failed: {}", detail
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "composition");

        assert_eq!(logger.job_id(), job_id.to_string());
        assert_eq!(logger.operation(), "composition");
    }

    #[test]
    fn test_job_logger_from_string() {
        let logger = JobLogger::from_string("job-123", "composition");

        assert_eq!(logger.job_id(), "job-123");
        assert_eq!(logger.operation(), "composition");
    }
}

//! Job progress events.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Orchestrator stage reported to progress consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Init,
    PrepareTimeline,
    TryPrimary,
    TrySecondary,
    TryTertiary,
    Validate,
    Retry,
    Success,
    ExhaustedMock,
    Cancelled,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Init => "init",
            JobStage::PrepareTimeline => "prepare_timeline",
            JobStage::TryPrimary => "try_primary",
            JobStage::TrySecondary => "try_secondary",
            JobStage::TryTertiary => "try_tertiary",
            JobStage::Validate => "validate",
            JobStage::Retry => "retry",
            JobStage::Success => "success",
            JobStage::ExhaustedMock => "exhausted_mock",
            JobStage::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Success | JobStage::ExhaustedMock | JobStage::Cancelled)
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discrete progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressUpdate {
    pub stage: JobStage,
    /// 0-100, never decreasing within a job
    pub percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_stages() {
        assert!(JobStage::Success.is_terminal());
        assert!(JobStage::ExhaustedMock.is_terminal());
        assert!(!JobStage::Retry.is_terminal());
        assert_eq!(JobStage::TryPrimary.to_string(), "try_primary");
    }
}

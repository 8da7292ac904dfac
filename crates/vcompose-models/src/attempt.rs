//! Encoder tiers and the per-job attempt audit log.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::encoding::QualityTier;
use crate::validation::ValidationResult;

/// Encoder backend, ordered by capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EncoderTier {
    /// Concat demuxer + per-scene filter graphs
    Primary,
    /// Whole-timeline clip composition with transitions
    Secondary,
    /// Static frame per scene, always attempted last
    Tertiary,
}

impl EncoderTier {
    /// Tiers in strict priority order.
    pub const ORDER: [EncoderTier; 3] = [EncoderTier::Primary, EncoderTier::Secondary, EncoderTier::Tertiary];

    pub fn as_str(&self) -> &'static str {
        match self {
            EncoderTier::Primary => "primary",
            EncoderTier::Secondary => "secondary",
            EncoderTier::Tertiary => "tertiary",
        }
    }

    /// The tier tried after this one fails, within one cycle.
    pub fn next(&self) -> Option<EncoderTier> {
        match self {
            EncoderTier::Primary => Some(EncoderTier::Secondary),
            EncoderTier::Secondary => Some(EncoderTier::Tertiary),
            EncoderTier::Tertiary => None,
        }
    }
}

impl fmt::Display for EncoderTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one encode attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// One encoder invocation, including its validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AttemptRecord {
    pub backend_name: EncoderTier,
    /// 0 for the first pass, 1 for the relaxed retry cycle
    pub cycle: u8,
    /// Quality tier of the parameters used
    pub params_tier: QualityTier,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl AttemptRecord {
    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

/// Append-only attempt log for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct AttemptLog {
    records: Vec<AttemptRecord>,
}

impl AttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: AttemptRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[AttemptRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&AttemptRecord> {
        self.records.last()
    }

    pub fn into_records(self) -> Vec<AttemptRecord> {
        self.records
    }

    /// One line per attempt, used as the error detail of degraded results.
    pub fn summary(&self) -> String {
        self.records
            .iter()
            .map(|r| {
                let outcome = match r.outcome {
                    AttemptOutcome::Success => "success",
                    AttemptOutcome::Failure => "failure",
                };
                match &r.error_detail {
                    Some(detail) => format!("[cycle {}] {}: {} ({})", r.cycle, r.backend_name, outcome, detail),
                    None => format!("[cycle {}] {}: {}", r.cycle, r.backend_name, outcome),
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

//! FFmpeg progress parsing and encode progress callbacks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Progress information from FFmpeg's `-progress` stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Output time as string (HH:MM:SS.microseconds)
    pub out_time: String,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Fraction of `total_secs` already written, clamped to `0.0..=1.0`.
    pub fn fraction(&self, total_secs: f64) -> f64 {
        if total_secs <= 0.0 || !total_secs.is_finite() {
            return 0.0;
        }
        if self.is_complete {
            return 1.0;
        }
        (self.out_time_ms as f64 / 1000.0 / total_secs).clamp(0.0, 1.0)
    }
}

/// Receives the completed fraction (`0.0..=1.0`) of one encoder attempt.
#[derive(Clone)]
pub struct EncodeProgress(Arc<dyn Fn(f64) + Send + Sync>);

impl EncodeProgress {
    pub fn new(callback: impl Fn(f64) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    pub fn report(&self, fraction: f64) {
        if fraction.is_finite() {
            (self.0)(fraction.clamp(0.0, 1.0));
        }
    }

    /// Progress over `span` of the whole attempt, starting at `offset`.
    pub fn scoped(&self, offset: f64, span: f64) -> EncodeProgress {
        let inner = self.clone();
        EncodeProgress::new(move |fraction| inner.report(offset + fraction * span))
    }
}

impl fmt::Debug for EncodeProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncodeProgress")
    }
}

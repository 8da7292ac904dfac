//! Chapter markers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A named timestamp embedded in the output for navigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChapterMarker {
    pub title: String,
    /// Start time in seconds
    pub start_time: f64,
    /// End time in seconds (start of the next chapter, or the total duration)
    pub end_time: f64,
}

impl ChapterMarker {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Start in milliseconds, for `TIMEBASE=1/1000` metadata.
    pub fn start_ms(&self) -> u64 {
        (self.start_time * 1000.0).round().max(0.0) as u64
    }

    /// End in milliseconds, for `TIMEBASE=1/1000` metadata.
    pub fn end_ms(&self) -> u64 {
        (self.end_time * 1000.0).round().max(0.0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millisecond_conversion() {
        let marker = ChapterMarker {
            title: "Intro".to_string(),
            start_time: 1.2345,
            end_time: 10.0,
        };
        assert_eq!(marker.start_ms(), 1235);
        assert_eq!(marker.end_ms(), 10_000);
        assert!((marker.duration() - 8.7655).abs() < 1e-9);
    }
}

//! Job progress reporting.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use vcompose_models::{JobStage, ProgressUpdate};

/// Sends progress updates to an optional consumer.
///
/// Percentages are clamped so a job's reported progress never decreases,
/// including across fallbacks and the retry cycle.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    last: Arc<AtomicU8>,
}

impl ProgressSink {
    /// Sink paired with a receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                last: Arc::new(AtomicU8::new(0)),
            },
            rx,
        )
    }

    /// Sink that only tracks the percentage.
    pub fn noop() -> Self {
        Self::default()
    }

    /// Emit an update. Returns the percentage actually reported.
    pub fn emit(&self, stage: JobStage, percent: u8, message: Option<String>) -> u8 {
        let requested = percent.min(100);
        let previous = self.last.fetch_max(requested, Ordering::SeqCst);
        let percent = previous.max(requested);

        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is listening; the job carries on.
            let _ = tx.send(ProgressUpdate {
                stage,
                percent,
                message,
            });
        }
        percent
    }

    /// Emit only when `percent` is above everything reported so far.
    pub fn advance(&self, stage: JobStage, percent: u8, message: Option<String>) -> bool {
        let requested = percent.min(100);
        if self.last.fetch_max(requested, Ordering::SeqCst) >= requested {
            return false;
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send(ProgressUpdate {
                stage,
                percent: requested,
                message,
            });
        }
        true
    }

    pub fn last_percent(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let (sink, mut rx) = ProgressSink::channel();
        sink.emit(JobStage::TryPrimary, 20, None);
        sink.emit(JobStage::Validate, 26, None);
        sink.emit(JobStage::Retry, 10, Some("relaxed".to_string()));
        drop(sink);

        let mut percents = Vec::new();
        while let Some(update) = rx.recv().await {
            percents.push(update.percent);
        }
        assert_eq!(percents, vec![20, 26, 26]);
    }

    #[tokio::test]
    async fn test_advance_skips_repeats() {
        let (sink, mut rx) = ProgressSink::channel();
        assert!(sink.advance(JobStage::TryPrimary, 21, None));
        assert!(!sink.advance(JobStage::TryPrimary, 21, None));
        assert!(!sink.advance(JobStage::TryPrimary, 20, None));
        assert!(sink.advance(JobStage::TryPrimary, 23, None));
        drop(sink);

        let mut percents = Vec::new();
        while let Some(update) = rx.recv().await {
            percents.push(update.percent);
        }
        assert_eq!(percents, vec![21, 23]);
    }

    #[test]
    fn test_noop_sink_clamps() {
        let sink = ProgressSink::noop();
        assert_eq!(sink.emit(JobStage::Success, 250, None), 100);
        assert_eq!(sink.last_percent(), 100);
    }
}

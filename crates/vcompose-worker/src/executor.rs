//! Job executor.
//!
//! Runs many composition jobs concurrently, bounded by a semaphore. Each
//! job owns its cancel signal and temp directory; nothing mutable is shared
//! between jobs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use vcompose_models::{CompositionJob, CompositionResult, JobId, ProgressUpdate};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::orchestrator::CompositionOrchestrator;
use crate::progress::ProgressSink;

/// Executes jobs on the Tokio runtime.
pub struct JobExecutor {
    orchestrator: Arc<CompositionOrchestrator>,
    job_semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
}

impl JobExecutor {
    pub fn new(orchestrator: CompositionOrchestrator) -> Self {
        let max_jobs = orchestrator.config().max_concurrent_jobs.max(1);
        Self {
            orchestrator: Arc::new(orchestrator),
            job_semaphore: Arc::new(Semaphore::new(max_jobs)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of jobs currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Queue a job. It starts as soon as a slot is free.
    pub fn submit(&self, job: CompositionJob) -> JobHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (progress, progress_rx) = ProgressSink::channel();
        let job_id = job.job_id.clone();

        let orchestrator = Arc::clone(&self.orchestrator);
        let semaphore = Arc::clone(&self.job_semaphore);
        let in_flight = Arc::clone(&self.in_flight);

        debug!(job_id = %job_id, "Job submitted");

        let handle = tokio::spawn(async move {
            // A closed semaphore only happens on shutdown; run unbounded rather than drop the job.
            let _permit = semaphore.acquire_owned().await.ok();

            let running = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            metrics::set_jobs_in_flight(running);
            info!(job_id = %job.job_id, in_flight = running, "Job slot acquired");

            let result = orchestrator.run_with(&job, Some(cancel_rx), progress).await;

            let running = in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            metrics::set_jobs_in_flight(running);
            result
        });

        JobHandle {
            job_id,
            cancel: Arc::new(cancel_tx),
            progress: Some(progress_rx),
            handle,
        }
    }

    /// Run every job and wait for all results, in submission order.
    pub async fn run_all(&self, jobs: Vec<CompositionJob>) -> Vec<WorkerResult<CompositionResult>> {
        let handles: Vec<JobHandle> = jobs.into_iter().map(|job| self.submit(job)).collect();
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.wait().await);
        }
        results
    }
}

/// Cancels a job from anywhere, e.g. a signal handler.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// A submitted job.
pub struct JobHandle {
    job_id: JobId,
    cancel: Arc<watch::Sender<bool>>,
    progress: Option<mpsc::UnboundedReceiver<ProgressUpdate>>,
    handle: JoinHandle<CompositionResult>,
}

impl JobHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Request cancellation. The in-flight encoder, if any, is killed.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel),
        }
    }

    /// Take the progress stream. Returns `None` after the first call.
    pub fn take_progress(&mut self) -> Option<mpsc::UnboundedReceiver<ProgressUpdate>> {
        self.progress.take()
    }

    /// Wait for the job's result.
    pub async fn wait(self) -> WorkerResult<CompositionResult> {
        // Hold the sender until the job finishes so the job never sees a closed channel.
        let _cancel = self.cancel;
        self.handle
            .await
            .map_err(|e| WorkerError::job_failed(format!("job task failed: {}", e)))
    }
}

//! Composition orchestrator.
//!
//! Drives one job through the state machine in [`state`]: timeline
//! preparation, then the encoder tiers in strict priority order, each
//! attempt validated before the next tier is considered. Errors from the
//! components never escape [`CompositionOrchestrator::run`]; they become
//! transitions, and the job ends as success, degraded or cancelled.

mod artifact;
mod state;

pub use artifact::{pick_fallback, EncodedOutput, FailureReport};
pub use state::{
    encode_band_percent, progress_percent, transition, Event, InvalidTransition, Machine, State, ENCODE_BAND,
    MAX_RETRY_CYCLES,
};

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, Instrument};

use vcompose_media::command::{cancelled, is_cancelled};
use vcompose_media::{
    container_for_path, default_backends, move_file, native, AssetPlaceholderGenerator, AudioSyncConfig,
    AudioSyncProcessor, AudioTool, CancelReceiver, EncodeError, EncodeErrorKind, EncodeProgress, EncodeRequest,
    EncoderBackend, FallbackProbe, FfmpegAudioTool, FfmpegRunner, FfmpegSynthesizer, FfprobeProbe, LibavProbe,
    MediaError, MediaProbe, PlaceholderSynthesizer, Timeline, TimelineError, TimelinePreparer, Validator,
    ValidatorConfig,
};
use vcompose_models::{
    ArtifactKind, AttemptLog, AttemptOutcome, AttemptRecord, CompositionJob, CompositionResult,
    CompositionStatus, EncoderTier, EncodingParams, ExpectedOutput, ValidationResult,
};

use crate::config::WorkerConfig;
use crate::logging::JobLogger;
use crate::metrics;
use crate::progress::ProgressSink;

use artifact::write_failure_report;

/// Top-level entry point for composition jobs.
///
/// Holds only read-only collaborators, so one instance can serve many
/// concurrent jobs. Each job gets its own temp directory, removed when the
/// job ends on every path.
pub struct CompositionOrchestrator {
    config: WorkerConfig,
    backends: Vec<Arc<dyn EncoderBackend>>,
    probe: Arc<dyn MediaProbe>,
    synth: Arc<dyn PlaceholderSynthesizer>,
    audio_tool: Arc<dyn AudioTool>,
}

impl CompositionOrchestrator {
    /// Orchestrator backed by the configured FFmpeg binaries.
    ///
    /// Builds linking libav inspect media in-process when `ffprobe` is unusable.
    pub fn new(config: WorkerConfig) -> Self {
        let runner = FfmpegRunner::new().with_binary(&config.ffmpeg_bin);
        let ffprobe: Arc<dyn MediaProbe> = Arc::new(FfprobeProbe::new(config.ffprobe_bin.clone()));
        let probe: Arc<dyn MediaProbe> = if native::available() {
            Arc::new(FallbackProbe::new(ffprobe, Arc::new(LibavProbe)))
        } else {
            ffprobe
        };

        Self {
            backends: default_backends(config.tertiary_text_overlay),
            synth: Arc::new(FfmpegSynthesizer::new(runner.clone())),
            audio_tool: Arc::new(FfmpegAudioTool::new(runner, Arc::clone(&probe))),
            probe,
            config,
        }
    }

    /// Replace the encoder tiers. Tiers without a backend fail immediately.
    pub fn with_backends(mut self, backends: Vec<Arc<dyn EncoderBackend>>) -> Self {
        self.backends = backends;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn MediaProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_synthesizer(mut self, synth: Arc<dyn PlaceholderSynthesizer>) -> Self {
        self.synth = synth;
        self
    }

    pub fn with_audio_tool(mut self, audio_tool: Arc<dyn AudioTool>) -> Self {
        self.audio_tool = audio_tool;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run a job to completion without cancellation or progress reporting.
    pub async fn run(&self, job: &CompositionJob) -> CompositionResult {
        self.run_with(job, None, ProgressSink::noop()).await
    }

    /// Run a job to completion.
    pub async fn run_with(
        &self,
        job: &CompositionJob,
        cancel: Option<CancelReceiver>,
        progress: ProgressSink,
    ) -> CompositionResult {
        let logger = JobLogger::new(&job.job_id, "composition");
        let span = logger.create_span();
        let started = Instant::now();

        let result = self
            .execute(job, JobRun::new(job, logger, progress, cancel))
            .instrument(span)
            .await;

        metrics::record_job(result.status, started.elapsed().as_secs_f64());
        result
    }

    async fn execute(&self, job: &CompositionJob, mut run: JobRun<'_>) -> CompositionResult {
        run.logger.log_start(&format!(
            "{} scenes, preset '{}', output {}",
            job.scenes.len(),
            job.quality.preset,
            job.output_path.display()
        ));
        run.fire(Event::Start);

        if run.cancel_requested() {
            run.fire(Event::CancelRequested);
            return run.cancelled();
        }

        if let Err(reason) = job.validate() {
            run.fire(Event::TimelineFailed);
            return run.exhausted(&[], Some(format!("invalid job: {}", reason))).await;
        }

        let params = match job.quality.resolve() {
            Ok(params) => params,
            Err(e) => {
                run.fire(Event::TimelineFailed);
                return run.exhausted(&[], Some(e.to_string())).await;
            }
        };

        // Dropped on every return below, removing all intermediate files.
        let job_dir = match self.create_job_dir(job).await {
            Ok(dir) => dir,
            Err(e) => {
                run.fire(Event::TimelineFailed);
                return run
                    .exhausted(&[], Some(format!("could not create job directory: {}", e)))
                    .await;
            }
        };

        let prepare_started = Instant::now();
        let timeline = match self
            .prepare_timeline(job, &params, job_dir.path(), run.cancel.clone())
            .await
        {
            Ok(timeline) => Arc::new(timeline),
            Err(TimelineError::Cancelled) => {
                run.fire(Event::CancelRequested);
                return run.cancelled();
            }
            Err(e) => {
                run.logger.log_error(&format!("Timeline preparation failed: {}", e));
                run.fire(Event::TimelineFailed);
                return run.exhausted(&[], Some(e.to_string())).await;
            }
        };

        metrics::record_timeline(
            prepare_started.elapsed().as_secs_f64(),
            timeline.scenes.iter().filter(|s| s.visual_placeholder).count(),
            timeline.scenes.iter().filter(|s| s.audio.placeholder).count(),
        );
        run.timeline = Some(Arc::clone(&timeline));
        run.warnings.extend(timeline.warnings.iter().cloned());
        run.fire(Event::TimelineReady);

        self.encode_loop(job, run, params, timeline, job_dir).await
    }

    async fn encode_loop(
        &self,
        job: &CompositionJob,
        mut run: JobRun<'_>,
        initial: EncodingParams,
        timeline: Arc<Timeline>,
        job_dir: TempDir,
    ) -> CompositionResult {
        let deadline = self.config.timeout.for_duration(timeline.total_duration);
        let validator = Validator::new(
            Arc::clone(&self.probe),
            ValidatorConfig {
                min_file_size: self.config.min_output_bytes,
                soft_duration_tolerance: self.config.soft_duration_tolerance,
            },
        );
        let container = container_for_path(&job.output_path);
        let extension = job
            .output_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4")
            .to_string();

        let mut params = initial;
        let mut outputs: Vec<EncodedOutput> = Vec::new();
        let mut pending: Option<PendingAttempt> = None;

        debug!(deadline_secs = deadline.as_secs_f64(), "Encoder deadline");

        loop {
            let state = run.machine.state();
            if !state.is_terminal() && run.cancel_requested() {
                run.fire(Event::CancelRequested);
                continue;
            }

            match state {
                State::TryEncoder(tier) => {
                    let cycle = run.machine.cycle();
                    run.logger.log_attempt(tier, cycle);

                    let attempt_dir = job_dir.path().join(format!("attempt-{}-{}", cycle, tier));
                    let output = attempt_dir.join(format!("output.{}", extension));
                    let started_at = Utc::now();
                    let clock = Instant::now();

                    let result = match tokio::fs::create_dir_all(&attempt_dir).await {
                        Ok(()) => {
                            let mut request =
                                EncodeRequest::new(Arc::clone(&timeline), params.clone(), &output, &attempt_dir);
                            request.metadata = job.metadata.clone();
                            request.ffmpeg = self.config.ffmpeg_for(tier).to_string();
                            request.timeout_secs = deadline.as_secs().max(1);
                            request.cancel = run.cancel.clone();
                            request.progress = Some(run.encode_progress(tier, cycle));
                            self.run_backend(tier, request, deadline).await
                        }
                        Err(e) => Err(EncodeError::from_media(tier, MediaError::Io(e))),
                    };

                    match result {
                        Ok(path) => {
                            pending = Some(PendingAttempt {
                                path,
                                started_at,
                                clock,
                            });
                            run.fire(Event::EncodeFinished);
                        }
                        Err(err) => {
                            metrics::record_encode_attempt(tier, err.kind.as_str(), clock.elapsed().as_secs_f64());
                            let detail = err.detail();
                            run.record(tier, &params, started_at, AttemptOutcome::Failure, None, Some(detail.clone()));
                            if err.is_cancelled() {
                                run.fire(Event::CancelRequested);
                            } else {
                                run.logger.log_attempt_failed(tier, cycle, &detail);
                                run.fire(Event::EncodeFailed);
                            }
                        }
                    }
                }

                State::Validate(tier) => {
                    let Some(attempt) = pending.take() else {
                        run.fire(Event::ValidationFailed);
                        continue;
                    };

                    let expected = ExpectedOutput::from_params(&params, container, timeline.total_duration);
                    let validation = validator.validate(&attempt.path, &expected).await;
                    let elapsed = attempt.clock.elapsed().as_secs_f64();

                    outputs.push(EncodedOutput {
                        tier,
                        cycle: run.machine.cycle(),
                        path: attempt.path.clone(),
                        params: params.clone(),
                        validation: validation.clone(),
                    });

                    if validation.passes_hard_checks() {
                        metrics::record_encode_attempt(tier, "success", elapsed);
                        run.record(
                            tier,
                            &params,
                            attempt.started_at,
                            AttemptOutcome::Success,
                            Some(validation),
                            None,
                        );
                        run.fire(Event::ValidationPassed);
                    } else {
                        metrics::record_encode_attempt(tier, "invalid", elapsed);
                        let detail = format!("validation failed: {}", validation.errors.join("; "));
                        run.logger.log_attempt_failed(tier, run.machine.cycle(), &detail);
                        run.record(
                            tier,
                            &params,
                            attempt.started_at,
                            AttemptOutcome::Failure,
                            Some(validation),
                            Some(detail),
                        );
                        run.fire(Event::ValidationFailed);
                    }
                }

                State::Retry => {
                    let relaxed = params.relaxed();
                    run.logger.log_warning(&format!(
                        "All tiers failed; retrying with {} {} crf {}",
                        relaxed.resolution, relaxed.video_bitrate, relaxed.crf
                    ));
                    metrics::record_retry_cycle();
                    params = relaxed;
                    run.fire(Event::ParamsRelaxed);
                }

                State::Success => {
                    return match outputs.pop() {
                        Some(winner) => run.succeeded(winner).await,
                        None => run.exhausted(&outputs, Some("no validated output".to_string())).await,
                    };
                }

                State::ExhaustedMock => return run.exhausted(&outputs, None).await,

                State::Cancelled => return run.cancelled(),

                State::Init | State::PrepareTimeline => {
                    return run
                        .exhausted(&outputs, Some(format!("encode loop entered in state {}", state)))
                        .await;
                }
            }
        }
    }

    /// Run one tier as an independent task under a hard deadline.
    ///
    /// Timeout and cancellation abort the task; dropping the encoder future
    /// kills its FFmpeg child.
    async fn run_backend(
        &self,
        tier: EncoderTier,
        request: EncodeRequest,
        deadline: Duration,
    ) -> Result<PathBuf, EncodeError> {
        let Some(backend) = self.backends.iter().find(|b| b.tier() == tier).cloned() else {
            return Err(EncodeError::new(
                tier,
                EncodeErrorKind::BinaryUnavailable,
                "no backend registered for this tier",
            ));
        };

        let cancel = request.cancel.clone();
        let task = tokio::spawn(async move { backend.encode(&request).await });
        let abort = task.abort_handle();

        tokio::select! {
            joined = tokio::time::timeout(deadline, task) => match joined {
                Ok(Ok(result)) => result,
                Ok(Err(e)) if e.is_panic() => Err(EncodeError::new(
                    tier,
                    EncodeErrorKind::Panicked,
                    "encoder task panicked",
                )),
                Ok(Err(e)) => Err(EncodeError::new(tier, EncodeErrorKind::Cancelled, e.to_string())),
                Err(_) => {
                    abort.abort();
                    Err(EncodeError::new(
                        tier,
                        EncodeErrorKind::Timeout,
                        format!("exceeded {:.0}s wall-clock limit", deadline.as_secs_f64()),
                    ))
                }
            },
            _ = cancelled(cancel) => {
                abort.abort();
                Err(EncodeError::new(tier, EncodeErrorKind::Cancelled, "cancelled while encoding"))
            }
        }
    }

    async fn create_job_dir(&self, job: &CompositionJob) -> std::io::Result<TempDir> {
        tokio::fs::create_dir_all(&self.config.work_dir).await?;

        let safe_id: String = job
            .job_id
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();

        let dir = tempfile::Builder::new()
            .prefix(&format!("job-{}-", safe_id))
            .tempdir_in(&self.config.work_dir)?;

        for sub in ["placeholders", "audio"] {
            tokio::fs::create_dir_all(dir.path().join(sub)).await?;
        }
        Ok(dir)
    }

    async fn prepare_timeline(
        &self,
        job: &CompositionJob,
        params: &EncodingParams,
        job_dir: &Path,
        cancel: Option<CancelReceiver>,
    ) -> Result<Timeline, TimelineError> {
        let placeholders = Arc::new(AssetPlaceholderGenerator::new(
            job_dir.join("placeholders"),
            params.resolution,
            params.frame_rate,
            Arc::clone(&self.synth),
        ));
        let audio = AudioSyncProcessor::new(
            Arc::clone(&placeholders),
            Arc::clone(&self.audio_tool),
            AudioSyncConfig {
                target_lufs: self.config.target_lufs,
                tolerance_lu: self.config.loudness_tolerance_lu,
                max_parallel: self.config.max_scene_parallel,
            },
        );

        TimelinePreparer::new(
            placeholders,
            audio,
            Arc::clone(&self.probe),
            self.config.max_scene_parallel,
        )
        .with_cancel(cancel)
        .prepare(&job.scenes, &job_dir.join("audio"))
        .await
    }
}

struct PendingAttempt {
    path: PathBuf,
    started_at: DateTime<Utc>,
    clock: Instant,
}

/// Per-job mutable state. Never shared across jobs.
struct JobRun<'a> {
    job: &'a CompositionJob,
    logger: JobLogger,
    progress: ProgressSink,
    cancel: Option<CancelReceiver>,
    machine: Machine,
    attempts: AttemptLog,
    warnings: Vec<String>,
    timeline: Option<Arc<Timeline>>,
}

impl<'a> JobRun<'a> {
    fn new(
        job: &'a CompositionJob,
        logger: JobLogger,
        progress: ProgressSink,
        cancel: Option<CancelReceiver>,
    ) -> Self {
        Self {
            job,
            logger,
            progress,
            cancel,
            machine: Machine::new(),
            attempts: AttemptLog::new(),
            warnings: Vec::new(),
            timeline: None,
        }
    }

    fn cancel_requested(&self) -> bool {
        is_cancelled(self.cancel.as_ref())
    }

    fn fire(&mut self, event: Event) {
        let from = self.machine.state();
        let state = match self.machine.fire(event) {
            Ok(state) => state,
            Err(e) => {
                self.logger.log_error(&e.to_string());
                self.machine.exhaust();
                self.machine.state()
            }
        };

        let cycle = self.machine.cycle();
        info!(from = %from, to = %state, cycle, "State transition");
        self.progress
            .emit(state.stage(), progress_percent(state, cycle), Some(state.to_string()));
    }

    /// Attempt progress mapped into the tier's band of the job percentage.
    fn encode_progress(&self, tier: EncoderTier, cycle: u8) -> EncodeProgress {
        let sink = self.progress.clone();
        let stage = State::TryEncoder(tier).stage();
        EncodeProgress::new(move |fraction| {
            sink.advance(stage, encode_band_percent(tier, cycle, fraction), None);
        })
    }

    fn record(
        &mut self,
        tier: EncoderTier,
        params: &EncodingParams,
        started_at: DateTime<Utc>,
        outcome: AttemptOutcome,
        validation: Option<ValidationResult>,
        error_detail: Option<String>,
    ) {
        self.attempts.push(AttemptRecord {
            backend_name: tier,
            cycle: self.machine.cycle(),
            params_tier: params.tier,
            started_at,
            finished_at: Utc::now(),
            outcome,
            validation,
            error_detail,
        });
    }

    fn chapters(&self) -> Vec<vcompose_models::ChapterMarker> {
        self.timeline
            .as_ref()
            .map(|t| t.chapters.clone())
            .unwrap_or_default()
    }

    fn effective_duration(&self) -> f64 {
        self.timeline.as_ref().map(|t| t.total_duration).unwrap_or(0.0)
    }

    async fn succeeded(mut self, winner: EncodedOutput) -> CompositionResult {
        let moved = move_file(&winner.path, &self.job.output_path).await;
        if let Err(e) = moved {
            self.logger.log_error(&format!("Could not move output into place: {}", e));
            let detail = format!("validated {} output could not be moved: {}", winner.tier, e);
            return self.result(CompositionStatus::Degraded, ArtifactKind::None, None, Some(detail));
        }

        self.warnings.extend(winner.validation.warnings.iter().cloned());
        self.logger.log_completion(&format!(
            "{} tier, {} attempt(s), {:.2}s",
            winner.tier,
            self.attempts.len(),
            self.effective_duration()
        ));

        let mut result = self.result(CompositionStatus::Success, ArtifactKind::Validated, Some(&winner), None);
        result.validation = winner.validation;
        result
    }

    /// Emit the mock artifact. Never leaves the caller without a flagged result.
    async fn exhausted(mut self, outputs: &[EncodedOutput], cause: Option<String>) -> CompositionResult {
        let summary = self.attempts.summary();
        let detail = match (&cause, summary.is_empty()) {
            (Some(cause), true) => cause.clone(),
            (Some(cause), false) => format!("{}\n{}", cause, summary),
            (None, _) => format!("all encoder tiers failed\n{}", summary),
        };
        self.logger.log_error(&detail);

        if let Some(fallback) = pick_fallback(outputs).await {
            let moved = move_file(&fallback.path, &self.job.output_path).await;
            match moved {
                Ok(()) => {
                    self.logger.log_warning(&format!(
                        "Emitting unvalidated {} output from cycle {}",
                        fallback.tier, fallback.cycle
                    ));
                    self.warnings.extend(fallback.validation.warnings.iter().cloned());
                    let mut result = self.result(
                        CompositionStatus::Degraded,
                        ArtifactKind::UnvalidatedEncode,
                        Some(fallback),
                        Some(detail),
                    );
                    result.validation = fallback.validation.clone();
                    return result;
                }
                Err(e) => self
                    .logger
                    .log_error(&format!("Could not move fallback output: {}", e)),
            }
        }

        let chapters = self.chapters();
        let report = FailureReport {
            job_id: &self.job.job_id,
            status: CompositionStatus::Degraded.as_str(),
            reason: &detail,
            generated_at: Utc::now(),
            attempts: self.attempts.records(),
            chapters: &chapters,
        };

        let written = write_failure_report(&self.job.output_path, &report).await;
        match written {
            Ok(()) => self.result(CompositionStatus::Degraded, ArtifactKind::FailureReport, None, Some(detail)),
            Err(e) => {
                let detail = format!("{}\nfailure report could not be written: {}", detail, e);
                self.result(CompositionStatus::Degraded, ArtifactKind::None, None, Some(detail))
            }
        }
    }

    fn cancelled(self) -> CompositionResult {
        self.logger.log_warning("Job cancelled");
        let detail = format!("cancelled by caller\n{}", self.attempts.summary());
        self.result(
            CompositionStatus::Cancelled,
            ArtifactKind::None,
            None,
            Some(detail.trim_end().to_string()),
        )
    }

    fn result(
        self,
        status: CompositionStatus,
        artifact: ArtifactKind,
        emitted: Option<&EncodedOutput>,
        error_detail: Option<String>,
    ) -> CompositionResult {
        let output_path = match artifact {
            ArtifactKind::None => None,
            _ => Some(self.job.output_path.clone()),
        };

        CompositionResult {
            job_id: self.job.job_id.clone(),
            status,
            artifact,
            output_path,
            tier: emitted.map(|o| o.tier),
            params: emitted.map(|o| o.params.clone()),
            validation: ValidationResult::default(),
            chapters: self.chapters(),
            effective_duration: self.effective_duration(),
            attempts: self.attempts.into_records(),
            warnings: self.warnings,
            error_detail,
        }
    }
}

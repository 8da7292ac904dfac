//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::FfmpegProgress;

/// Default FFmpeg binary looked up on `PATH`.
pub const DEFAULT_FFMPEG: &str = "ffmpeg";
/// Default FFprobe binary looked up on `PATH`.
pub const DEFAULT_FFPROBE: &str = "ffprobe";

/// Stderr lines kept for error excerpts.
const STDERR_TAIL_LINES: usize = 20;
/// Stderr lines kept when the caller wants the full log (analysis passes).
const STDERR_COLLECT_LINES: usize = 4000;

/// Cancellation signal shared by a job; `true` means cancelled.
pub type CancelReceiver = watch::Receiver<bool>;

/// Whether a cancellation signal has fired.
pub fn is_cancelled(cancel: Option<&CancelReceiver>) -> bool {
    cancel.is_some_and(|rx| *rx.borrow())
}

/// Resolve once a cancellation signal fires. Never resolves without one.
pub async fn cancelled(cancel: Option<CancelReceiver>) {
    match cancel {
        Some(mut rx) => {
            let closed = rx.wait_for(|c| *c).await.is_err();
            if closed {
                // Sender dropped: the job can no longer be cancelled
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

/// One FFmpeg input with its input-side options.
#[derive(Debug, Clone)]
struct FfmpegInput {
    args: Vec<String>,
    source: String,
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Inputs in `-i` order
    inputs: Vec<FfmpegInput>,
    /// Output file path
    output: PathBuf,
    /// Output arguments (after all inputs)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
    /// Emit `-progress pipe:2`
    progress: bool,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command writing to `output`.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
            progress: true,
        }
    }

    /// Add a file input.
    pub fn input(self, path: impl AsRef<Path>) -> Self {
        self.input_with(Vec::<String>::new(), path)
    }

    /// Add a file input preceded by input options.
    pub fn input_with<I, S>(mut self, args: I, path: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(FfmpegInput {
            args: args.into_iter().map(Into::into).collect(),
            source: path.as_ref().to_string_lossy().to_string(),
        });
        self
    }

    /// Add a libavfilter source input (`-f lavfi -i <graph>`).
    pub fn lavfi_input(mut self, graph: impl Into<String>) -> Self {
        self.inputs.push(FfmpegInput {
            args: vec!["-f".to_string(), "lavfi".to_string()],
            source: graph.into(),
        });
        self
    }

    /// Number of inputs added so far.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Add output arguments.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set audio filter.
    pub fn audio_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-af").output_arg(filter)
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Map a stream or filter label into the output.
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Copy all streams without re-encoding.
    pub fn codec_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Disable `-progress pipe:2`.
    pub fn without_progress(mut self) -> Self {
        self.progress = false;
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        // Overwrite flag
        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-nostdin".to_string());

        // Log level
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        if self.progress {
            args.push("-progress".to_string());
            args.push("pipe:2".to_string());
        }

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.source.clone());
        }

        args.extend(self.output_args.iter().cloned());

        // Output file
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

enum WaitOutcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Runner for FFmpeg commands with progress tracking, timeout and cancellation.
///
/// Commands are spawned from an explicit argument vector, never through a shell.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    /// Binary name or path
    binary: String,
    /// Working directory for the subprocess
    work_dir: Option<PathBuf>,
    /// Cancellation signal receiver
    cancel_rx: Option<CancelReceiver>,
    /// Timeout in seconds
    timeout_secs: Option<u64>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner using `ffmpeg` from `PATH`.
    pub fn new() -> Self {
        Self {
            binary: DEFAULT_FFMPEG.to_string(),
            work_dir: None,
            cancel_rx: None,
            timeout_secs: None,
        }
    }

    /// Use a specific FFmpeg binary.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Run the subprocess inside `dir`.
    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set cancellation signal if present.
    pub fn with_optional_cancel(mut self, cancel_rx: Option<CancelReceiver>) -> Self {
        self.cancel_rx = cancel_rx;
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs.max(1));
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.execute(cmd, |_| {}, STDERR_TAIL_LINES).await.map(|_| ())
    }

    /// Run an FFmpeg command with progress callback.
    pub async fn run_with_progress<F>(&self, cmd: &FfmpegCommand, progress_callback: F) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        self.execute(cmd, progress_callback, STDERR_TAIL_LINES)
            .await
            .map(|_| ())
    }

    /// Run an FFmpeg command and return its (non-progress) stderr log.
    ///
    /// Used for analysis passes such as `loudnorm` measurement that print
    /// their results to stderr.
    pub async fn run_collect_stderr(&self, cmd: &FfmpegCommand) -> MediaResult<String> {
        let lines = self.execute(cmd, |_| {}, STDERR_COLLECT_LINES).await?;
        Ok(lines.join("\n"))
    }

    async fn execute<F>(&self, cmd: &FfmpegCommand, progress_callback: F, keep_lines: usize) -> MediaResult<Vec<String>>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        let binary = which::which(&self.binary).map_err(|_| MediaError::FfmpegNotFound(self.binary.clone()))?;

        if is_cancelled(self.cancel_rx.as_ref()) {
            return Err(MediaError::Cancelled);
        }

        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", binary.display(), args.join(" "));

        let mut command = Command::new(&binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.work_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MediaError::FfmpegNotFound(self.binary.clone())
            } else {
                MediaError::Io(e)
            }
        })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("stderr not captured"))?;
        let mut reader = BufReader::new(stderr).lines();

        let log_lines: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
        let log_sink = Arc::clone(&log_lines);

        // Spawn stderr parsing task
        let progress_handle = tokio::spawn(async move {
            let mut current_progress = FfmpegProgress::default();

            while let Ok(Some(line)) = reader.next_line().await {
                if is_progress_line(&line) {
                    if let Some(progress) = parse_progress_line(&line, &mut current_progress) {
                        progress_callback(progress);
                    }
                } else if let Ok(mut lines) = log_sink.lock() {
                    if lines.len() == keep_lines {
                        lines.pop_front();
                    }
                    lines.push_back(line);
                }
            }
        });

        // Wait for completion with optional timeout and cancellation
        let result = self.wait_for_completion(&mut child).await;

        // Wait for stderr task to drain
        let _ = progress_handle.await;

        let lines: Vec<String> = log_lines
            .lock()
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default();

        match result {
            Ok(()) => Ok(lines),
            Err(MediaError::FfmpegFailed {
                message, exit_code, ..
            }) => {
                let tail_start = lines.len().saturating_sub(STDERR_TAIL_LINES);
                let excerpt = lines[tail_start..].join("\n");
                Err(MediaError::ffmpeg_failed(
                    message,
                    (!excerpt.is_empty()).then_some(excerpt),
                    exit_code,
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Wait for child process with cancellation and timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<()> {
        let timeout = self.timeout_secs.map(Duration::from_secs);
        let deadline = async {
            match timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status),
            _ = deadline => WaitOutcome::TimedOut,
            _ = cancelled(self.cancel_rx.clone()) => WaitOutcome::Cancelled,
        };

        match outcome {
            WaitOutcome::TimedOut => {
                let secs = self.timeout_secs.unwrap_or_default();
                warn!("FFmpeg timed out after {} seconds, killing process", secs);
                let _ = child.kill().await;
                Err(MediaError::Timeout(secs))
            }
            WaitOutcome::Cancelled => {
                info!("FFmpeg cancelled, killing process");
                let _ = child.kill().await;
                Err(MediaError::Cancelled)
            }
            WaitOutcome::Exited(status) => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    Err(MediaError::ffmpeg_failed(
                        "FFmpeg exited with non-zero status",
                        None,
                        status.code(),
                    ))
                }
            }
        }
    }
}

/// Whether a stderr line belongs to `-progress` key/value output.
fn is_progress_line(line: &str) -> bool {
    match line.trim().split_once('=') {
        Some((key, value)) => {
            !key.is_empty()
                && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !value.contains(' ')
        }
        None => false,
    }
}

/// Parse a progress line from FFmpeg's -progress output.
fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let line = line.trim();

    if let Some((key, value)) = line.split_once('=') {
        match key {
            "out_time_ms" | "out_time_us" => {
                // Both keys carry microseconds in current FFmpeg releases
                if let Ok(us) = value.parse::<i64>() {
                    current.out_time_ms = us / 1000;
                }
            }
            "out_time" => {
                // Format: HH:MM:SS.microseconds
                current.out_time = value.to_string();
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    current.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    current.fps = fps;
                }
            }
            "speed" => {
                // Format: "1.5x" or "N/A"
                if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                    current.speed = speed;
                }
            }
            "progress" => {
                // "continue" or "end"
                if value == "end" {
                    current.is_complete = true;
                }
                return Some(current.clone());
            }
            _ => {}
        }
    }

    None
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg(binary: &str) -> MediaResult<PathBuf> {
    which::which(binary).map_err(|_| MediaError::FfmpegNotFound(binary.to_string()))
}

/// Check if FFprobe is available.
pub fn check_ffprobe(binary: &str) -> MediaResult<PathBuf> {
    which::which(binary).map_err(|_| MediaError::FfprobeNotFound(binary.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("output.mp4")
            .input("input.mp4")
            .lavfi_input("anullsrc=r=44100:cl=stereo")
            .output_args(["-t", "30.000"])
            .video_codec("libx264")
            .map("0:v:0")
            .map("1:a:0");

        let args = cmd.build_args();
        assert_eq!(args.first().map(String::as_str), Some("-y"));
        assert_eq!(args.last().map(String::as_str), Some("output.mp4"));
        assert_eq!(cmd.input_count(), 2);

        let lavfi_pos = args.iter().position(|a| a == "lavfi").unwrap();
        assert_eq!(args[lavfi_pos - 1], "-f");
        assert_eq!(args[lavfi_pos + 1], "-i");
        assert_eq!(args[lavfi_pos + 2], "anullsrc=r=44100:cl=stereo");
        assert!(args.contains(&"30.000".to_string()));
        assert!(args.contains(&"pipe:2".to_string()));
    }

    #[test]
    fn test_input_options_precede_input() {
        let args = FfmpegCommand::new("out.mp4")
            .input_with(["-loop", "1", "-t", "5"], "/tmp/frame.png")
            .without_progress()
            .build_args();

        let i = args.iter().position(|a| a == "/tmp/frame.png").unwrap();
        assert_eq!(args[i - 1], "-i");
        assert_eq!(args[i - 5], "-loop");
        assert!(!args.contains(&"-progress".to_string()));
    }

    #[test]
    fn test_progress_parsing() {
        let mut progress = FfmpegProgress::default();

        parse_progress_line("out_time_us=5000000", &mut progress);
        assert_eq!(progress.out_time_ms, 5000);

        parse_progress_line("speed=1.5x", &mut progress);
        assert!((progress.speed - 1.5).abs() < 0.01);

        parse_progress_line("speed=N/A", &mut progress);
        assert!((progress.speed - 1.5).abs() < 0.01);

        let result = parse_progress_line("progress=end", &mut progress);
        assert!(result.is_some());
        assert!(progress.is_complete);
    }

    #[test]
    fn test_progress_line_detection() {
        assert!(is_progress_line("frame=120"));
        assert!(is_progress_line("out_time=00:00:04.000000"));
        assert!(!is_progress_line("Error opening input file /tmp/a.mp4."));
        assert!(!is_progress_line("[Parsed_loudnorm_0 @ 0x1] \"input_i\" : \"-23.1\","));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let runner = FfmpegRunner::new().with_binary("/nonexistent/vcompose-ffmpeg");
        let cmd = FfmpegCommand::new("/tmp/never.mp4").lavfi_input("nullsrc");
        let err = runner.run(&cmd).await.unwrap_err();
        assert!(matches!(err, MediaError::FfmpegNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_spawn() {
        let (tx, rx) = watch::channel(true);
        assert!(is_cancelled(Some(&rx)));
        drop(tx);

        // `sh` stands in for ffmpeg; cancellation is checked before spawning
        if which::which("sh").is_err() {
            return;
        }
        let runner = FfmpegRunner::new().with_binary("sh").with_optional_cancel(Some(rx));
        let err = runner.run(&FfmpegCommand::new("-")).await.unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));
    }
}

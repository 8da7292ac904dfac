//! Composition CLI.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vcompose_media::{FfprobeProbe, MediaProbe};
use vcompose_models::{resolve, CompositionJob, CompositionStatus};
use vcompose_worker::{metrics, CompositionOrchestrator, JobExecutor, WorkerConfig, WorkerError};

#[derive(Debug, Parser)]
#[command(name = "vcompose", version, about = "Compose scene assets into a single chaptered video")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one or more composition jobs from JSON files
    Compose {
        #[arg(required = true)]
        jobs: Vec<PathBuf>,
        /// Override the output path (single job only)
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Write the composition results as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Resolve a quality preset and print the encoding parameters
    Resolve {
        preset: String,
        /// Field override, e.g. --set crf=20 --set resolution=1280x720
        #[arg(long = "set", value_parser = parse_override)]
        overrides: Vec<(String, serde_json::Value)>,
    },
    /// Probe a media file with ffprobe
    Probe { file: PathBuf },
    /// Print the JSON schema of a composition job
    Schema,
}

fn parse_override(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "vcompose=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Command::Compose { jobs, output, report } => compose(jobs, output, report).await,
        Command::Resolve { preset, overrides } => {
            let overrides: BTreeMap<String, serde_json::Value> = overrides.into_iter().collect();
            let params = resolve(&preset, &overrides)?;
            println!("{}", serde_json::to_string_pretty(&params)?);
            println!("ffmpeg args: {}", params.to_ffmpeg_args().join(" "));
            Ok(0)
        }
        Command::Probe { file } => {
            let config = WorkerConfig::from_env();
            let info = FfprobeProbe::new(config.ffprobe_bin).probe(&file).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(0)
        }
        Command::Schema => {
            let schema = schemars::schema_for!(CompositionJob);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(0)
        }
    }
}

async fn compose(paths: Vec<PathBuf>, output: Option<PathBuf>, report: Option<PathBuf>) -> anyhow::Result<i32> {
    if output.is_some() && paths.len() > 1 {
        anyhow::bail!("--output can only be used with a single job");
    }

    let config = WorkerConfig::from_env();
    config.validate().map_err(WorkerError::config_error)?;
    info!("Worker config: {:?}", config);

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr: SocketAddr = addr.parse()?;
        metrics::init_metrics(addr)?;
        info!(%addr, "Prometheus exporter listening");
    }

    let mut jobs = Vec::with_capacity(paths.len());
    for path in &paths {
        let body = tokio::fs::read(path).await?;
        let mut job: CompositionJob = serde_json::from_slice(&body)
            .map_err(|e| WorkerError::invalid_job(format!("{}: {}", path.display(), e)))?;
        if let Some(output) = &output {
            job.output_path = output.clone();
        }
        jobs.push(job);
    }

    let executor = JobExecutor::new(CompositionOrchestrator::new(config));
    let handles: Vec<_> = jobs.into_iter().map(|job| executor.submit(job)).collect();

    let cancels: Vec<_> = handles.iter().map(|h| h.cancel_handle()).collect();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, cancelling jobs");
            for cancel in cancels {
                cancel.cancel();
            }
        }
    });

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.wait().await?);
    }

    for result in &results {
        match result.status {
            CompositionStatus::Success => info!(
                job_id = %result.job_id,
                tier = ?result.tier,
                "Composition succeeded: {}",
                result.output_path.as_ref().map(|p| p.display().to_string()).unwrap_or_default()
            ),
            CompositionStatus::Degraded => warn!(
                job_id = %result.job_id,
                artifact = ?result.artifact,
                "Composition degraded: {}",
                result.error_detail.as_deref().unwrap_or("")
            ),
            CompositionStatus::Cancelled => warn!(job_id = %result.job_id, "Composition cancelled"),
        }
    }

    let rendered = serde_json::to_string_pretty(&results)?;
    match report {
        Some(path) => tokio::fs::write(&path, rendered).await?,
        None => println!("{}", rendered),
    }

    // 0 all succeeded, 2 any degraded, 1 any cancelled
    let code = if results.iter().any(|r| r.status == CompositionStatus::Cancelled) {
        1
    } else if results.iter().any(|r| r.is_degraded()) {
        2
    } else {
        0
    };
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_override() {
        assert_eq!(
            parse_override("crf=20").unwrap(),
            ("crf".to_string(), serde_json::json!(20))
        );
        assert_eq!(
            parse_override("resolution=1280x720").unwrap(),
            ("resolution".to_string(), serde_json::json!("1280x720"))
        );
        assert!(parse_override("crf").is_err());
    }

    #[test]
    fn test_cli_parses_compose() {
        let cli = Cli::try_parse_from(["vcompose", "compose", "a.json", "b.json", "--report", "r.json"]).unwrap();
        match cli.command {
            Command::Compose { jobs, report, .. } => {
                assert_eq!(jobs.len(), 2);
                assert_eq!(report, Some(PathBuf::from("r.json")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}

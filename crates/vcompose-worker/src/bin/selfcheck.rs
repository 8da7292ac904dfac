use std::path::Path;
use std::process::Command;

use vcompose_media::{check_ffmpeg, check_ffprobe, native};
use vcompose_worker::WorkerConfig;

const REQUIRED_ENCODERS: &[&str] = &["libx264", "aac", "pcm_s16le"];
const REQUIRED_FILTERS: &[&str] = &["loudnorm", "silencedetect", "tpad", "apad", "concat"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();
    config.validate().map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    println!(
        "vcompose-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;

    let ffmpeg = check_ffmpeg(&config.ffmpeg_bin)?;
    let ffprobe = check_ffprobe(&config.ffprobe_bin)?;
    println!("vcompose-selfcheck: ffmpeg={} ffprobe={}", ffmpeg.display(), ffprobe.display());

    ensure_listed(&ffmpeg, "-encoders", REQUIRED_ENCODERS)?;
    ensure_listed(&ffmpeg, "-filters", REQUIRED_FILTERS)?;

    for (tier, binary) in [("primary", &config.primary_ffmpeg_bin), ("tertiary", &config.tertiary_ffmpeg_bin)] {
        if let Some(binary) = binary {
            match check_ffmpeg(binary) {
                Ok(path) => println!("vcompose-selfcheck: {} ffmpeg={}", tier, path.display()),
                Err(e) => println!("vcompose-selfcheck: warning: {} tier ffmpeg unusable: {}", tier, e),
            }
        }
    }

    if native::available() {
        println!("vcompose-selfcheck: libav linked (secondary tier composes in-process)");
    } else {
        println!("vcompose-selfcheck: warning: built without libav, secondary tier disabled");
    }

    println!("vcompose-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    let scratch = tempfile::tempfile_in(path)
        .map_err(|e| anyhow::anyhow!("work dir {} not writable: {}", path.display(), e))?;
    drop(scratch);
    Ok(())
}

fn ensure_listed(ffmpeg: &Path, flag: &str, names: &[&str]) -> anyhow::Result<()> {
    let output = Command::new(ffmpeg)
        .args(["-hide_banner", flag])
        .output()
        .map_err(|e| anyhow::anyhow!("ffmpeg {} failed: {}", flag, e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffmpeg {} failed: {:?}", flag, output.status));
    }

    let listing = String::from_utf8_lossy(&output.stdout);
    let missing: Vec<&str> = names
        .iter()
        .copied()
        .filter(|name| {
            !listing
                .lines()
                .any(|line| line.split_whitespace().nth(1) == Some(*name))
        })
        .collect();

    if !missing.is_empty() {
        return Err(anyhow::anyhow!("ffmpeg is missing {}: {}", flag.trim_start_matches('-'), missing.join(", ")));
    }
    Ok(())
}

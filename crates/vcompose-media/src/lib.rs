#![deny(unreachable_patterns)]
//! FFmpeg CLI wrapper and composition building blocks.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with timeout and cancellation
//! - Media probing through `ffprobe`, with an in-process libav fallback
//! - In-process composition for builds linking libav
//! - Placeholder assets, narration sync and chapter metadata
//! - The three encoder tiers and the output validator

pub mod audio_sync;
pub mod caption;
pub mod chapters;
pub mod command;
pub mod compose;
pub mod encoders;
pub mod error;
pub mod filters;
pub mod fs_utils;
pub mod native;
pub mod placeholder;
pub mod probe;
pub mod progress;
pub mod timeline;
pub mod validator;

pub use audio_sync::{
    AudioMeasurement, AudioRenderPlan, AudioSyncConfig, AudioSyncProcessor, AudioTool, FfmpegAudioTool,
    SyncAdjustment, SyncedAudioRef,
};
pub use chapters::{metadata_tags, render_ffmetadata, ChapterMarkerBuilder};
pub use command::{
    check_ffmpeg, check_ffprobe, CancelReceiver, FfmpegCommand, FfmpegRunner, DEFAULT_FFMPEG, DEFAULT_FFPROBE,
};
pub use encoders::{
    default_backends, EncodeRequest, EncoderBackend, PrimaryEncoder, SecondaryEncoder, TertiaryEncoder,
};
pub use error::{EncodeError, EncodeErrorKind, MediaError, MediaResult, TimelineError};
pub use fs_utils::move_file;
pub use native::{LibavProbe, NativeClip, NativeJob, StopSignal};
pub use placeholder::{AssetPlaceholderGenerator, FfmpegSynthesizer, PlaceholderSynthesizer, ResolvedAsset};
pub use probe::{FallbackProbe, FfprobeProbe, MediaInfo, MediaProbe};
pub use progress::{EncodeProgress, FfmpegProgress};
pub use timeline::{Timeline, TimelinePreparer, TimelineScene};
pub use validator::{container_for_path, Validator, ValidatorConfig};

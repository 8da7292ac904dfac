//! Quality preset resolution.
//!
//! Maps a preset name plus optional per-field overrides onto concrete
//! [`EncodingParams`]. The tier table is a read-only constant shared by
//! every job.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::encoding::{
    EncodingParams, QualityTier, Resolution, SpeedPreset, DEFAULT_AUDIO_BITRATE,
    DEFAULT_AUDIO_CODEC, DEFAULT_FRAME_RATE, DEFAULT_PIXEL_FORMAT, DEFAULT_VIDEO_CODEC,
};

/// Preset resolution failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresetError {
    #[error("Invalid preset: {reason}")]
    InvalidPreset { reason: String },
}

impl PresetError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidPreset {
            reason: reason.into(),
        }
    }
}

/// One row of the built-in tier table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSpec {
    pub tier: QualityTier,
    pub resolution: Resolution,
    pub video_bitrate: &'static str,
    pub crf: u8,
    pub speed_preset: SpeedPreset,
}

/// Built-in tiers. Not user-editable.
pub const TIER_TABLE: [TierSpec; 3] = [
    TierSpec {
        tier: QualityTier::Low,
        resolution: Resolution::new(1280, 720),
        video_bitrate: "3500k",
        crf: 28,
        speed_preset: SpeedPreset::Fast,
    },
    TierSpec {
        tier: QualityTier::Medium,
        resolution: Resolution::new(1920, 1080),
        video_bitrate: "5500k",
        crf: 23,
        speed_preset: SpeedPreset::Medium,
    },
    TierSpec {
        tier: QualityTier::High,
        resolution: Resolution::new(1920, 1080),
        video_bitrate: "8500k",
        crf: 18,
        speed_preset: SpeedPreset::Slow,
    },
];

/// Name that requests the medium base with overrides applied.
pub const CUSTOM_PRESET: &str = "custom";

static BITRATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+k$").unwrap());

/// Look up the table row for a tier (`None` for custom).
pub fn tier_spec(tier: QualityTier) -> Option<&'static TierSpec> {
    TIER_TABLE.iter().find(|spec| spec.tier == tier)
}

fn tier_by_name(name: &str) -> Option<&'static TierSpec> {
    match name {
        "low" => tier_spec(QualityTier::Low),
        "medium" => tier_spec(QualityTier::Medium),
        "high" => tier_spec(QualityTier::High),
        _ => None,
    }
}

fn params_from_spec(spec: &TierSpec) -> EncodingParams {
    EncodingParams {
        tier: spec.tier,
        resolution: spec.resolution,
        video_bitrate: spec.video_bitrate.to_string(),
        crf: spec.crf,
        speed_preset: spec.speed_preset,
        frame_rate: DEFAULT_FRAME_RATE,
        video_codec: DEFAULT_VIDEO_CODEC.to_string(),
        audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
        audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
        pixel_format: DEFAULT_PIXEL_FORMAT.to_string(),
    }
}

/// Resolve a preset name and override map into encoding parameters.
///
/// Names are matched case-insensitively against `low`, `medium` and `high`.
/// Any other name (including `custom`) resolves on the medium base and is only
/// accepted when overrides are present. Overriding `crf` or `resolution` with a
/// value that differs from the base tier marks the result [`QualityTier::Custom`].
pub fn resolve(preset: &str, overrides: &BTreeMap<String, Value>) -> Result<EncodingParams, PresetError> {
    let name = preset.trim().to_ascii_lowercase();

    let (base, named_tier) = match tier_by_name(&name) {
        Some(spec) => (spec, true),
        None if overrides.is_empty() => {
            return Err(PresetError::invalid(format!(
                "unknown preset '{}' (expected low, medium, high, or overrides)",
                preset
            )));
        }
        None => (&TIER_TABLE[1], false),
    };

    let mut params = params_from_spec(base);
    if !named_tier {
        params.tier = QualityTier::Custom;
    }

    for (key, value) in overrides {
        apply_override(&mut params, key, value)?;
    }

    if params.tier != QualityTier::Custom && !params.is_consistent_with_tier() {
        params.tier = QualityTier::Custom;
    }

    Ok(params)
}

fn apply_override(params: &mut EncodingParams, key: &str, value: &Value) -> Result<(), PresetError> {
    match key {
        "resolution" => {
            params.resolution = expect_str(key, value)?.parse()?;
        }
        "video_bitrate" | "bitrate" => {
            params.video_bitrate = expect_bitrate(key, value)?;
        }
        "crf" => {
            let crf = expect_integer(key, value)?;
            if !(0..=51).contains(&crf) {
                return Err(PresetError::invalid(format!("crf {} outside 0..=51", crf)));
            }
            params.crf = crf as u8;
        }
        "speed_preset" | "preset" | "speed" => {
            params.speed_preset = expect_str(key, value)?.parse()?;
        }
        "frame_rate" | "fps" => {
            let fps = expect_integer(key, value)?;
            if !(1..=240).contains(&fps) {
                return Err(PresetError::invalid(format!("frame_rate {} outside 1..=240", fps)));
            }
            params.frame_rate = fps as u32;
        }
        "video_codec" => params.video_codec = expect_token(key, value)?,
        "audio_codec" => params.audio_codec = expect_token(key, value)?,
        "pixel_format" => params.pixel_format = expect_token(key, value)?,
        "audio_bitrate" => params.audio_bitrate = expect_bitrate(key, value)?,
        other => {
            return Err(PresetError::invalid(format!("unknown override '{}'", other)));
        }
    }
    Ok(())
}

fn expect_str<'a>(key: &str, value: &'a Value) -> Result<&'a str, PresetError> {
    value
        .as_str()
        .ok_or_else(|| PresetError::invalid(format!("override '{}' must be a string", key)))
}

fn expect_token(key: &str, value: &Value) -> Result<String, PresetError> {
    let s = expect_str(key, value)?.trim();
    if s.is_empty() || s.chars().any(|c| c.is_whitespace()) {
        return Err(PresetError::invalid(format!(
            "override '{}' must be a single non-empty token",
            key
        )));
    }
    Ok(s.to_string())
}

fn expect_bitrate(key: &str, value: &Value) -> Result<String, PresetError> {
    let s = expect_str(key, value)?.trim();
    if !BITRATE_RE.is_match(s) {
        return Err(PresetError::invalid(format!(
            "override '{}' value '{}' does not match <digits>k",
            key, s
        )));
    }
    Ok(s.to_string())
}

fn expect_integer(key: &str, value: &Value) -> Result<i64, PresetError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| PresetError::invalid(format!("override '{}' must be an integer", key))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| PresetError::invalid(format!("override '{}' must be an integer", key))),
        _ => Err(PresetError::invalid(format!("override '{}' must be an integer", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn overrides(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_builtin_tiers_match_table() {
        for spec in TIER_TABLE.iter() {
            let params = resolve(spec.tier.as_str(), &BTreeMap::new()).unwrap();
            assert_eq!(params.tier, spec.tier);
            assert_eq!(params.resolution, spec.resolution);
            assert_eq!(params.video_bitrate, spec.video_bitrate);
            assert_eq!(params.crf, spec.crf);
            assert_eq!(params.speed_preset, spec.speed_preset);
            assert!(params.is_consistent_with_tier());
        }
    }

    #[test]
    fn test_name_is_case_insensitive() {
        let params = resolve("  HIGH ", &BTreeMap::new()).unwrap();
        assert_eq!(params.tier, QualityTier::High);
    }

    #[test]
    fn test_unknown_preset_without_overrides() {
        let err = resolve("ultra", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, PresetError::InvalidPreset { .. }));
        assert!(resolve(CUSTOM_PRESET, &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_custom_preset_uses_medium_base() {
        let params = resolve("custom", &overrides(&[("video_bitrate", json!("4000k"))])).unwrap();
        assert_eq!(params.tier, QualityTier::Custom);
        assert_eq!(params.resolution, Resolution::new(1920, 1080));
        assert_eq!(params.video_bitrate, "4000k");
    }

    #[test]
    fn test_crf_override_marks_custom() {
        let params = resolve("low", &overrides(&[("crf", json!(20))])).unwrap();
        assert_eq!(params.tier, QualityTier::Custom);
        assert_eq!(params.crf, 20);

        // Same value as the tier keeps the tier
        let params = resolve("low", &overrides(&[("crf", json!(28))])).unwrap();
        assert_eq!(params.tier, QualityTier::Low);
    }

    #[test]
    fn test_bitrate_override_keeps_tier() {
        let params = resolve("high", &overrides(&[("bitrate", json!("9000k"))])).unwrap();
        assert_eq!(params.tier, QualityTier::High);
        assert_eq!(params.video_bitrate, "9000k");
    }

    #[test]
    fn test_invalid_overrides_rejected() {
        let cases = [
            ("crf", json!(52)),
            ("crf", json!(-1)),
            ("crf", json!("abc")),
            ("video_bitrate", json!("5500")),
            ("video_bitrate", json!("5.5M")),
            ("video_bitrate", json!(5500)),
            ("resolution", json!("1920*1080")),
            ("resolution", json!("0x720")),
            ("speed_preset", json!("ludicrous")),
            ("frame_rate", json!(0)),
            ("video_codec", json!("")),
            ("nonsense", json!(1)),
        ];

        for (key, value) in cases {
            let result = resolve("medium", &overrides(&[(key, value.clone())]));
            assert!(
                matches!(result, Err(PresetError::InvalidPreset { .. })),
                "expected {}={} to be rejected",
                key,
                value
            );
        }
    }

    #[test]
    fn test_full_override_set() {
        let params = resolve(
            "medium",
            &overrides(&[
                ("resolution", json!("640x360")),
                ("crf", json!("30")),
                ("speed", json!("veryfast")),
                ("fps", json!(25)),
                ("pixel_format", json!("yuv420p")),
            ]),
        )
        .unwrap();

        assert_eq!(params.tier, QualityTier::Custom);
        assert_eq!(params.resolution, Resolution::new(640, 360));
        assert_eq!(params.crf, 30);
        assert_eq!(params.speed_preset, SpeedPreset::Veryfast);
        assert_eq!(params.frame_rate, 25);
    }
}

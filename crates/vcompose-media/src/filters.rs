//! FFmpeg filter graph fragments shared by the encoder tiers.

use vcompose_models::{EncodingParams, Transition, NARRATION_SAMPLE_RATE};

/// Upper bound on fade and dissolve length, in seconds.
pub const MAX_TRANSITION_SECS: f64 = 0.5;

/// How one clip meets its neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClipEdges {
    /// Effective duration of the clip
    pub duration: f64,
    /// Fade in from black at the start
    pub fade_in: Option<f64>,
    /// Fade out to black at the end
    pub fade_out: Option<f64>,
    /// Dissolve into this clip from the previous one
    pub dissolve_in: Option<f64>,
    /// Extra cloned-frame tail consumed by a dissolve into the next clip
    pub tail_pad: f64,
}

/// Transition length between two adjacent clips.
pub fn transition_duration(prev: f64, next: f64) -> f64 {
    (prev.min(next) / 4.0).min(MAX_TRANSITION_SECS).max(0.0)
}

/// Work out per-clip fade and dissolve edges.
///
/// The transition on clip `i` applies between clips `i-1` and `i`; the first
/// clip's transition is ignored.
pub fn plan_edges(clips: &[(f64, Transition)]) -> Vec<ClipEdges> {
    let mut edges: Vec<ClipEdges> = clips
        .iter()
        .map(|(duration, _)| ClipEdges {
            duration: *duration,
            ..Default::default()
        })
        .collect();

    for i in 1..clips.len() {
        let d = transition_duration(clips[i - 1].0, clips[i].0);
        if d <= 0.0 {
            continue;
        }
        match clips[i].1 {
            Transition::Cut => {}
            Transition::Fade => {
                edges[i - 1].fade_out = Some(d);
                edges[i].fade_in = Some(d);
            }
            Transition::Dissolve => {
                edges[i - 1].tail_pad = d;
                edges[i].dissolve_in = Some(d);
            }
        }
    }

    edges
}

/// Video chain: scale/pad to the target frame, force fps and SAR, then
/// clone or trim to the clip's exact length plus any dissolve tail.
pub fn video_conform_chain(params: &EncodingParams, edges: &ClipEdges) -> String {
    let w = params.resolution.width;
    let h = params.resolution.height;
    let length = edges.duration + edges.tail_pad;

    let mut chain = vec![
        format!("scale={w}:{h}:force_original_aspect_ratio=decrease"),
        format!("pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black"),
        "setsar=1".to_string(),
        format!("fps={}", params.frame_rate),
        format!("tpad=stop_mode=clone:stop_duration={:.3}", length),
        format!("trim=duration={:.3}", length),
        "setpts=PTS-STARTPTS".to_string(),
    ];

    if let Some(d) = edges.fade_in {
        chain.push(format!("fade=t=in:st=0:d={:.3}", d));
    }
    if let Some(d) = edges.fade_out {
        let start = (edges.duration - d).max(0.0);
        chain.push(format!("fade=t=out:st={:.3}:d={:.3}", start, d));
    }

    chain.push(format!("format={}", params.pixel_format));
    chain.join(",")
}

/// Audio chain: 44.1 kHz stereo, padded or trimmed to the clip length.
/// Dissolve tails are not added to audio; only video overlaps.
pub fn audio_conform_chain(edges: &ClipEdges) -> String {
    let mut chain = vec![
        format!("aresample={}", NARRATION_SAMPLE_RATE),
        "aformat=sample_fmts=fltp:channel_layouts=stereo".to_string(),
        "apad".to_string(),
        format!("atrim=duration={:.3}", edges.duration),
        "asetpts=PTS-STARTPTS".to_string(),
    ];

    if let Some(d) = edges.fade_in {
        chain.push(format!("afade=t=in:st=0:d={:.3}", d));
    }
    if let Some(d) = edges.fade_out {
        let start = (edges.duration - d).max(0.0);
        chain.push(format!("afade=t=out:st={:.3}:d={:.3}", start, d));
    }

    chain.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcompose_models::resolve;
    use std::collections::BTreeMap;

    fn params() -> EncodingParams {
        resolve("low", &BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_transition_duration() {
        assert!((transition_duration(10.0, 10.0) - 0.5).abs() < 1e-9);
        assert!((transition_duration(1.0, 10.0) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_plan_edges_ignores_first_transition() {
        let edges = plan_edges(&[
            (4.0, Transition::Dissolve),
            (4.0, Transition::Fade),
            (4.0, Transition::Dissolve),
        ]);

        assert_eq!(edges[0].dissolve_in, None);
        assert_eq!(edges[0].fade_out, Some(0.5));
        assert_eq!(edges[1].fade_in, Some(0.5));
        assert!((edges[1].tail_pad - 0.5).abs() < 1e-9);
        assert_eq!(edges[2].dissolve_in, Some(0.5));
        assert_eq!(edges[2].tail_pad, 0.0);
    }

    #[test]
    fn test_video_chain() {
        let edges = ClipEdges {
            duration: 5.0,
            fade_out: Some(0.5),
            tail_pad: 0.25,
            ..Default::default()
        };
        let chain = video_conform_chain(&params(), &edges);
        assert!(chain.starts_with("scale=1280:720"));
        assert!(chain.contains("trim=duration=5.250"));
        assert!(chain.contains("fade=t=out:st=4.500:d=0.500"));
        assert!(chain.ends_with("format=yuv420p"));
    }

    #[test]
    fn test_audio_chain_length() {
        let edges = ClipEdges {
            duration: 8.0,
            tail_pad: 0.5,
            ..Default::default()
        };
        let chain = audio_conform_chain(&edges);
        assert!(chain.contains("atrim=duration=8.000"));
        assert!(chain.contains("aresample=44100"));
    }
}

//! Frame and sample arithmetic for in-process composition.
//!
//! Everything here works on plain RGB24 canvases and `f32` sample buffers so
//! the timing rules can be tested without linking any codec library.

use std::collections::VecDeque;
use std::ops::Range;

use image::RgbImage;

use crate::filters::ClipEdges;

/// Tightly packed RGB24 frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Canvas {
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&rgb);
        }
        Self { width, height, data }
    }

    /// Copy rows out of a strided RGB24 plane.
    pub fn from_rgb_rows(width: u32, height: u32, plane: &[u8], stride: usize) -> Self {
        let row = width as usize * 3;
        let mut data = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            match plane.get(start..start + row) {
                Some(src) => data.extend_from_slice(src),
                None => data.resize(data.len() + row, 0),
            }
        }
        Self { width, height, data }
    }

    pub fn from_image(image: &RgbImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            data: image.as_raw().clone(),
        }
    }

    #[cfg(test)]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Centre `src` on a black `width`x`height` canvas, cropping any overhang.
    pub fn letterbox(src: &Canvas, width: u32, height: u32) -> Canvas {
        if src.width == width && src.height == height {
            return src.clone();
        }

        let mut out = Canvas::solid(width, height, [0, 0, 0]);
        let copy_w = src.width.min(width) as usize;
        let copy_h = src.height.min(height) as usize;
        let dst_x = (width as usize - copy_w) / 2;
        let dst_y = (height as usize - copy_h) / 2;
        let src_x = (src.width as usize - copy_w) / 2;
        let src_y = (src.height as usize - copy_h) / 2;

        for row in 0..copy_h {
            let s = ((src_y + row) * src.width as usize + src_x) * 3;
            let d = ((dst_y + row) * width as usize + dst_x) * 3;
            out.data[d..d + copy_w * 3].copy_from_slice(&src.data[s..s + copy_w * 3]);
        }
        out
    }

    /// Multiply every channel by `level` (0 is black, 1 is unchanged).
    pub fn scale_brightness(&mut self, level: f32) {
        if level >= 1.0 {
            return;
        }
        let level = level.max(0.0);
        for v in &mut self.data {
            *v = (*v as f32 * level).round() as u8;
        }
    }

    /// Linear mix of `from` into `to`; `alpha` 0 shows `from`, 1 shows `to`.
    pub fn blend(from: &Canvas, to: &Canvas, alpha: f32) -> Canvas {
        if from.width != to.width || from.height != to.height {
            return to.clone();
        }
        let alpha = alpha.clamp(0.0, 1.0);
        let data = from
            .data
            .iter()
            .zip(&to.data)
            .map(|(a, b)| (*a as f32 * (1.0 - alpha) + *b as f32 * alpha).round() as u8)
            .collect();
        Canvas {
            width: to.width,
            height: to.height,
            data,
        }
    }
}

/// Largest even size with the source aspect ratio fitting in the target.
pub fn fit_within(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> (u32, u32) {
    if src_w == 0 || src_h == 0 {
        return (dst_w, dst_h);
    }
    let scale = (dst_w as f64 / src_w as f64).min(dst_h as f64 / src_h as f64);
    let even = |v: f64, max: u32| ((v.round() as u32) & !1).clamp(2, max.max(2));
    (even(src_w as f64 * scale, dst_w), even(src_h as f64 * scale, dst_h))
}

/// Fade envelope at `local` seconds into a clip: 0 is black or silent.
pub fn fade_gain(edges: &ClipEdges, local: f64) -> f32 {
    let mut gain: f64 = 1.0;
    if let Some(d) = edges.fade_in.filter(|d| *d > 0.0) {
        gain = gain.min(local / d);
    }
    if let Some(d) = edges.fade_out.filter(|d| *d > 0.0) {
        gain = gain.min((edges.duration - local) / d);
    }
    gain.clamp(0.0, 1.0) as f32
}

/// What one output frame shows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSlot {
    /// Seconds since the clip's first frame
    pub local: f64,
    pub brightness: f32,
    /// Mix weight of this clip over the previous clip's last frame
    pub dissolve: Option<f32>,
}

/// Output frame ranges of each clip at a fixed rate.
///
/// Boundaries are rounded from cumulative timeline offsets, so the frame
/// count never drifts from the summed effective durations.
#[derive(Debug, Clone)]
pub struct FramePlan {
    fps: u32,
    bounds: Vec<u64>,
    edges: Vec<ClipEdges>,
}

impl FramePlan {
    pub fn new(edges: &[ClipEdges], fps: u32) -> Self {
        let fps = fps.max(1);
        let mut end = 0.0;
        let mut bounds = Vec::with_capacity(edges.len() + 1);
        bounds.push(0);
        for edge in edges {
            end += edge.duration.max(0.0);
            bounds.push((end * fps as f64).round() as u64);
        }
        Self {
            fps,
            bounds,
            edges: edges.to_vec(),
        }
    }

    pub fn total_frames(&self) -> u64 {
        self.bounds.last().copied().unwrap_or(0)
    }

    pub fn clip_frames(&self, clip: usize) -> Range<u64> {
        match (self.bounds.get(clip), self.bounds.get(clip + 1)) {
            (Some(start), Some(end)) => *start..*end,
            _ => 0..0,
        }
    }

    pub fn slot(&self, clip: usize, frame: u64) -> FrameSlot {
        let first = self.clip_frames(clip).start;
        let local = frame.saturating_sub(first) as f64 / self.fps as f64;
        let Some(edges) = self.edges.get(clip) else {
            return FrameSlot {
                local,
                brightness: 1.0,
                dissolve: None,
            };
        };

        let dissolve = edges
            .dissolve_in
            .filter(|d| *d > 0.0 && local < *d)
            .map(|d| (local / d) as f32);

        FrameSlot {
            local,
            brightness: fade_gain(edges, local),
            dissolve,
        }
    }
}

/// Samples per clip at `rate`, rounded from cumulative offsets.
pub fn sample_counts(edges: &[ClipEdges], rate: u32) -> Vec<usize> {
    let mut end = 0.0;
    let mut previous = 0usize;
    edges
        .iter()
        .map(|edge| {
            end += edge.duration.max(0.0);
            let bound = (end * rate as f64).round() as usize;
            let count = bound.saturating_sub(previous);
            previous = bound;
            count
        })
        .collect()
}

/// Trim or pad stereo samples to exactly `target`, then apply the clip's fades.
pub fn conform_samples(
    mut left: Vec<f32>,
    mut right: Vec<f32>,
    target: usize,
    edges: &ClipEdges,
    rate: u32,
) -> (Vec<f32>, Vec<f32>) {
    left.resize(target, 0.0);
    right.resize(target, 0.0);

    if edges.fade_in.is_some() || edges.fade_out.is_some() {
        let rate = rate.max(1) as f64;
        for (i, (l, r)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
            let gain = fade_gain(edges, i as f64 / rate);
            *l *= gain;
            *r *= gain;
        }
    }
    (left, right)
}

/// Stereo sample queue feeding fixed-size encoder frames.
#[derive(Debug, Default)]
pub struct StereoFifo {
    left: VecDeque<f32>,
    right: VecDeque<f32>,
}

impl StereoFifo {
    pub fn push(&mut self, left: &[f32], right: &[f32]) {
        let n = left.len().min(right.len());
        self.left.extend(&left[..n]);
        self.right.extend(&right[..n]);
    }

    /// Exactly `n` samples per channel, if that many are queued.
    pub fn pop(&mut self, n: usize) -> Option<(Vec<f32>, Vec<f32>)> {
        if n == 0 || self.left.len() < n {
            return None;
        }
        Some((self.left.drain(..n).collect(), self.right.drain(..n).collect()))
    }

    pub fn pop_remaining(&mut self) -> (Vec<f32>, Vec<f32>) {
        (self.left.drain(..).collect(), self.right.drain(..).collect())
    }
}

/// `192k` style bitrate in bits per second.
pub fn bitrate_bps(value: &str) -> Option<usize> {
    value
        .trim()
        .strip_suffix('k')
        .and_then(|k| k.parse::<usize>().ok())
        .map(|k| k * 1000)
}

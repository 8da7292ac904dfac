//! Caption rasterization for static frames.
//!
//! Text is shaped and drawn with cosmic-text against the system font
//! database, so captions do not depend on FFmpeg's optional `drawtext`.

use cosmic_text::{Attrs, Buffer, Color, Family, FontSystem, Metrics, Shaping, SwashCache};
use image::{Rgb, RgbImage};
use std::sync::{LazyLock, Mutex};

// Loading the font database is slow; share it across frames and jobs
static FONT_SYSTEM: LazyLock<Mutex<FontSystem>> = LazyLock::new(|| Mutex::new(FontSystem::new()));
static SWASH_CACHE: LazyLock<Mutex<SwashCache>> = LazyLock::new(|| Mutex::new(SwashCache::new()));

const LINE_HEIGHT: f32 = 1.35;

/// Draw `text` centred on `frame` in white. Returns the number of pixels
/// touched, which is 0 when no usable font is installed.
pub fn draw_caption(frame: &mut RgbImage, text: &str, font_size: f32) -> usize {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 || text.trim().is_empty() {
        return 0;
    }

    let mut font_system = FONT_SYSTEM.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut swash_cache = SWASH_CACHE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let line_height = font_size * LINE_HEIGHT;
    let mut buffer = Buffer::new(&mut font_system, Metrics::new(font_size, line_height));
    buffer.set_size(&mut font_system, Some(width as f32), Some(height as f32));
    buffer.set_text(&mut font_system, text, &Attrs::new().family(Family::SansSerif), Shaping::Advanced, None);
    buffer.shape_until_scroll(&mut font_system, false);

    let (text_w, text_h) = buffer.layout_runs().fold((0.0f32, 0.0f32), |(w, h), run| {
        (w.max(run.line_w), h.max(run.line_y + line_height - font_size))
    });
    let offset_x = ((width as f32 - text_w) / 2.0).max(0.0) as i32;
    let offset_y = ((height as f32 - text_h) / 2.0).max(0.0) as i32;

    let mut touched = 0usize;
    buffer.draw(&mut font_system, &mut swash_cache, Color::rgb(255, 255, 255), |x, y, w, h, color| {
        let alpha = color.a() as f32 / 255.0;
        if alpha <= 0.0 {
            return;
        }
        for dy in 0..h as i32 {
            for dx in 0..w as i32 {
                let px = x + dx + offset_x;
                let py = y + dy + offset_y;
                if px < 0 || py < 0 || px >= width as i32 || py >= height as i32 {
                    continue;
                }
                let Rgb(dst) = frame.get_pixel_mut(px as u32, py as u32);
                let src = [color.r(), color.g(), color.b()];
                for c in 0..3 {
                    dst[c] = (src[c] as f32 * alpha + dst[c] as f32 * (1.0 - alpha)).round() as u8;
                }
                touched += 1;
            }
        }
    });

    touched
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_caption_is_noop() {
        let mut frame = RgbImage::from_pixel(32, 16, Rgb([10, 10, 10]));
        assert_eq!(draw_caption(&mut frame, "   ", 12.0), 0);
        assert!(frame.pixels().all(|p| *p == Rgb([10, 10, 10])));
    }

    #[test]
    fn test_caption_reports_drawn_pixels() {
        // Hosts without fonts draw nothing and report 0
        let mut frame = RgbImage::from_pixel(64, 32, Rgb([0, 0, 0]));
        let touched = draw_caption(&mut frame, "Scene 1\n2.0s", 10.0);
        let lit = frame.pixels().filter(|p| p.0 != [0, 0, 0]).count();
        assert_eq!(lit > 0, touched > 0);
    }
}

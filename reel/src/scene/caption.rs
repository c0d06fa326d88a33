use std::io::Cursor;

use fontdue::Font;
use image::{ImageFormat, Rgba, RgbaImage};

use crate::error::StageError;

/// Ink used for badge captions.
const INK: Rgba<u8> = Rgba([0x20, 0x21, 0x24, 0xff]);

/// Where and how large a caption is drawn.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CaptionLayout {
    /// Left edge of the first glyph's pen position.
    pub x: u32,
    /// Top of the line box; the baseline sits one `px` below it.
    pub y: u32,
    /// Font size in pixels.
    pub px: f32,
}

/// Decode a PNG badge, draw `caption` on it and re-encode it as PNG.
pub fn caption_badge(
    badge: &[u8],
    font: &Font,
    caption: &str,
    layout: CaptionLayout,
) -> Result<Vec<u8>, StageError> {
    let mut image = image::load_from_memory_with_format(badge, ImageFormat::Png)
        .map_err(|e| StageError::Badge(e.to_string()))?
        .to_rgba8();

    draw_caption(&mut image, font, caption, layout);

    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|e| StageError::Badge(e.to_string()))?;
    Ok(out)
}

/// Rasterize `text` glyph by glyph and alpha-blend it onto `image`.
///
/// Pixels falling outside the image are clipped.
fn draw_caption(image: &mut RgbaImage, font: &Font, text: &str, layout: CaptionLayout) {
    let baseline = layout.y as f32 + layout.px;
    let mut pen_x = layout.x as f32;

    for ch in text.chars() {
        let (metrics, coverage) = font.rasterize(ch, layout.px);
        let left = (pen_x + metrics.xmin as f32).round() as i64;
        // ymin is the offset from the baseline to the glyph's bottom edge.
        let top = (baseline - metrics.height as f32 - metrics.ymin as f32).round() as i64;

        for row in 0..metrics.height {
            for col in 0..metrics.width {
                let alpha = coverage[row * metrics.width + col];
                if alpha == 0 {
                    continue;
                }
                let (x, y) = (left + col as i64, top + row as i64);
                if x < 0 || y < 0 || x >= i64::from(image.width()) || y >= i64::from(image.height()) {
                    continue;
                }
                blend(image.get_pixel_mut(x as u32, y as u32), alpha);
            }
        }
        pen_x += metrics.advance_width;
    }
}

fn blend(pixel: &mut Rgba<u8>, alpha: u8) {
    let a = u16::from(alpha);
    for channel in 0..3 {
        let ink = u16::from(INK[channel]);
        let dst = u16::from(pixel[channel]);
        pixel[channel] = ((ink * a + dst * (255 - a)) / 255) as u8;
    }
    pixel[3] = pixel[3].max(alpha);
}

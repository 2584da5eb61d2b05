//! Text overlay drawn with a built-in 5x7 bitmap font.

use mdim_export_model::{OverlayAnchor, TextOverlay};

const GLYPH_WIDTH: usize = 5;
const GLYPH_HEIGHT: usize = 7;
/// Opacity of the backing plate relative to the text.
const PLATE_OPACITY: f64 = 0.45;

/// Rows of a glyph, most significant of the low five bits on the left.
/// Letters are upper-cased; unknown characters render as `?`.
fn glyph(c: char) -> [u8; GLYPH_HEIGHT] {
    match c.to_ascii_uppercase() {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        ' ' => [0; GLYPH_HEIGHT],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}

/// Pixel box of the overlay: `(x, y, width, height)`, including padding.
pub fn layout(
    text: &str,
    overlay: &TextOverlay,
    frame_width: usize,
    frame_height: usize,
    scale: f64,
) -> (i64, i64, usize, usize) {
    let px = ((overlay.font_size_px as f64 * scale) / GLYPH_HEIGHT as f64)
        .round()
        .max(1.0) as usize;
    let chars = text.chars().count();
    let pad = px * 2;
    let width = (chars * (GLYPH_WIDTH + 1) * px).saturating_sub(px) + pad * 2;
    let height = GLYPH_HEIGHT * px + pad * 2;
    let margin = (overlay.font_size_px as f64 * scale / 2.0).round() as i64;

    let (fw, fh) = (frame_width as i64, frame_height as i64);
    let (w, h) = (width as i64, height as i64);
    let (x, y) = match overlay.anchor {
        OverlayAnchor::TopLeft => (margin, margin),
        OverlayAnchor::TopRight => (fw - w - margin, margin),
        OverlayAnchor::BottomLeft => (margin, fh - h - margin),
        OverlayAnchor::BottomRight => (fw - w - margin, fh - h - margin),
        OverlayAnchor::Center => ((fw - w) / 2, (fh - h) / 2),
    };
    (x, y, width, height)
}

fn blend(pixels: &mut [u8], frame_width: usize, x: i64, y: i64, color: [u8; 3], alpha: f64) {
    let base = (y as usize * frame_width + x as usize) * 4;
    for c in 0..3 {
        let under = pixels[base + c] as f64;
        pixels[base + c] = (under + (color[c] as f64 - under) * alpha).round() as u8;
    }
}

/// Draw `overlay` into an RGBA8 frame. Parts outside the frame are clipped.
pub fn draw_overlay(
    pixels: &mut [u8],
    frame_width: usize,
    frame_height: usize,
    overlay: &TextOverlay,
    scale: f64,
) {
    let text = overlay.text.trim();
    if text.is_empty() || pixels.len() < frame_width * frame_height * 4 {
        return;
    }
    let [r, g, b, a] = overlay.rgba();
    let opacity = a as f64 / 255.0;
    let (x0, y0, width, height) = layout(text, overlay, frame_width, frame_height, scale);
    let inside = |x: i64, y: i64| {
        x >= 0 && y >= 0 && (x as usize) < frame_width && (y as usize) < frame_height
    };

    for dy in 0..height as i64 {
        for dx in 0..width as i64 {
            let (x, y) = (x0 + dx, y0 + dy);
            if inside(x, y) {
                blend(pixels, frame_width, x, y, [0, 0, 0], opacity * PLATE_OPACITY);
            }
        }
    }

    let px = ((overlay.font_size_px as f64 * scale) / GLYPH_HEIGHT as f64)
        .round()
        .max(1.0) as i64;
    let pad = px * 2;
    for (i, c) in text.chars().enumerate() {
        let origin_x = x0 + pad + i as i64 * (GLYPH_WIDTH as i64 + 1) * px;
        for (row, &bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits >> (GLYPH_WIDTH - 1 - col) & 1 == 0 {
                    continue;
                }
                for sy in 0..px {
                    for sx in 0..px {
                        let x = origin_x + col as i64 * px + sx;
                        let y = y0 + pad + row as i64 * px + sy;
                        if inside(x, y) {
                            blend(pixels, frame_width, x, y, [r, g, b], opacity);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay(anchor: OverlayAnchor) -> TextOverlay {
        TextOverlay {
            text: "4D".to_string(),
            anchor,
            font_size_px: 14,
            color: "#FF0000".to_string(),
            opacity: 1.0,
        }
    }

    #[test]
    fn test_layout_anchors() {
        // 14px font -> 2px cells, 4px padding: 2 glyphs = 22 + 8 wide, 14 + 8 tall
        let (x, y, w, h) = layout("4D", &overlay(OverlayAnchor::BottomRight), 200, 100, 1.0);
        assert_eq!((w, h), (30, 22));
        assert_eq!((x, y), (200 - 30 - 7, 100 - 22 - 7));

        let (x, y, _, _) = layout("4D", &overlay(OverlayAnchor::TopLeft), 200, 100, 1.0);
        assert_eq!((x, y), (7, 7));

        let (x, y, _, _) = layout("4D", &overlay(OverlayAnchor::Center), 200, 100, 1.0);
        assert_eq!((x, y), (85, 39));
    }

    #[test]
    fn test_draws_text_color() {
        let (w, h) = (64usize, 32usize);
        let mut pixels = vec![0u8; w * h * 4];
        draw_overlay(&mut pixels, w, h, &overlay(OverlayAnchor::TopLeft), 1.0);
        assert!(pixels.chunks_exact(4).any(|px| px[0] == 255 && px[1] == 0));
    }

    #[test]
    fn test_zero_opacity_is_invisible() {
        let (w, h) = (64usize, 32usize);
        let mut pixels = vec![90u8; w * h * 4];
        let mut faint = overlay(OverlayAnchor::Center);
        faint.opacity = 0.0;
        draw_overlay(&mut pixels, w, h, &faint, 1.0);
        assert!(pixels.iter().all(|&v| v == 90));
    }

    #[test]
    fn test_clips_outside_frame() {
        let (w, h) = (8usize, 8usize);
        let mut pixels = vec![0u8; w * h * 4];
        let mut long = overlay(OverlayAnchor::BottomRight);
        long.text = "A LONG CAPTION".to_string();
        draw_overlay(&mut pixels, w, h, &long, 2.0);
        assert_eq!(pixels.len(), w * h * 4);
    }
}

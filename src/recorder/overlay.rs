//! Burns an elapsed-time label into a gray plane.
//!
//! Glyphs come from a built-in 5x7 bitmap font. The same elapsed time always
//! produces the same pixels.

use super::types::OverlayStyle;

const GLYPH_W: usize = 5;
const GLYPH_H: usize = 7;
const ADVANCE: usize = GLYPH_W + 1;
const DEFAULT_SCALE: usize = 2;
const ANCHOR_X: usize = 10;
const ANCHOR_Y: usize = 8;
/// Offset between the outline pass and the fill pass.
const OUTLINE_OFFSET: usize = 1;
const BACKGROUND_PAD: usize = 2;

pub const DELTA_MARKER: char = '\u{0394}';

/// Formats seconds as `HH:MM:SS.mmm`. Negative input clamps to zero.
pub fn format_elapsed(secs: f64) -> String {
    let secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
    let total_ms = (secs * 1000.0).round() as u64;

    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    let sec = total_sec % 60;
    let total_min = total_sec / 60;
    let min = total_min % 60;
    let hours = total_min / 60;

    format!("{:02}:{:02}:{:02}.{:03}", hours, min, sec, ms)
}

pub fn label_text(secs: f64) -> String {
    format!("{}t {}", DELTA_MARKER, format_elapsed(secs))
}

fn glyph(c: char) -> [u8; GLYPH_H] {
    match c {
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
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        't' => [0x08, 0x08, 0x1C, 0x08, 0x08, 0x09, 0x06],
        DELTA_MARKER => [0x04, 0x04, 0x0A, 0x0A, 0x11, 0x11, 0x1F],
        _ => [0; GLYPH_H],
    }
}

/// Stamps the elapsed-time label onto gray planes.
#[derive(Clone, Debug)]
pub struct OverlayCompositor {
    style: OverlayStyle,
    scale: usize,
}

impl Default for OverlayCompositor {
    fn default() -> Self {
        Self::new(OverlayStyle::default())
    }
}

impl OverlayCompositor {
    pub fn new(style: OverlayStyle) -> Self {
        Self {
            style,
            scale: DEFAULT_SCALE,
        }
    }

    pub fn set_style(&mut self, style: OverlayStyle) {
        self.style = style;
    }

    /// Mutates `plane` in place. A disabled style leaves it untouched.
    pub fn stamp(&self, plane: &mut [u8], width: u32, height: u32, elapsed_secs: f64) {
        if !self.style.enabled {
            return;
        }
        let canvas = Canvas {
            plane,
            width: width as usize,
            height: height as usize,
        };
        self.draw_label(canvas, &label_text(elapsed_secs));
    }

    fn draw_label(&self, mut canvas: Canvas<'_>, text: &str) {
        let outline = self.style.color.outline();
        let fill = self.style.color.fill();

        if self.style.background {
            let chars = text.chars().count();
            let w = chars * ADVANCE * self.scale + OUTLINE_OFFSET + 2 * BACKGROUND_PAD;
            let h = GLYPH_H * self.scale + OUTLINE_OFFSET + 2 * BACKGROUND_PAD;
            canvas.fill_rect(
                ANCHOR_X.saturating_sub(BACKGROUND_PAD),
                ANCHOR_Y.saturating_sub(BACKGROUND_PAD),
                w,
                h,
                outline,
            );
        }

        self.draw_text(
            &mut canvas,
            text,
            ANCHOR_X + OUTLINE_OFFSET,
            ANCHOR_Y + OUTLINE_OFFSET,
            outline,
        );
        self.draw_text(&mut canvas, text, ANCHOR_X, ANCHOR_Y, fill);
    }

    fn draw_text(&self, canvas: &mut Canvas<'_>, text: &str, x0: usize, y0: usize, value: u8) {
        for (i, c) in text.chars().enumerate() {
            let rows = glyph(c);
            let gx = x0 + i * ADVANCE * self.scale;
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_W {
                    if bits & (1 << (GLYPH_W - 1 - col)) == 0 {
                        continue;
                    }
                    canvas.fill_rect(
                        gx + col * self.scale,
                        y0 + row * self.scale,
                        self.scale,
                        self.scale,
                        value,
                    );
                }
            }
        }
    }
}

struct Canvas<'a> {
    plane: &'a mut [u8],
    width: usize,
    height: usize,
}

impl Canvas<'_> {
    fn fill_rect(&mut self, x: usize, y: usize, w: usize, h: usize, value: u8) {
        let x_end = (x + w).min(self.width);
        let y_end = (y + h).min(self.height);
        for yy in y..y_end {
            let row = yy * self.width;
            for xx in x..x_end {
                if let Some(px) = self.plane.get_mut(row + xx) {
                    *px = value;
                }
            }
        }
    }
}

//! Built-in 5x7 bitmap font for overlay captions.
//!
//! Each glyph is five column bytes, bit 0 at the top row. Printable ASCII only;
//! anything else renders as `?`.

use image::{Rgb, RgbImage};

pub const GLYPH_COLUMNS: u32 = 5;
pub const GLYPH_ROWS: u32 = 7;
/// Horizontal advance per character, in unscaled font pixels (glyph + 1 column gap).
pub const GLYPH_ADVANCE: u32 = GLYPH_COLUMNS + 1;

const FIRST: u8 = b' ';
const LAST: u8 = b'~';

#[rustfmt::skip]
const FONT_5X7: [[u8; 5]; 95] = [
    [0x00, 0x00, 0x00, 0x00, 0x00], // ' '
    [0x00, 0x00, 0x5F, 0x00, 0x00], // !
    [0x00, 0x07, 0x00, 0x07, 0x00], // "
    [0x14, 0x7F, 0x14, 0x7F, 0x14], // #
    [0x24, 0x2A, 0x7F, 0x2A, 0x12], // $
    [0x23, 0x13, 0x08, 0x64, 0x62], // %
    [0x36, 0x49, 0x55, 0x22, 0x50], // &
    [0x00, 0x05, 0x03, 0x00, 0x00], // '
    [0x00, 0x1C, 0x22, 0x41, 0x00], // (
    [0x00, 0x41, 0x22, 0x1C, 0x00], // )
    [0x08, 0x2A, 0x1C, 0x2A, 0x08], // *
    [0x08, 0x08, 0x3E, 0x08, 0x08], // +
    [0x00, 0x50, 0x30, 0x00, 0x00], // ,
    [0x08, 0x08, 0x08, 0x08, 0x08], // -
    [0x00, 0x60, 0x60, 0x00, 0x00], // .
    [0x20, 0x10, 0x08, 0x04, 0x02], // /
    [0x3E, 0x51, 0x49, 0x45, 0x3E], // 0
    [0x00, 0x42, 0x7F, 0x40, 0x00], // 1
    [0x42, 0x61, 0x51, 0x49, 0x46], // 2
    [0x21, 0x41, 0x45, 0x4B, 0x31], // 3
    [0x18, 0x14, 0x12, 0x7F, 0x10], // 4
    [0x27, 0x45, 0x45, 0x45, 0x39], // 5
    [0x3C, 0x4A, 0x49, 0x49, 0x30], // 6
    [0x01, 0x71, 0x09, 0x05, 0x03], // 7
    [0x36, 0x49, 0x49, 0x49, 0x36], // 8
    [0x06, 0x49, 0x49, 0x29, 0x1E], // 9
    [0x00, 0x36, 0x36, 0x00, 0x00], // :
    [0x00, 0x56, 0x36, 0x00, 0x00], // ;
    [0x08, 0x14, 0x22, 0x41, 0x00], // <
    [0x14, 0x14, 0x14, 0x14, 0x14], // =
    [0x00, 0x41, 0x22, 0x14, 0x08], // >
    [0x02, 0x01, 0x51, 0x09, 0x06], // ?
    [0x32, 0x49, 0x79, 0x41, 0x3E], // @
    [0x7E, 0x11, 0x11, 0x11, 0x7E], // A
    [0x7F, 0x49, 0x49, 0x49, 0x36], // B
    [0x3E, 0x41, 0x41, 0x41, 0x22], // C
    [0x7F, 0x41, 0x41, 0x22, 0x1C], // D
    [0x7F, 0x49, 0x49, 0x49, 0x41], // E
    [0x7F, 0x09, 0x09, 0x09, 0x01], // F
    [0x3E, 0x41, 0x49, 0x49, 0x7A], // G
    [0x7F, 0x08, 0x08, 0x08, 0x7F], // H
    [0x00, 0x41, 0x7F, 0x41, 0x00], // I
    [0x20, 0x40, 0x41, 0x3F, 0x01], // J
    [0x7F, 0x08, 0x14, 0x22, 0x41], // K
    [0x7F, 0x40, 0x40, 0x40, 0x40], // L
    [0x7F, 0x02, 0x0C, 0x02, 0x7F], // M
    [0x7F, 0x04, 0x08, 0x10, 0x7F], // N
    [0x3E, 0x41, 0x41, 0x41, 0x3E], // O
    [0x7F, 0x09, 0x09, 0x09, 0x06], // P
    [0x3E, 0x41, 0x51, 0x21, 0x5E], // Q
    [0x7F, 0x09, 0x19, 0x29, 0x46], // R
    [0x46, 0x49, 0x49, 0x49, 0x31], // S
    [0x01, 0x01, 0x7F, 0x01, 0x01], // T
    [0x3F, 0x40, 0x40, 0x40, 0x3F], // U
    [0x1F, 0x20, 0x40, 0x20, 0x1F], // V
    [0x3F, 0x40, 0x38, 0x40, 0x3F], // W
    [0x63, 0x14, 0x08, 0x14, 0x63], // X
    [0x07, 0x08, 0x70, 0x08, 0x07], // Y
    [0x61, 0x51, 0x49, 0x45, 0x43], // Z
    [0x00, 0x7F, 0x41, 0x41, 0x00], // [
    [0x02, 0x04, 0x08, 0x10, 0x20], // backslash
    [0x00, 0x41, 0x41, 0x7F, 0x00], // ]
    [0x04, 0x02, 0x01, 0x02, 0x04], // ^
    [0x40, 0x40, 0x40, 0x40, 0x40], // _
    [0x00, 0x01, 0x02, 0x04, 0x00], // `
    [0x20, 0x54, 0x54, 0x54, 0x78], // a
    [0x7F, 0x48, 0x44, 0x44, 0x38], // b
    [0x38, 0x44, 0x44, 0x44, 0x20], // c
    [0x38, 0x44, 0x44, 0x48, 0x7F], // d
    [0x38, 0x54, 0x54, 0x54, 0x18], // e
    [0x08, 0x7E, 0x09, 0x01, 0x02], // f
    [0x0C, 0x52, 0x52, 0x52, 0x3E], // g
    [0x7F, 0x08, 0x04, 0x04, 0x78], // h
    [0x00, 0x44, 0x7D, 0x40, 0x00], // i
    [0x20, 0x40, 0x44, 0x3D, 0x00], // j
    [0x7F, 0x10, 0x28, 0x44, 0x00], // k
    [0x00, 0x41, 0x7F, 0x40, 0x00], // l
    [0x7C, 0x04, 0x18, 0x04, 0x78], // m
    [0x7C, 0x08, 0x04, 0x04, 0x78], // n
    [0x38, 0x44, 0x44, 0x44, 0x38], // o
    [0x7C, 0x14, 0x14, 0x14, 0x08], // p
    [0x08, 0x14, 0x14, 0x18, 0x7C], // q
    [0x7C, 0x08, 0x04, 0x04, 0x08], // r
    [0x48, 0x54, 0x54, 0x54, 0x20], // s
    [0x04, 0x3F, 0x44, 0x40, 0x20], // t
    [0x3C, 0x40, 0x40, 0x20, 0x7C], // u
    [0x1C, 0x20, 0x40, 0x20, 0x1C], // v
    [0x3C, 0x40, 0x30, 0x40, 0x3C], // w
    [0x44, 0x28, 0x10, 0x28, 0x44], // x
    [0x0C, 0x50, 0x50, 0x50, 0x3C], // y
    [0x44, 0x64, 0x54, 0x4C, 0x44], // z
    [0x00, 0x08, 0x36, 0x41, 0x00], // {
    [0x00, 0x00, 0x7F, 0x00, 0x00], // |
    [0x00, 0x41, 0x36, 0x08, 0x00], // }
    [0x08, 0x04, 0x08, 0x10, 0x08], // ~
];

fn glyph(ch: char) -> &'static [u8; 5] {
    let code = if ch.is_ascii() { ch as u8 } else { b'?' };
    let code = if (FIRST..=LAST).contains(&code) { code } else { b'?' };
    &FONT_5X7[(code - FIRST) as usize]
}

/// Fixed font parameters for captions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FontSpec {
    /// Integer magnification of the 5x7 cell.
    pub scale: u32,
    /// Stroke weight in output pixels; 1 draws the plain scaled glyph.
    pub thickness: u32,
}

/// Pixel footprint of a string: width, cap height, and space below the baseline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextSize {
    pub width: u32,
    pub height: u32,
    pub baseline: u32,
}

impl FontSpec {
    pub const fn new(scale: u32, thickness: u32) -> Self {
        Self { scale, thickness }
    }

    fn stroke(&self) -> u32 {
        self.thickness.saturating_sub(1)
    }

    pub fn text_size(&self, text: &str) -> TextSize {
        let chars = text.chars().count() as u32;
        let width = if chars == 0 {
            0
        } else {
            (chars.saturating_mul(GLYPH_ADVANCE) - 1)
                .saturating_mul(self.scale)
                .saturating_add(self.stroke())
        };
        TextSize {
            width,
            height: GLYPH_ROWS
                .saturating_mul(self.scale)
                .saturating_add(self.stroke()),
            baseline: self.scale,
        }
    }

    /// Draw `text` with its top-left corner at `(x, y)`. Pixels outside the image are skipped.
    pub fn draw(&self, image: &mut RgbImage, text: &str, x: i32, y: i32, color: Rgb<u8>) {
        let (img_w, img_h) = (image.width() as i64, image.height() as i64);
        let scale = self.scale.max(1) as i64;
        let dot = scale + self.stroke() as i64;
        let mut pen_x = x as i64;
        for ch in text.chars() {
            for (col, bits) in glyph(ch).iter().enumerate() {
                for row in 0..GLYPH_ROWS as i64 {
                    if bits & (1 << row) == 0 {
                        continue;
                    }
                    let px = pen_x + col as i64 * scale;
                    let py = y as i64 + row * scale;
                    for dy in 0..dot {
                        let yy = py + dy;
                        if yy < 0 || yy >= img_h {
                            continue;
                        }
                        for dx in 0..dot {
                            let xx = px + dx;
                            if xx < 0 || xx >= img_w {
                                continue;
                            }
                            image.put_pixel(xx as u32, yy as u32, color);
                        }
                    }
                }
            }
            pen_x += GLYPH_ADVANCE as i64 * scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_size_scales_with_length_and_scale() {
        let font = FontSpec::new(2, 1);
        assert_eq!(
            font.text_size("AB"),
            TextSize {
                width: 22,
                height: 14,
                baseline: 2
            }
        );
        assert_eq!(font.text_size("").width, 0);
    }

    #[test]
    fn oversized_scale_saturates() {
        let size = FontSpec::new(u32::MAX, 1).text_size("Leaf Blast");
        assert_eq!(size.width, u32::MAX);
        assert_eq!(size.height, u32::MAX);
    }

    #[test]
    fn drawing_off_canvas_does_not_panic() {
        let mut img = RgbImage::new(10, 10);
        let font = FontSpec::new(3, 2);
        font.draw(&mut img, "Leaf 99%", -20, -5, Rgb([255, 255, 255]));
        font.draw(&mut img, "Leaf 99%", 8, 8, Rgb([255, 255, 255]));
    }

    #[test]
    fn draws_inside_footprint_only() {
        let font = FontSpec::new(1, 1);
        let mut img = RgbImage::new(20, 10);
        font.draw(&mut img, "H", 2, 1, Rgb([255, 0, 0]));
        let size = font.text_size("H");
        for (x, y, px) in img.enumerate_pixels() {
            if px.0 == [255, 0, 0] {
                assert!(x >= 2 && x < 2 + size.width);
                assert!(y >= 1 && y < 1 + size.height);
            }
        }
        assert_eq!(img.get_pixel(2, 1).0, [255, 0, 0]);
    }
}

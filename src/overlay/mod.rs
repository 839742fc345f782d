//! Overlay renderer: caption background, bounding box and caption text per detection.
//!
//! Draw order per detection is fixed: filled background, box outline, then text,
//! so neither the outline nor the text is hidden by the background fill.

mod glyphs;

pub use glyphs::{FontSpec, TextSize};

use image::Rgb;
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::detect::Detection;
use crate::frame::{Dims, Frame};

/// Horizontal padding between caption text and its background edge.
pub const LABEL_PADDING_X: i32 = 10;
/// Vertical padding between caption text and its background edge.
pub const LABEL_PADDING_Y: i32 = 5;
/// Gap between the caption background's bottom edge and the box's top edge.
pub const LABEL_GAP: i32 = 10;

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
pub const BACKGROUND_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
pub const BOX_THICKNESS: u32 = 2;
pub const DEFAULT_FONT: FontSpec = FontSpec::new(3, 2);

/// Half-open pixel rectangle `[x1, x2) x [y1, y2)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl PixelRect {
    fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    /// Intersect with `[0, width] x [0, height]`.
    fn clamped(&self, frame: Dims) -> Self {
        let (w, h) = (frame.width as i32, frame.height as i32);
        Self {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        }
    }
}

/// Where one detection's caption goes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelLayout {
    pub text: String,
    /// Clamped background; `None` when nothing of it is left on the canvas.
    pub background: Option<PixelRect>,
    /// Top-left corner of the caption text (may lie partly off-canvas).
    pub text_origin: (i32, i32),
}

/// Compute the caption layout for `detection` on a frame of size `frame`.
pub fn label_layout(detection: &Detection, frame: Dims, font: &FontSpec) -> LabelLayout {
    let text = detection.caption();
    let size = font.text_size(&text);
    let (text_w, text_h, baseline) = (size.width as i32, size.height as i32, size.baseline as i32);

    let x1 = detection.bbox.x1;
    let bottom = detection.bbox.y1 - LABEL_GAP;
    let top = bottom - (text_h + baseline + 2 * LABEL_PADDING_Y);
    let unclamped = PixelRect {
        x1,
        y1: top,
        x2: x1 + text_w + 2 * LABEL_PADDING_X,
        y2: bottom,
    };
    let clamped = unclamped.clamped(frame);
    LabelLayout {
        text,
        background: (!clamped.is_empty()).then_some(clamped),
        text_origin: (x1 + LABEL_PADDING_X, top + LABEL_PADDING_Y),
    }
}

/// Fixed styling for the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayStyle {
    pub font: FontSpec,
    pub box_color: Rgb<u8>,
    pub text_color: Rgb<u8>,
    pub background_color: Rgb<u8>,
    pub box_thickness: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            font: DEFAULT_FONT,
            box_color: BOX_COLOR,
            text_color: TEXT_COLOR,
            background_color: BACKGROUND_COLOR,
            box_thickness: BOX_THICKNESS,
        }
    }
}

impl OverlayStyle {
    pub fn with_font(font: FontSpec) -> Self {
        Self {
            font,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct OverlayRenderer {
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Draw every detection onto `frame` in place. Boxes must already be in `frame`'s space.
    pub fn render(&self, frame: &mut Frame, detections: &[Detection]) {
        let dims = frame.dims();
        let image = frame.as_image_mut();
        for det in detections {
            let layout = label_layout(det, dims, &self.style.font);

            if let Some(bg) = layout.background {
                draw_filled_rect_mut(
                    image,
                    Rect::at(bg.x1, bg.y1).of_size((bg.x2 - bg.x1) as u32, (bg.y2 - bg.y1) as u32),
                    self.style.background_color,
                );
            }

            let bbox = det.bbox;
            for inset in 0..self.style.box_thickness as i32 {
                let w = bbox.width() + 1 - 2 * inset;
                let h = bbox.height() + 1 - 2 * inset;
                if w <= 0 || h <= 0 {
                    break;
                }
                draw_hollow_rect_mut(
                    image,
                    Rect::at(bbox.x1 + inset, bbox.y1 + inset).of_size(w as u32, h as u32),
                    self.style.box_color,
                );
            }

            let (tx, ty) = layout.text_origin;
            self.style
                .font
                .draw(image, &layout.text, tx, ty, self.style.text_color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;

    fn detection(x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
        Detection {
            class_label: "Leaf Blast".to_string(),
            confidence: 0.91,
            bbox: BoundingBox::new(x1, y1, x2, y2),
        }
    }

    #[test]
    fn background_sits_above_box_and_fits_text() {
        let font = FontSpec::new(2, 1);
        let det = detection(50, 200, 150, 300);
        let layout = label_layout(&det, Dims::new(640, 480), &font);
        let size = font.text_size("Leaf Blast 91%");
        let bg = layout.background.unwrap();
        assert_eq!(layout.text, "Leaf Blast 91%");
        assert_eq!(bg.x1, 50);
        assert_eq!(bg.y2, 200 - LABEL_GAP);
        assert_eq!(bg.x2 - bg.x1, size.width as i32 + 2 * LABEL_PADDING_X);
        assert_eq!(
            bg.y2 - bg.y1,
            (size.height + size.baseline) as i32 + 2 * LABEL_PADDING_Y
        );
        assert_eq!(layout.text_origin, (60, bg.y1 + LABEL_PADDING_Y));
    }

    #[test]
    fn background_clamped_at_left_edge() {
        let det = detection(0, 120, 40, 200);
        let layout = label_layout(&det, Dims::new(320, 240), &DEFAULT_FONT);
        let bg = layout.background.unwrap();
        assert_eq!(bg.x1, 0);
        assert!(bg.y1 >= 0);
    }

    #[test]
    fn background_clamped_at_right_and_top_edges() {
        let det = detection(300, 20, 319, 100);
        let layout = label_layout(&det, Dims::new(320, 240), &DEFAULT_FONT);
        let bg = layout.background.unwrap();
        assert_eq!(bg.x2, 320);
        assert_eq!(bg.y1, 0);
        assert_eq!(bg.y2, 10);
    }

    #[test]
    fn background_dropped_when_fully_off_canvas() {
        let det = detection(10, 0, 50, 50);
        let layout = label_layout(&det, Dims::new(100, 100), &DEFAULT_FONT);
        assert_eq!(layout.background, None);
    }

    #[test]
    fn render_draws_box_over_background_and_text_last() {
        let mut frame = Frame::filled(200, 200, [100, 100, 100]);
        let det = detection(20, 100, 120, 180);
        let renderer = OverlayRenderer::new(OverlayStyle::with_font(FontSpec::new(1, 1)));
        renderer.render(&mut frame, &[det.clone()]);

        let img = frame.as_image();
        assert_eq!(img.get_pixel(20, 140).0, [0, 255, 0]);
        assert_eq!(img.get_pixel(120, 180).0, [0, 255, 0]);
        assert_eq!(img.get_pixel(70, 140).0, [100, 100, 100]);

        let layout = label_layout(&det, frame.dims(), &FontSpec::new(1, 1));
        let bg = layout.background.unwrap();
        // Padding corner is background, first glyph column of 'L' is text.
        assert_eq!(img.get_pixel(bg.x1 as u32 + 1, bg.y1 as u32 + 1).0, [0, 0, 0]);
        let (tx, ty) = layout.text_origin;
        assert_eq!(img.get_pixel(tx as u32, ty as u32).0, [255, 255, 255]);
    }

    #[test]
    fn render_keeps_frame_dimensions() {
        let mut frame = Frame::filled(64, 48, [0, 0, 0]);
        OverlayRenderer::default().render(&mut frame, &[detection(0, 0, 63, 47)]);
        assert_eq!(frame.dims(), Dims::new(64, 48));
    }
}

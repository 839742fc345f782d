//! Frame type shared by ingestion, inference, rendering and transport.
//!
//! - `Frame`: fixed-layout RGB8 raster (row-major, top-left origin).
//! - `Dims`: width/height pair used for resize targets and coordinate spaces.
//!
//! Channel order is RGB everywhere: decoders convert into it, the overlay renderer
//! draws in it, and the encoders read it back unchanged.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Interpolation used whenever a frame is scaled before inference.
/// Fixed so that identical inputs always produce identical resized frames.
pub const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// Width/height of a frame or coordinate space, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dims {
    pub width: u32,
    pub height: u32,
}

impl Dims {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either side is zero (no valid scale factor can be derived).
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Dims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An RGB8 frame. Owned by whoever is processing it; moved, not shared.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Wrap a raw RGB8 buffer. The buffer length must equal `width * height * 3`.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected_len,
                width,
                height,
                data.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| anyhow!("invalid frame buffer for {}x{}", width, height))?;
        Ok(Self { image })
    }

    /// A frame filled with a single colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, image::Rgb(rgb)),
        }
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    /// Decode any still-image format the `image` crate understands.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes).context("decode image")?;
        Ok(Self {
            image: decoded.into_rgb8(),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dims(&self) -> Dims {
        Dims::new(self.width(), self.height())
    }

    /// Row-major RGB bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.image.into_raw()
    }

    pub fn as_image(&self) -> &RgbImage {
        &self.image
    }

    pub fn as_image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Scaled copy at `target` resolution. `self` is left untouched.
    pub fn resized(&self, target: Dims) -> Result<Frame> {
        if target.is_degenerate() {
            return Err(anyhow!("cannot resize frame to {}", target));
        }
        if target == self.dims() {
            return Ok(self.clone());
        }
        Ok(Self {
            image: image::imageops::resize(&self.image, target.width, target.height, RESIZE_FILTER),
        })
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        self.image
            .write_to(&mut out, ImageFormat::Png)
            .context("encode png")?;
        Ok(out.into_inner())
    }

    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode(
                self.image.as_raw(),
                self.width(),
                self.height(),
                ExtendedColorType::Rgb8,
            )
            .context("encode jpeg")?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_rejects_wrong_length() {
        assert!(Frame::from_rgb(4, 4, vec![0u8; 4 * 4 * 3 - 1]).is_err());
        assert!(Frame::from_rgb(4, 4, vec![0u8; 4 * 4 * 3]).is_ok());
    }

    #[test]
    fn resize_keeps_source_untouched() {
        let frame = Frame::filled(64, 48, [10, 20, 30]);
        let small = frame.resized(Dims::new(32, 24)).unwrap();
        assert_eq!(small.dims(), Dims::new(32, 24));
        assert_eq!(frame.dims(), Dims::new(64, 48));
        assert_eq!(small.as_image().get_pixel(5, 5).0, [10, 20, 30]);
    }

    #[test]
    fn resize_to_zero_is_an_error() {
        let frame = Frame::filled(8, 8, [0, 0, 0]);
        assert!(frame.resized(Dims::new(0, 8)).is_err());
    }

    #[test]
    fn png_round_trip_preserves_channel_order() {
        let frame = Frame::filled(3, 2, [200, 10, 50]);
        let png = frame.encode_png().unwrap();
        let decoded = Frame::decode(&png).unwrap();
        assert_eq!(decoded, frame);
    }
}

//! Synthetic source (`stub://`) for tests and demos.
//!
//! Produces a leaf-green gradient with a brown lesion drifting across it. Query
//! parameters: `frames=N` ends the stream after N frames, `fps=N` overrides the
//! configured rate (0 disables pacing).

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::{FrameSource, Pacer};
use crate::frame::Frame;

const LEAF: [u8; 3] = [46, 139, 60];
const LESION: [u8; 3] = [120, 72, 30];

pub struct SyntheticSource {
    url: String,
    width: u32,
    height: u32,
    max_frames: Option<u64>,
    frame_count: u64,
    pacer: Pacer,
}

impl SyntheticSource {
    pub fn new(url: &str, width: u32, height: u32, target_fps: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("synthetic frame size must be non-zero"));
        }
        let parsed = Url::parse(url).with_context(|| format!("parse stub url {}", url))?;
        let mut max_frames = None;
        let mut fps = target_fps;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "frames" => {
                    max_frames = Some(
                        value
                            .parse::<u64>()
                            .with_context(|| format!("invalid frames={} in {}", value, url))?,
                    )
                }
                "fps" => {
                    fps = value
                        .parse::<u32>()
                        .with_context(|| format!("invalid fps={} in {}", value, url))?
                }
                other => log::warn!("ignoring unknown stub parameter '{}'", other),
            }
        }
        log::info!("SyntheticSource: {} at {}x{}", url, width, height);
        Ok(Self {
            url: url.to_string(),
            width,
            height,
            max_frames,
            frame_count: 0,
            pacer: Pacer::new(fps),
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn render(&self) -> Frame {
        let mut frame = Frame::filled(self.width, self.height, LEAF);
        let (w, h) = (self.width as u64, self.height as u64);
        let radius = (w.min(h) / 10).max(1) as i64;
        let cx = ((self.frame_count * 7) % w) as i64;
        let cy = (h / 2) as i64;
        let image = frame.as_image_mut();
        for (x, y, px) in image.enumerate_pixels_mut() {
            let shade = (y as u64 * 40 / h.max(1)) as u8;
            px.0 = [LEAF[0], LEAF[1].saturating_sub(shade), LEAF[2]];
            let (dx, dy) = (x as i64 - cx, y as i64 - cy);
            if dx * dx + dy * dy <= radius * radius {
                px.0 = LESION;
            }
        }
        frame
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(max) = self.max_frames {
            if self.frame_count >= max {
                return Ok(None);
            }
        }
        self.pacer.wait();
        let frame = self.render();
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn describe(&self) -> String {
        format!("{} (synthetic {}x{})", self.url, self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Dims;

    #[test]
    fn produces_frames_of_configured_size() {
        let mut source = SyntheticSource::new("stub://camera?fps=0", 64, 48, 10).unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.dims(), Dims::new(64, 48));
    }

    #[test]
    fn frame_limit_ends_stream() {
        let mut source = SyntheticSource::new("stub://camera?frames=2&fps=0", 8, 8, 10).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.frames_captured(), 2);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(SyntheticSource::new("stub://camera?frames=abc", 8, 8, 10).is_err());
        assert!(SyntheticSource::new("stub://camera", 0, 8, 10).is_err());
    }
}

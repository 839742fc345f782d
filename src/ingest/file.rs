//! Local image source.
//!
//! `ImageSequenceSource` plays a single image or every image in a directory
//! (sorted by file name) as a looping stream. Only local paths are accepted.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::{FrameSource, Pacer};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

pub struct ImageSequenceSource {
    origin: PathBuf,
    paths: Vec<PathBuf>,
    position: usize,
    looping: bool,
    pacer: Pacer,
}

impl ImageSequenceSource {
    pub fn open(path: impl AsRef<Path>, target_fps: u32) -> Result<Self> {
        let origin = path.as_ref().to_path_buf();
        let paths = if origin.is_dir() {
            let mut entries = Vec::new();
            for entry in std::fs::read_dir(&origin)
                .with_context(|| format!("read image directory {}", origin.display()))?
            {
                let entry = entry.context("read directory entry")?;
                let candidate = entry.path();
                if candidate.is_file() && is_image_path(&candidate) {
                    entries.push(candidate);
                }
            }
            entries.sort();
            entries
        } else if origin.is_file() {
            vec![origin.clone()]
        } else {
            return Err(anyhow!("image source not found: {}", origin.display()));
        };
        if paths.is_empty() {
            return Err(anyhow!("no images in {}", origin.display()));
        }
        log::info!(
            "ImageSequenceSource: {} ({} images)",
            origin.display(),
            paths.len()
        );
        Ok(Self {
            origin,
            paths,
            position: 0,
            looping: true,
            pacer: Pacer::new(target_fps),
        })
    }

    /// Play the sequence once, then report end of stream.
    pub fn once(mut self) -> Self {
        self.looping = false;
        self
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.position >= self.paths.len() {
            if !self.looping {
                return Ok(None);
            }
            self.position = 0;
        }
        let path = &self.paths[self.position];
        self.position += 1;
        self.pacer.wait();
        let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let frame =
            Frame::decode(&bytes).with_context(|| format!("decode {}", path.display()))?;
        Ok(Some(frame))
    }

    fn describe(&self) -> String {
        format!("{} ({} images)", self.origin.display(), self.paths.len())
    }
}

fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Dims;

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) {
        let bytes = Frame::filled(width, height, [10, 200, 30])
            .encode_png()
            .unwrap();
        std::fs::write(dir.join(name), bytes).unwrap();
    }

    #[test]
    fn plays_directory_in_name_order_and_loops() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "b.png", 8, 8);
        write_png(dir.path(), "a.png", 4, 4);
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), 0).unwrap();
        assert_eq!(source.len(), 2);
        let dims: Vec<Dims> = (0..3)
            .map(|_| source.next_frame().unwrap().unwrap().dims())
            .collect();
        assert_eq!(
            dims,
            vec![Dims::new(4, 4), Dims::new(8, 8), Dims::new(4, 4)]
        );
    }

    #[test]
    fn once_ends_after_last_image() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "only.png", 4, 4);
        let mut source = ImageSequenceSource::open(dir.path().join("only.png"), 0)
            .unwrap()
            .once();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn empty_or_missing_paths_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageSequenceSource::open(dir.path(), 0).is_err());
        assert!(ImageSequenceSource::open(dir.path().join("missing.png"), 0).is_err());
    }
}

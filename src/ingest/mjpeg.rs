//! HTTP camera source.
//!
//! A `multipart/*` response is read as an MJPEG stream and split on JPEG
//! SOI/EOI markers; any other content type is treated as a snapshot endpoint
//! and polled once per frame.
//!
//! Every socket read is bounded by a read timeout, so a camera that stalls
//! mid-stream surfaces as a source error instead of pinning the session
//! thread.

use std::io::Read;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use super::{FrameSource, Pacer};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 4 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

pub struct MjpegHttpSource {
    url: String,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    pacer: Pacer,
    frame_count: u64,
}

impl MjpegHttpSource {
    pub fn connect(url: &str, target_fps: u32) -> Result<Self> {
        Self::connect_with_read_timeout(url, target_fps, DEFAULT_READ_TIMEOUT)
    }

    pub fn connect_with_read_timeout(
        url: &str,
        target_fps: u32,
        read_timeout: Duration,
    ) -> Result<Self> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(read_timeout)
            .timeout_write(read_timeout)
            .build();
        let mut source = Self {
            url: url.to_string(),
            agent,
            stream: None,
            pacer: Pacer::new(target_fps),
            frame_count: 0,
        };
        source.open()?;
        Ok(source)
    }

    fn open(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("connect to camera {}", self.url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        self.stream = Some(if content_type.contains("multipart") {
            HttpStream::Mjpeg(MjpegStream::new(response.into_reader()))
        } else {
            HttpStream::SingleJpeg
        });
        log::info!("MjpegHttpSource: connected to {} ({})", self.url, content_type);
        Ok(())
    }

    fn fetch_single_jpeg(&self) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", self.url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64)
            .read_to_end(&mut bytes)
            .context("read jpeg snapshot")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty jpeg snapshot"));
        }
        Ok(bytes)
    }
}

impl FrameSource for MjpegHttpSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.stream.is_none() {
            self.open()?;
        }
        loop {
            let jpeg = match self.stream.as_mut() {
                Some(HttpStream::Mjpeg(stream)) => match stream.read_next_jpeg() {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        // Reconnect on the next call.
                        self.stream = None;
                        return Err(err);
                    }
                },
                Some(HttpStream::SingleJpeg) => {
                    self.pacer.wait();
                    self.fetch_single_jpeg()?
                }
                None => return Err(anyhow!("camera {} not connected", self.url)),
            };

            if matches!(self.stream, Some(HttpStream::Mjpeg(_))) {
                // Drop frames that arrive faster than the target rate.
                if self.pacer.too_soon() {
                    continue;
                }
                self.pacer.mark();
            }

            let frame = Frame::decode(&jpeg).context("decode camera jpeg")?;
            self.frame_count += 1;
            return Ok(Some(frame));
        }
    }

    fn describe(&self) -> String {
        format!("{} ({} frames)", self.url, self.frame_count)
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
    scanner: JpegScanner,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
            scanner: JpegScanner::default(),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = self.scanner.scan(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                self.scanner = JpegScanner::default();
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
                self.scanner = JpegScanner::default();
            }
        }
    }
}

/// Incremental JPEG frame finder.
///
/// Walks marker segments by their length fields, so EOI bytes inside an
/// embedded EXIF thumbnail are skipped, and resumes from where the previous
/// call stopped instead of rescanning the buffer.
#[derive(Debug, Default)]
struct JpegScanner {
    start: Option<usize>,
    pos: usize,
    in_entropy_data: bool,
}

impl JpegScanner {
    /// Returns `(start, end)` of the first complete frame in `buffer`.
    /// `buffer` must only grow between calls.
    fn scan(&mut self, buffer: &[u8]) -> Option<(usize, usize)> {
        let mut start = match self.start {
            Some(start) => start,
            None => {
                let from = self.pos.min(buffer.len());
                match buffer[from..].windows(2).position(|w| w == [0xFF, 0xD8]) {
                    Some(offset) => {
                        let start = from + offset;
                        self.start = Some(start);
                        self.pos = start + 2;
                        start
                    }
                    None => {
                        // Keep a trailing 0xFF in case the SOI straddles reads.
                        self.pos = buffer.len().saturating_sub(1).max(from);
                        return None;
                    }
                }
            }
        };

        loop {
            if self.in_entropy_data {
                loop {
                    if self.pos + 1 >= buffer.len() {
                        return None;
                    }
                    if buffer[self.pos] != 0xFF {
                        self.pos += 1;
                        continue;
                    }
                    match buffer[self.pos + 1] {
                        // Fill byte: the next 0xFF may start the marker.
                        0xFF => self.pos += 1,
                        // Stuffed zero and restart markers belong to the scan.
                        0x00 | 0xD0..=0xD7 => self.pos += 2,
                        _ => break,
                    }
                }
                self.in_entropy_data = false;
            }

            if self.pos + 2 > buffer.len() {
                return None;
            }
            if buffer[self.pos] != 0xFF {
                // Not on a marker boundary; hunt for the next marker.
                self.in_entropy_data = true;
                continue;
            }
            match buffer[self.pos + 1] {
                0xFF => self.pos += 1,
                0xD9 => return Some((start, self.pos + 2)),
                0xD8 => {
                    // A new frame began before the previous one ended.
                    start = self.pos;
                    self.start = Some(start);
                    self.pos += 2;
                }
                0x01 | 0xD0..=0xD7 => self.pos += 2,
                marker => {
                    if self.pos + 4 > buffer.len() {
                        return None;
                    }
                    let len =
                        u16::from_be_bytes([buffer[self.pos + 2], buffer[self.pos + 3]]) as usize;
                    if len < 2 {
                        self.pos += 2;
                        self.in_entropy_data = true;
                        continue;
                    }
                    let next = self.pos + 2 + len;
                    if next > buffer.len() {
                        return None;
                    }
                    self.pos = next;
                    if marker == 0xDA {
                        self.in_entropy_data = true;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(buffer: &[u8]) -> Option<(usize, usize)> {
        JpegScanner::default().scan(buffer)
    }

    /// Hands out at most `step` bytes per read.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    /// `jpeg` with an APP1 segment carrying a complete thumbnail JPEG.
    fn with_exif_thumbnail(jpeg: &[u8], thumbnail: &[u8]) -> Vec<u8> {
        let mut payload = b"Exif\0\0".to_vec();
        payload.extend_from_slice(thumbnail);
        let len = (payload.len() + 2) as u16;
        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn finds_complete_jpeg_only() {
        let buffer = [0x00, 0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9, 0x33];
        assert_eq!(bounds(&buffer), Some((1, 7)));
        assert_eq!(bounds(&buffer[..5]), None);
        assert_eq!(bounds(&[0xFF]), None);
    }

    #[test]
    fn embedded_thumbnail_does_not_end_the_frame() {
        let thumbnail = Frame::filled(2, 2, [0, 0, 0]).encode_jpeg(50).unwrap();
        let jpeg = Frame::filled(8, 8, [30, 160, 30]).encode_jpeg(90).unwrap();
        let full = with_exif_thumbnail(&jpeg, &thumbnail);
        let mut buffer = b"--frame\r\n\r\n".to_vec();
        buffer.extend_from_slice(&full);
        buffer.extend_from_slice(b"\r\n--frame");
        assert_eq!(bounds(&buffer), Some((11, 11 + full.len())));
    }

    #[test]
    fn scanning_resumes_across_partial_reads() {
        let thumbnail = Frame::filled(2, 2, [0, 0, 0]).encode_jpeg(50).unwrap();
        let jpeg = Frame::filled(16, 16, [200, 10, 10]).encode_jpeg(90).unwrap();
        let full = with_exif_thumbnail(&jpeg, &thumbnail);
        let mut body = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        body.extend_from_slice(&full);
        body.extend_from_slice(b"\r\n--frame\r\n\r\n");
        body.extend_from_slice(&jpeg);

        let mut stream = MjpegStream::new(Box::new(Trickle {
            data: body,
            pos: 0,
            step: 3,
        }));
        assert_eq!(stream.read_next_jpeg().unwrap(), full);
        assert_eq!(stream.read_next_jpeg().unwrap(), jpeg);
        assert!(stream.read_next_jpeg().is_err());
    }

    #[test]
    fn splits_multipart_body_into_frames() {
        let jpeg = Frame::filled(4, 4, [200, 10, 10]).encode_jpeg(90).unwrap();
        let mut body = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        body.extend_from_slice(&jpeg);
        body.extend_from_slice(b"\r\n--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        body.extend_from_slice(&jpeg);

        let mut stream = MjpegStream::new(Box::new(std::io::Cursor::new(body)));
        let first = stream.read_next_jpeg().unwrap();
        assert_eq!(first, jpeg);
        let second = stream.read_next_jpeg().unwrap();
        assert_eq!(Frame::decode(&second).unwrap().width(), 4);
        assert!(stream.read_next_jpeg().is_err());
    }
}

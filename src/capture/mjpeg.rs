//! Motion-JPEG stream source
//!
//! Reads a concatenation of JPEG images (the `-f mjpeg` container, or the
//! body of an MJPEG endpoint piped from stdin) and decodes each image in turn.

use std::io::{ErrorKind, Read};

use bytes::Bytes;
use tracing::{debug, instrument, warn};

use super::{Frame, FrameSource, Pacer, PixelFormat, SourcePoll};
use crate::error::SourceError;

const READ_CHUNK: usize = 64 * 1024;

/// Largest image accepted before its start marker is given up on
pub const MAX_IMAGE_BYTES: usize = 16 * 1024 * 1024;

const SOI: [u8; 2] = [0xFF, 0xD8];

/// Frame source over any byte stream carrying back-to-back JPEG images
pub struct MjpegSource<R> {
    reader: R,
    buf: Vec<u8>,
    eof: bool,
    pacer: Option<Pacer>,
    sequence: u64,
    max_image: usize,
}

impl<R: Read + Send> MjpegSource<R> {
    pub fn new(reader: R, pacer: Option<Pacer>) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(READ_CHUNK * 2),
            eof: false,
            pacer,
            sequence: 0,
            max_image: MAX_IMAGE_BYTES,
        }
    }

    /// Override the pending image size limit.
    pub fn with_max_image(mut self, bytes: usize) -> Self {
        self.max_image = bytes;
        self
    }

    /// Pull the next complete JPEG image out of the read buffer.
    ///
    /// An image still incomplete past `max_image` bytes is abandoned and the
    /// search resumes at the next start marker.
    fn extract(&mut self) -> Option<Vec<u8>> {
        loop {
            let Some(start) = self.buf.windows(2).position(|w| w == SOI.as_slice()) else {
                // Keep a trailing 0xFF in case it begins the next SOI
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                let len = self.buf.len();
                self.buf.drain(..len - keep);
                return None;
            };
            if start > 0 {
                debug!(skipped = start, "discarding bytes before start of image");
                self.buf.drain(..start);
            }

            if let Some(end) = scan_jpeg(&self.buf) {
                return Some(self.buf.drain(..end).collect());
            }
            if self.buf.len() <= self.max_image {
                return None;
            }
            warn!(
                pending = self.buf.len(),
                limit = self.max_image,
                "image exceeds size limit, resyncing on next start marker"
            );
            self.buf.drain(..SOI.len());
        }
    }

    fn fill(&mut self) -> Result<(), SourceError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn decode(&mut self, jpeg: &[u8]) -> Option<Frame> {
        let mut decoder = zune_jpeg::JpegDecoder::new(jpeg);
        let pixels = match decoder.decode() {
            Ok(pixels) => pixels,
            Err(e) => {
                warn!(error = %e, bytes = jpeg.len(), "skipping undecodable image");
                return None;
            }
        };
        let (width, height) = decoder.dimensions()?;
        let format = if pixels.len() == width * height {
            PixelFormat::Gray8
        } else {
            PixelFormat::Rgb24
        };

        self.sequence += 1;
        match Frame::new(
            Bytes::from(pixels),
            width as u32,
            height as u32,
            format,
            self.sequence,
        ) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(error = %e, "decoded image has unexpected layout");
                None
            }
        }
    }
}

impl<R: Read + Send> FrameSource for MjpegSource<R> {
    #[instrument(skip(self), level = "trace")]
    fn next_frame(&mut self) -> Result<SourcePoll, SourceError> {
        loop {
            if let Some(jpeg) = self.extract() {
                let Some(frame) = self.decode(&jpeg) else {
                    return Ok(SourcePoll::Empty);
                };
                if let Some(pacer) = self.pacer.as_mut() {
                    pacer.wait();
                }
                return Ok(SourcePoll::Frame(frame));
            }
            if self.eof {
                if !self.buf.is_empty() {
                    debug!(bytes = self.buf.len(), "discarding truncated trailing image");
                    self.buf.clear();
                }
                return Ok(SourcePoll::Closed);
            }
            self.fill()?;
        }
    }
}

/// Length of the JPEG image starting at `buf[0]`, or `None` if more bytes are needed.
///
/// Walks marker segments rather than searching for the first EOI, so
/// embedded thumbnails do not cut an image short.
fn scan_jpeg(buf: &[u8]) -> Option<usize> {
    let mut pos = SOI.len();
    loop {
        if pos + 1 >= buf.len() {
            return None;
        }
        if buf[pos] != 0xFF {
            pos += 1;
            continue;
        }
        match buf[pos + 1] {
            // fill byte
            0xFF => pos += 1,
            // EOI
            0xD9 => return Some(pos + 2),
            // standalone markers
            0x01 | 0xD0..=0xD7 => pos += 2,
            // SOS: header, then entropy-coded data up to the next real marker
            0xDA => {
                pos += 2 + segment_len(buf, pos)?;
                loop {
                    if pos + 1 >= buf.len() {
                        return None;
                    }
                    let next = buf[pos + 1];
                    if buf[pos] == 0xFF && next != 0x00 && !(0xD0..=0xD7).contains(&next) {
                        break;
                    }
                    pos += 1;
                }
            }
            _ => pos += 2 + segment_len(buf, pos)?,
        }
    }
}

fn segment_len(buf: &[u8], marker: usize) -> Option<usize> {
    let hi = *buf.get(marker + 2)?;
    let lo = *buf.get(marker + 3)?;
    Some(u16::from_be_bytes([hi, lo]) as usize)
}

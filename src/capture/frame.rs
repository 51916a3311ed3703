use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;

use crate::error::FrameError;

/// Decoded frame with zero-copy sharing semantics.
///
/// Cloning only bumps reference counts, so the same pixels can be handed to
/// any number of pipelines. A published frame is never written to again;
/// overlays are drawn into a fresh copy.
#[derive(Clone)]
pub struct Frame {
    /// Immutable pixel data, `meta.stride * meta.height` bytes
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// When the frame entered the process; pipelines report latency against it
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Source-assigned frame counter
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: u32,
    pub format: PixelFormat,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

impl Frame {
    /// Wrap tightly packed pixel data, checking it against the declared geometry.
    pub fn new(
        data: Bytes,
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty { width, height });
        }
        let stride = width
            .checked_mul(format.bytes_per_pixel())
            .ok_or(FrameError::Overflow { width, height })?;
        let expected = (stride as usize)
            .checked_mul(height as usize)
            .ok_or(FrameError::Overflow { width, height })?;
        if data.len() != expected {
            return Err(FrameError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            data,
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride,
                format,
            }),
            timestamp: Instant::now(),
        })
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    /// Same metadata and timestamp, different pixels.
    pub(crate) fn with_data(&self, data: Bytes) -> Self {
        Self {
            data,
            meta: Arc::clone(&self.meta),
            timestamp: self.timestamp,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_length() {
        let err = Frame::new(Bytes::from(vec![0u8; 10]), 2, 2, PixelFormat::Rgb24, 1).unwrap_err();
        assert_eq!(
            err,
            FrameError::LengthMismatch {
                expected: 12,
                actual: 10
            }
        );
    }

    #[test]
    fn rejects_empty_dimensions() {
        let err = Frame::new(Bytes::new(), 0, 4, PixelFormat::Gray8, 1).unwrap_err();
        assert_eq!(
            err,
            FrameError::Empty {
                width: 0,
                height: 4
            }
        );
    }

    #[test]
    fn clone_shares_pixels() {
        let frame = Frame::new(Bytes::from(vec![7u8; 4]), 2, 2, PixelFormat::Gray8, 3).unwrap();
        let copy = frame.clone();
        assert_eq!(copy.data.as_ptr(), frame.data.as_ptr());
        assert_eq!(copy.meta.stride, 2);
        assert_eq!(copy.meta.sequence, 3);
    }
}

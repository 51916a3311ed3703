//! Snapshot sink: keeps the latest delivered frame on disk as a JPEG

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use tracing::debug;

use super::{FrameSink, SinkStatus};
use crate::error::SinkError;
use crate::{Frame, PixelFormat};

pub struct SnapshotSink {
    path: PathBuf,
    tmp: PathBuf,
    every: u64,
    frames: u64,
}

impl SnapshotSink {
    /// Write every `every`th frame to `<dir>/<stem>.jpg`, replacing the previous one.
    pub fn new(dir: &Path, stem: &str, every: u64) -> Result<Self, SinkError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(format!("{stem}.jpg")),
            tmp: dir.join(format!(".{stem}.jpg.tmp")),
            every: every.max(1),
            frames: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, frame: &Frame) -> Result<(), SinkError> {
        let image = to_image(frame)?;
        // Write then rename so readers never see a half-written file
        image.save_with_format(&self.tmp, ImageFormat::Jpeg)?;
        fs::rename(&self.tmp, &self.path)?;
        Ok(())
    }
}

fn to_image(frame: &Frame) -> Result<DynamicImage, SinkError> {
    let (w, h) = (frame.width(), frame.height());
    let packed = (w * frame.format().bytes_per_pixel()) as usize;
    let mut pixels = Vec::with_capacity(packed * h as usize);
    for row in frame.data.chunks_exact(frame.meta.stride as usize).take(h as usize) {
        pixels.extend_from_slice(&row[..packed]);
    }

    let image = match frame.format() {
        PixelFormat::Rgb24 => RgbImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgb8),
        PixelFormat::Bgr24 => {
            for px in pixels.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            RgbImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgb8)
        }
        PixelFormat::Gray8 => GrayImage::from_raw(w, h, pixels).map(DynamicImage::ImageLuma8),
    };
    image.ok_or_else(|| SinkError::Fatal("frame data shorter than its dimensions".into()))
}

impl FrameSink for SnapshotSink {
    fn display(&mut self, frame: &Frame, label: &str) -> Result<SinkStatus, SinkError> {
        self.frames += 1;
        if (self.frames - 1) % self.every == 0 {
            self.write(frame)?;
            debug!(pipeline = label, path = %self.path.display(), "snapshot written");
        }
        Ok(SinkStatus::Continue)
    }

    fn close(&mut self) {
        let _ = fs::remove_file(&self.tmp);
    }
}

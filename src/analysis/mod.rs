//! Frame analysis: normalization, detection and coordinate remapping
//!
//! Annotators never see the published frame. They get a grayscale copy
//! scaled to the pipeline's analysis resolution, and report regions in that
//! coordinate space; the pipeline maps them back before drawing.

pub mod draw;
pub mod motion;

use image::imageops::{self, FilterType};
use image::GrayImage;

pub use draw::{draw_regions, OutlineStyle};
pub use motion::MotionAnnotator;

use crate::error::{AnnotateError, FrameError};
use crate::{Frame, PixelFormat};

/// Axis-aligned rectangle in some frame's pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DetectionRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DetectionRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Map from a `from` sized frame onto a `to` sized one, rounding down.
    pub fn rescale(&self, from: (u32, u32), to: (u32, u32)) -> Self {
        Self {
            x: scale(self.x, from.0, to.0),
            y: scale(self.y, from.1, to.1),
            width: scale(self.width, from.0, to.0),
            height: scale(self.height, from.1, to.1),
        }
    }
}

fn scale(value: u32, from: u32, to: u32) -> u32 {
    (u64::from(value) * u64::from(to))
        .checked_div(u64::from(from))
        .map_or(0, |v| u32::try_from(v).unwrap_or(u32::MAX))
}

/// Detector run on the normalized analysis frame.
///
/// One call per frame; an empty result is a normal outcome. Errors only
/// cost the overlay of the current frame.
pub trait FrameAnnotator: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<DetectionRegion>, AnnotateError>;
}

impl<A: FrameAnnotator + ?Sized> FrameAnnotator for Box<A> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<DetectionRegion>, AnnotateError> {
        (**self).detect(frame)
    }
}

/// Grayscale, resize to `width`x`height` and equalize the histogram.
pub fn prepare(frame: &Frame, width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let luma = to_luma(frame)?;
    let mut scaled = if luma.dimensions() == (width, height) {
        luma
    } else {
        imageops::resize(&luma, width, height, FilterType::Triangle)
    };
    equalize_histogram(&mut scaled);
    Ok(scaled)
}

fn to_luma(frame: &Frame) -> Result<GrayImage, FrameError> {
    let meta = &frame.meta;
    let (w, h) = (meta.width as usize, meta.height as usize);
    let bpp = meta.format.bytes_per_pixel() as usize;
    let stride = meta.stride as usize;
    let expected = stride * h;
    if frame.data.len() < expected || stride < w * bpp {
        return Err(FrameError::LengthMismatch {
            expected,
            actual: frame.data.len(),
        });
    }

    let mut out = Vec::with_capacity(w * h);
    for row in frame.data.chunks_exact(stride).take(h) {
        for px in row[..w * bpp].chunks_exact(bpp) {
            out.push(match meta.format {
                PixelFormat::Rgb24 => luma(px[0], px[1], px[2]),
                PixelFormat::Bgr24 => luma(px[2], px[1], px[0]),
                PixelFormat::Gray8 => px[0],
            });
        }
    }

    GrayImage::from_raw(meta.width, meta.height, out).ok_or(FrameError::Overflow {
        width: meta.width,
        height: meta.height,
    })
}

/// ITU-R BT.601 luma
pub(crate) fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b) + 500) / 1000) as u8
}

/// Stretch the intensity distribution across the full 0..=255 range.
pub fn equalize_histogram(image: &mut GrayImage) {
    let mut hist = [0u64; 256];
    for p in image.pixels() {
        hist[p[0] as usize] += 1;
    }

    let total: u64 = hist.iter().sum();
    let mut cdf = [0u64; 256];
    let mut acc = 0;
    for (c, h) in cdf.iter_mut().zip(hist) {
        acc += h;
        *c = acc;
    }
    let Some(&cdf_min) = cdf.iter().find(|&&c| c > 0) else {
        return;
    };
    // A single intensity has nothing to stretch
    if total == cdf_min {
        return;
    }

    let span = total - cdf_min;
    let mut lut = [0u8; 256];
    for (l, c) in lut.iter_mut().zip(cdf) {
        *l = ((c.saturating_sub(cdf_min) * 255 + span / 2) / span) as u8;
    }
    for p in image.pixels_mut() {
        p[0] = lut[p[0] as usize];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn rescales_to_original_resolution() {
        let region = DetectionRegion::new(10, 10, 20, 20);
        assert_eq!(
            region.rescale((640, 480), (1280, 960)),
            DetectionRegion::new(20, 20, 40, 40)
        );
    }

    #[test]
    fn rescale_rounds_down() {
        let region = DetectionRegion::new(3, 5, 7, 9);
        // 3 * 1000 / 640 = 4.68, 5 * 720 / 480 = 7.5
        assert_eq!(
            region.rescale((640, 480), (1000, 720)),
            DetectionRegion::new(4, 7, 10, 13)
        );
    }

    #[test]
    fn rescale_from_zero_size_collapses() {
        let region = DetectionRegion::new(3, 5, 7, 9);
        assert_eq!(
            region.rescale((0, 0), (100, 100)),
            DetectionRegion::new(0, 0, 0, 0)
        );
    }

    #[test]
    fn prepare_converts_and_resizes() {
        let mut data = Vec::new();
        for y in 0..8u8 {
            for x in 0..8u8 {
                data.extend_from_slice(&[x * 30, y * 30, 0]);
            }
        }
        let frame = Frame::new(Bytes::from(data), 8, 8, PixelFormat::Rgb24, 1).unwrap();

        let analysis = prepare(&frame, 4, 4).unwrap();
        assert_eq!(analysis.dimensions(), (4, 4));
        let min = analysis.pixels().map(|p| p[0]).min().unwrap();
        let max = analysis.pixels().map(|p| p[0]).max().unwrap();
        assert_eq!(min, 0);
        assert_eq!(max, 255);
    }

    #[test]
    fn bgr_and_rgb_agree() {
        let rgb = Frame::new(Bytes::from(vec![200, 10, 50]), 1, 1, PixelFormat::Rgb24, 1).unwrap();
        let bgr = Frame::new(Bytes::from(vec![50, 10, 200]), 1, 1, PixelFormat::Bgr24, 1).unwrap();
        assert_eq!(to_luma(&rgb).unwrap(), to_luma(&bgr).unwrap());
    }

    #[test]
    fn equalize_leaves_flat_image_alone() {
        let mut image = GrayImage::from_pixel(4, 4, image::Luma([77]));
        equalize_histogram(&mut image);
        assert!(image.pixels().all(|p| p[0] == 77));
    }

    #[test]
    fn equalize_stretches_narrow_range() {
        let mut image = GrayImage::from_fn(4, 1, |x, _| image::Luma([100 + x as u8]));
        equalize_histogram(&mut image);
        let values: Vec<u8> = image.pixels().map(|p| p[0]).collect();
        assert_eq!(values, vec![0, 85, 170, 255]);
    }
}

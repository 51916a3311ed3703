//! Region outlines drawn onto a copy of the frame

use bytes::BytesMut;

use super::{luma, DetectionRegion};
use crate::capture::FrameMetadata;
use crate::{Frame, PixelFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutlineStyle {
    /// RGB, converted to the frame's pixel format when drawn
    pub color: [u8; 3],
    pub thickness: u32,
}

impl Default for OutlineStyle {
    fn default() -> Self {
        Self {
            color: [0, 255, 0],
            thickness: 2,
        }
    }
}

/// New frame carrying `frame`'s pixels with every region outlined.
///
/// Regions are in `frame`'s own coordinates and are clipped to it.
pub fn draw_regions(frame: &Frame, regions: &[DetectionRegion], style: OutlineStyle) -> Frame {
    let mut data = BytesMut::from(&frame.data[..]);
    for region in regions {
        draw_outline(&mut data, &frame.meta, region, style);
    }
    frame.with_data(data.freeze())
}

fn draw_outline(data: &mut [u8], meta: &FrameMetadata, region: &DetectionRegion, style: OutlineStyle) {
    let (w, h) = (u64::from(meta.width), u64::from(meta.height));
    let t = u64::from(style.thickness.max(1));

    let left = u64::from(region.x);
    let top = u64::from(region.y);
    let right = left + u64::from(region.width);
    let bottom = top + u64::from(region.height);
    if left >= w || top >= h || right <= left || bottom <= top {
        return;
    }

    let pixel = encode(meta.format, style.color);
    let bpp = pixel.len() as u64;
    let stride = u64::from(meta.stride);

    for y in top..bottom.min(h) {
        let row = y * stride;
        let edge_row = y < top + t || y + t >= bottom;
        let mut paint = |x0: u64, x1: u64| {
            for x in x0..x1.min(w) {
                let at = (row + x * bpp) as usize;
                if let Some(dst) = data.get_mut(at..at + pixel.len()) {
                    dst.copy_from_slice(&pixel);
                }
            }
        };
        if edge_row {
            paint(left, right);
        } else {
            paint(left, (left + t).min(right));
            paint(right.saturating_sub(t).max(left), right);
        }
    }
}

fn encode(format: PixelFormat, [r, g, b]: [u8; 3]) -> Vec<u8> {
    match format {
        PixelFormat::Rgb24 => vec![r, g, b],
        PixelFormat::Bgr24 => vec![b, g, r],
        PixelFormat::Gray8 => vec![luma(r, g, b)],
    }
}

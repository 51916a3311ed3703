//! Frame-differencing motion detector

use image::GrayImage;
use tracing::trace;

use super::{DetectionRegion, FrameAnnotator};
use crate::error::AnnotateError;
use crate::MotionConfig;

/// Reports boxes around areas that changed since the previous analysis frame.
///
/// Change is counted per grid cell; cells over the configured ratio are
/// joined with their 4-neighbours and each group becomes one region.
pub struct MotionAnnotator {
    config: MotionConfig,
    previous: Option<GrayImage>,
}

impl MotionAnnotator {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            previous: None,
        }
    }

    fn active_cells(&self, prev: &GrayImage, cur: &GrayImage) -> (Vec<bool>, u32, u32) {
        let cell = self.config.cell_size.max(1);
        let (w, h) = cur.dimensions();
        let cols = w.div_ceil(cell);
        let rows = h.div_ceil(cell);

        let mut changed = vec![0u32; (cols * rows) as usize];
        for (x, y, p) in cur.enumerate_pixels() {
            let q = prev.get_pixel(x, y);
            if p[0].abs_diff(q[0]) > self.config.threshold {
                changed[((y / cell) * cols + x / cell) as usize] += 1;
            }
        }

        let active = changed
            .iter()
            .enumerate()
            .map(|(i, &count)| {
                let (cx, cy) = (i as u32 % cols, i as u32 / cols);
                let cw = cell.min(w - cx * cell);
                let ch = cell.min(h - cy * cell);
                count as f32 >= self.config.min_cell_ratio * (cw * ch) as f32 && count > 0
            })
            .collect();
        (active, cols, rows)
    }
}

impl FrameAnnotator for MotionAnnotator {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<DetectionRegion>, AnnotateError> {
        let Some(prev) = self.previous.replace(frame.clone()) else {
            return Ok(Vec::new());
        };
        if prev.dimensions() != frame.dimensions() {
            return Ok(Vec::new());
        }

        let (mut active, cols, rows) = self.active_cells(&prev, frame);
        let cell = self.config.cell_size.max(1);
        let (w, h) = frame.dimensions();

        let mut regions = Vec::new();
        let mut stack = Vec::new();
        for start in 0..active.len() {
            if !active[start] {
                continue;
            }
            active[start] = false;
            stack.push(start);
            let (mut x0, mut y0, mut x1, mut y1) = (u32::MAX, u32::MAX, 0, 0);

            while let Some(i) = stack.pop() {
                let (cx, cy) = (i as u32 % cols, i as u32 / cols);
                x0 = x0.min(cx);
                y0 = y0.min(cy);
                x1 = x1.max(cx);
                y1 = y1.max(cy);

                let mut visit = |nx: u32, ny: u32| {
                    let n = (ny * cols + nx) as usize;
                    if active[n] {
                        active[n] = false;
                        stack.push(n);
                    }
                };
                if cx > 0 {
                    visit(cx - 1, cy);
                }
                if cx + 1 < cols {
                    visit(cx + 1, cy);
                }
                if cy > 0 {
                    visit(cx, cy - 1);
                }
                if cy + 1 < rows {
                    visit(cx, cy + 1);
                }
            }

            let x = x0 * cell;
            let y = y0 * cell;
            let region = DetectionRegion::new(
                x,
                y,
                ((x1 + 1) * cell).min(w) - x,
                ((y1 + 1) * cell).min(h) - y,
            );
            if region.width >= self.config.min_width && region.height >= self.config.min_height {
                regions.push(region);
            }
        }

        trace!(regions = regions.len(), "motion pass");
        Ok(regions)
    }
}

//! Synthetic test pattern source

use bytes::BytesMut;

use super::{Frame, FrameSource, Pacer, PixelFormat, SourcePoll};
use crate::error::SourceError;

/// Edge of the moving square, as a fraction of the shorter frame side
const SQUARE_DIVISOR: u32 = 6;

/// Diagonal gradient with a bright square bouncing across it
pub struct PatternSource {
    width: u32,
    height: u32,
    pacer: Option<Pacer>,
    limit: Option<u64>,
    sequence: u64,
}

impl PatternSource {
    pub fn new(width: u32, height: u32, pacer: Option<Pacer>, limit: Option<u64>) -> Self {
        Self {
            width,
            height,
            pacer,
            limit,
            sequence: 0,
        }
    }

    /// Top-left corner of the square in frame `n`.
    fn square_origin(&self, n: u64) -> (u32, u32, u32) {
        let side = (self.width.min(self.height) / SQUARE_DIVISOR).max(1);
        let span_x = u64::from(self.width.saturating_sub(side).max(1));
        let span_y = u64::from(self.height.saturating_sub(side).max(1));
        let step = n * 4;
        (
            bounce(step, span_x) as u32,
            bounce(step / 2, span_y) as u32,
            side,
        )
    }

    fn render(&self, n: u64) -> Result<Frame, SourceError> {
        let (w, h) = (self.width as usize, self.height as usize);
        let (sx, sy, side) = self.square_origin(n);
        let shift = (n % 256) as usize;

        let mut data = BytesMut::zeroed(w * h * 3);
        for (y, row) in data.chunks_exact_mut(w * 3).enumerate() {
            let inside_y = (sy..sy + side).contains(&(y as u32));
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                if inside_y && (sx..sx + side).contains(&(x as u32)) {
                    px.copy_from_slice(&[255, 255, 255]);
                } else {
                    let g = ((x + y + shift) % 256) as u8;
                    px.copy_from_slice(&[g / 2, g / 3, g / 4]);
                }
            }
        }

        Frame::new(data.freeze(), self.width, self.height, PixelFormat::Rgb24, n)
            .map_err(SourceError::from)
    }
}

/// Triangle wave over `0..=span`.
fn bounce(step: u64, span: u64) -> u64 {
    let phase = step % (2 * span);
    if phase <= span {
        phase
    } else {
        2 * span - phase
    }
}

impl FrameSource for PatternSource {
    fn next_frame(&mut self) -> Result<SourcePoll, SourceError> {
        if self.limit.is_some_and(|limit| self.sequence >= limit) {
            return Ok(SourcePoll::Closed);
        }
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait();
        }
        self.sequence += 1;
        Ok(SourcePoll::Frame(self.render(self.sequence)?))
    }
}

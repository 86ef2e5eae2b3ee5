//! Final warp, border fill and trim.

use image::RgbImage;
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;

use crate::frame::Frame;
use crate::stabilizer::trim::crop_rect;

/// Fill policy for output pixels that map outside the source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorderMode {
    /// Repeat the nearest edge pixel.
    Replicate,
    /// Fill with a constant colour.
    Constant([u8; 3]),
}

impl Default for BorderMode {
    fn default() -> Self {
        Self::Replicate
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Compositor {
    border: BorderMode,
}

impl Compositor {
    pub fn new(border: BorderMode) -> Self {
        Self { border }
    }

    pub fn border(&self) -> BorderMode {
        self.border
    }

    /// Warp `frame` by the forward transform `forward`, then crop the trim
    /// rectangle and scale it back to the input size.
    ///
    /// Output pixel `x` samples the source at `forward⁻¹ · C · x`, where `C`
    /// maps the output raster onto the kept rectangle, so cropping and
    /// resizing share a single interpolation.
    pub fn compose(&self, frame: &Frame, forward: &Matrix3<f64>, trim_ratio: f64) -> Frame {
        let (w, h) = frame.dimensions();
        if w == 0 || h == 0 {
            return frame.clone();
        }
        let Some(inv) = forward.try_inverse() else {
            tracing::warn!("frame {}: singular warp, passing through", frame.index());
            return frame.clone();
        };

        let [x0, y0, x1, y1] = crop_rect(w, h, trim_ratio);
        let sx = if w > 1 { (x1 - x0) / (w - 1) as f64 } else { 1.0 };
        let sy = if h > 1 { (y1 - y0) / (h - 1) as f64 } else { 1.0 };
        let crop = Matrix3::new(sx, 0.0, x0, 0.0, sy, y0, 0.0, 0.0, 1.0);
        let map = inv * crop;

        let src = frame.image();
        let row_len = w as usize * 3;
        let mut out = vec![0u8; row_len * h as usize];
        out.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
            for x in 0..w as usize {
                let q = map * Vector3::new(x as f64, y as f64, 1.0);
                let px = self.sample(src, q[0] / q[2], q[1] / q[2]);
                row[3 * x..3 * x + 3].copy_from_slice(&px);
            }
        });

        match RgbImage::from_raw(w, h, out) {
            Some(img) => frame.with_image(img),
            None => frame.clone(),
        }
    }

    /// Warp without trimming.
    pub fn warp(&self, frame: &Frame, forward: &Matrix3<f64>) -> Frame {
        self.compose(frame, forward, 0.0)
    }

    fn sample(&self, src: &RgbImage, x: f64, y: f64) -> [u8; 3] {
        let (w, h) = src.dimensions();
        let (wf, hf) = ((w - 1) as f64, (h - 1) as f64);
        if !x.is_finite() || !y.is_finite() {
            return self.fill(src, 0.0, 0.0);
        }
        if let BorderMode::Constant(c) = self.border {
            if x < -0.5 || y < -0.5 || x > wf + 0.5 || y > hf + 0.5 {
                return c;
            }
        }
        let x = x.clamp(0.0, wf);
        let y = y.clamp(0.0, hf);
        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(w - 1);
        let y1 = (y0 + 1).min(h - 1);
        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let p00 = src.get_pixel(x0, y0).0;
        let p10 = src.get_pixel(x1, y0).0;
        let p01 = src.get_pixel(x0, y1).0;
        let p11 = src.get_pixel(x1, y1).0;
        let mut out = [0u8; 3];
        for c in 0..3 {
            let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
            let bot = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
            out[c] = (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8;
        }
        out
    }

    fn fill(&self, src: &RgbImage, x: f64, y: f64) -> [u8; 3] {
        match self.border {
            BorderMode::Constant(c) => c,
            BorderMode::Replicate => src.get_pixel(x as u32, y as u32).0,
        }
    }
}

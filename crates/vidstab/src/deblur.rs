//! Motion-adaptive sharpening.
//!
//! Blur strength follows the magnitude of the corrective warp applied to a
//! frame: frames that needed a large correction were captured during fast
//! camera motion and get more sharpening.

use image::{GrayImage, RgbImage};
use nalgebra::Matrix3;

use crate::frame::Frame;
use crate::motion::project;

/// Detail magnitude (0..255 scale) at which the sharpening gain halves.
const EDGE_SOFTNESS: f32 = 32.0;
const MIN_STRENGTH: f64 = 1e-3;

/// Per-frame blur assessment.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BlurEstimate {
    /// Mean displacement of the frame centre and corners under the warp, in pixels.
    pub motion_px: f64,
    /// Inverse gradient energy of the frame (higher is blurrier).
    pub blurriness: f64,
    /// Sharpening gain in `[0, 1)`.
    pub strength: f64,
}

/// Inverse mean squared Scharr gradient.
pub fn blurriness(gray: &GrayImage) -> f64 {
    let gx = imageproc::gradients::horizontal_scharr(gray);
    let gy = imageproc::gradients::vertical_scharr(gray);
    let area = (gray.width() as f64 * gray.height() as f64).max(1.0);
    let energy: f64 = gx
        .pixels()
        .zip(gy.pixels())
        .map(|(a, b)| {
            let dx = a.0[0] as f64 / 32.0;
            let dy = b.0[0] as f64 / 32.0;
            dx * dx + dy * dy
        })
        .sum();
    1.0 / (energy / area + 1e-6)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deblurrer {
    radius: u32,
    sensitivity: f64,
}

impl Deblurrer {
    pub fn new(radius: u32, sensitivity: f64) -> Self {
        Self {
            radius: radius.max(1),
            sensitivity: sensitivity.max(0.0),
        }
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    fn sigma(&self) -> f32 {
        (self.radius as f32 / 3.0).max(0.5)
    }

    pub fn estimate(&self, frame: &Frame, transform: &Matrix3<f64>) -> BlurEstimate {
        let (w, h) = frame.dimensions();
        let (wf, hf) = ((w.max(1) - 1) as f64, (h.max(1) - 1) as f64);
        let samples = [
            [0.5 * wf, 0.5 * hf],
            [0.0, 0.0],
            [wf, 0.0],
            [wf, hf],
            [0.0, hf],
        ];
        let total: f64 = samples
            .iter()
            .map(|&p| {
                let q = project(transform, p);
                let d = (q[0] - p[0]).hypot(q[1] - p[1]);
                if d.is_finite() {
                    d
                } else {
                    0.0
                }
            })
            .sum();
        let motion_px = total / samples.len() as f64;
        let sm = self.sensitivity * motion_px;
        BlurEstimate {
            motion_px,
            blurriness: blurriness(&frame.to_gray()),
            strength: sm / (1.0 + sm),
        }
    }

    /// Unsharp mask scaled by `estimate.strength`, damped at strong edges.
    pub fn deblur(&self, frame: &Frame, estimate: &BlurEstimate) -> Frame {
        if estimate.strength < MIN_STRENGTH {
            return frame.clone();
        }
        let src = frame.image();
        let blurred = imageproc::filter::gaussian_blur_f32(src, self.sigma());
        let gain = estimate.strength as f32;

        let mut out = RgbImage::new(src.width(), src.height());
        for ((o, s), b) in out.pixels_mut().zip(src.pixels()).zip(blurred.pixels()) {
            for c in 0..3 {
                let x = s.0[c] as f32;
                let detail = x - b.0[c] as f32;
                let damp = 1.0 / (1.0 + detail.abs() / EDGE_SOFTNESS);
                o.0[c] = (x + gain * damp * detail).round().clamp(0.0, 255.0) as u8;
            }
        }
        tracing::trace!(
            "frame {}: deblur strength {:.3} (motion {:.2} px)",
            frame.index(),
            estimate.strength,
            estimate.motion_px
        );
        frame.with_image(out)
    }
}

//! Motion models and robust frame-to-frame motion estimation.

mod fit;
mod model;
mod outlier;
mod ransac;

use nalgebra::{Matrix3, Vector3};

pub use fit::FitError;
pub use model::MotionModel;
pub use outlier::{NullOutlierRejector, OutlierRejector, TranslationLocalOutlierRejector};
pub use ransac::{MotionEstimate, ResolvedFitParams, RobustFitParams, RobustMotionEstimator};

/// A point observed in two frames: `src` in the earlier and `dst` in the later.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Correspondence {
    pub src: [f64; 2],
    pub dst: [f64; 2],
}

impl Correspondence {
    pub fn new(src: [f64; 2], dst: [f64; 2]) -> Self {
        Self { src, dst }
    }

    /// Transfer error `‖M·src − dst‖` in pixels.
    pub fn residual(&self, m: &Matrix3<f64>) -> f64 {
        let p = project(m, self.src);
        if !p[0].is_finite() || !p[1].is_finite() {
            return f64::INFINITY;
        }
        let dx = p[0] - self.dst[0];
        let dy = p[1] - self.dst[1];
        (dx * dx + dy * dy).sqrt()
    }
}

/// Project a 2D point through a 3×3 transform: M * [x, y, 1]^T → [u, v].
pub fn project(m: &Matrix3<f64>, p: [f64; 2]) -> [f64; 2] {
    let q = m * Vector3::new(p[0], p[1], 1.0);
    if q[2].abs() < 1e-15 {
        return [f64::NAN, f64::NAN];
    }
    [q[0] / q[2], q[1] / q[2]]
}

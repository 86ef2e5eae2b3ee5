//! Rolling-shutter wobble suppression.
//!
//! A second, more expressive motion model is estimated alongside the primary
//! one. Between keyframes the two chains disagree by the non-rigid wobble;
//! that residual is interpolated from both surrounding keyframes and removed
//! before the stabilizing warp.

use nalgebra::Matrix3;

use crate::frame::Frame;
use crate::stabilizer::MotionStage;
use crate::trajectory::{motion_between, Trajectory};

#[derive(Debug, Clone)]
pub struct WobbleSuppressor {
    period: usize,
    stage: MotionStage,
}

impl WobbleSuppressor {
    pub fn new(period: usize, stage: MotionStage) -> Self {
        Self {
            period: period.max(1),
            stage,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Secondary-model trajectory of the clip.
    pub fn estimate_motions(&self, frames: &[Frame]) -> Trajectory {
        let estimates = self.stage.estimate_all(frames);
        let t = Trajectory::from_estimates(&estimates);
        if t.degraded_pairs() > 0 {
            tracing::debug!(
                "wobble model {}: {} degraded pairs",
                self.stage.estimator().model(),
                t.degraded_pairs()
            );
        }
        t
    }

    /// Residual `W` for every frame, so that the secondary pose of frame `i`
    /// is approximately `W · (primary prediction)`.
    pub fn residuals(&self, primary: &Trajectory, secondary: &Trajectory) -> Vec<Matrix3<f64>> {
        let n = primary.len().min(secondary.len());
        (0..n)
            .map(|i| self.residual(primary.poses(), secondary.poses(), i))
            .collect()
    }

    pub fn residual(
        &self,
        primary: &[Matrix3<f64>],
        secondary: &[Matrix3<f64>],
        idx: usize,
    ) -> Matrix3<f64> {
        let n = primary.len().min(secondary.len());
        if n == 0 || idx >= n {
            return Matrix3::identity();
        }
        let k1 = idx / self.period * self.period;
        let k2 = (k1 + self.period).min(n - 1);
        if k1 >= k2 {
            return Matrix3::identity();
        }

        // From the left keyframe forward.
        let left = motion_between(secondary, k1, idx)
            * motion_between(primary, k1, idx)
                .try_inverse()
                .unwrap_or_else(Matrix3::identity);
        // From the right keyframe backward.
        let right = motion_between(secondary, idx, k2)
            .try_inverse()
            .unwrap_or_else(Matrix3::identity)
            * motion_between(primary, idx, k2);

        let span = (k2 - k1) as f64;
        (left * (k2 - idx) as f64 + right * (idx - k1) as f64) / span
    }
}

//! Gaussian trajectory smoothing.
//!
//! Both filters return, per frame, the stabilization transform `S` mapping
//! raw frame coordinates to stabilized output coordinates. A trajectory that
//! follows a constant motion yields `S = I` in both.

use nalgebra::Matrix3;

use crate::trajectory::motion_between;

/// `w_k = exp(-k² / 2σ²)` for `k = 0..=radius`.
pub fn gaussian_weights(radius: usize, sigma: f64) -> Vec<f64> {
    let denom = 2.0 * sigma * sigma;
    (0..=radius)
        .map(|k| (-((k * k) as f64) / denom).exp())
        .collect()
}

fn inverse_or_identity(m: &Matrix3<f64>) -> Matrix3<f64> {
    m.try_inverse().unwrap_or_else(Matrix3::identity)
}

fn matrix_power(m: &Matrix3<f64>, k: usize) -> Matrix3<f64> {
    let mut out = Matrix3::identity();
    for _ in 0..k {
        out = m * out;
    }
    out
}

#[derive(Debug, Clone)]
pub struct GaussianMotionFilter {
    radius: usize,
    sigma: f64,
    weights: Vec<f64>,
}

impl GaussianMotionFilter {
    /// Kernel over `±radius` frames with `σ = √radius`.
    pub fn new(radius: usize) -> Self {
        Self::with_sigma(radius, (radius.max(1) as f64).sqrt())
    }

    pub fn with_sigma(radius: usize, sigma: f64) -> Self {
        Self {
            radius,
            sigma,
            weights: gaussian_weights(radius, sigma),
        }
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Non-causal smoothing of frame `idx` over the whole trajectory.
    ///
    /// Poses outside the clip are reflected through the end poses
    /// (`P₋ₖ = P₀·Pₖ⁻¹·P₀`), which keeps linear motion unbiased at the ends.
    pub fn stabilize_global(&self, poses: &[Matrix3<f64>], idx: usize) -> Matrix3<f64> {
        let inverses: Vec<Matrix3<f64>> = poses.iter().map(inverse_or_identity).collect();
        self.stabilize_global_with(poses, &inverses, idx)
    }

    pub fn stabilize_all(&self, poses: &[Matrix3<f64>]) -> Vec<Matrix3<f64>> {
        let inverses: Vec<Matrix3<f64>> = poses.iter().map(inverse_or_identity).collect();
        (0..poses.len())
            .map(|i| self.stabilize_global_with(poses, &inverses, i))
            .collect()
    }

    fn stabilize_global_with(
        &self,
        poses: &[Matrix3<f64>],
        inverses: &[Matrix3<f64>],
        idx: usize,
    ) -> Matrix3<f64> {
        let n = poses.len() as isize;
        if n <= 1 {
            return Matrix3::identity();
        }
        let last = (n - 1) as usize;
        let extended = |j: isize| -> Matrix3<f64> {
            if j < 0 {
                let k = (-j).min(n - 1) as usize;
                poses[0] * inverses[k] * poses[0]
            } else if j > n - 1 {
                let k = (j - (n - 1)).min(n - 1) as usize;
                poses[last] * inverses[last - k] * poses[last]
            } else {
                poses[j as usize]
            }
        };

        let r = self.radius as isize;
        let mut sum = Matrix3::zeros();
        let mut wsum = 0.0;
        for k in -r..=r {
            let w = self.weights[k.unsigned_abs()];
            sum += extended(idx as isize + k) * w;
            wsum += w;
        }
        (sum / wsum) * inverses[idx]
    }

    /// Causal smoothing of the newest pose in `window`.
    ///
    /// `window` holds the most recent poses, oldest first, ending with the
    /// current frame. The local velocity is the weighted mean of the window's
    /// frame-to-frame motions; each past pose is propagated to the current
    /// frame by that velocity before averaging.
    pub fn stabilize_causal(&self, window: &[Matrix3<f64>]) -> Matrix3<f64> {
        let n = window.len().min(self.radius + 1);
        if n <= 1 {
            return Matrix3::identity();
        }
        let window = &window[window.len() - n..];
        let cur = n - 1;

        let mut velocity = Matrix3::zeros();
        let mut vsum = 0.0;
        for j in 1..n {
            let w = self.weights[j - 1];
            velocity += motion_between(window, cur - j, cur - j + 1) * w;
            vsum += w;
        }
        velocity /= vsum;

        let mut sum = Matrix3::zeros();
        let mut wsum = 0.0;
        for k in 0..n {
            let w = self.weights[k];
            sum += matrix_power(&velocity, k) * motion_between(window, cur, cur - k) * w;
            wsum += w;
        }
        sum / wsum
    }
}

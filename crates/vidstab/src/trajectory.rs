//! Cumulative camera trajectory.
//!
//! `motions[i]` maps frame `i` coordinates into frame `i + 1`. `poses[i]` maps
//! frame 0 coordinates into frame `i`, with `poses[0] = I` and
//! `poses[i] = motions[i - 1] · poses[i - 1]`.

use nalgebra::Matrix3;

use crate::motion::MotionEstimate;

#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    motions: Vec<Matrix3<f64>>,
    degraded: Vec<bool>,
    poses: Vec<Matrix3<f64>>,
}

impl Default for Trajectory {
    fn default() -> Self {
        Self::new()
    }
}

impl Trajectory {
    /// A single-frame trajectory at the identity pose.
    pub fn new() -> Self {
        Self {
            motions: Vec::new(),
            degraded: Vec::new(),
            poses: vec![Matrix3::identity()],
        }
    }

    pub fn from_estimates<'a>(estimates: impl IntoIterator<Item = &'a MotionEstimate>) -> Self {
        let mut t = Self::new();
        for e in estimates {
            t.push(e);
        }
        t
    }

    pub fn from_motions(motions: impl IntoIterator<Item = Matrix3<f64>>) -> Self {
        let mut t = Self::new();
        for m in motions {
            t.push_motion(m, false);
        }
        t
    }

    /// Append the next pair's estimate. Degraded estimates carry identity,
    /// so the pose is held.
    pub fn push(&mut self, estimate: &MotionEstimate) {
        self.push_motion(estimate.transform, estimate.is_degraded());
    }

    pub fn push_motion(&mut self, motion: Matrix3<f64>, degraded: bool) {
        let last = self.poses[self.poses.len() - 1];
        self.poses.push(motion * last);
        self.motions.push(motion);
        self.degraded.push(degraded);
    }

    /// Number of frames (one more than the number of motions).
    pub fn len(&self) -> usize {
        self.poses.len()
    }

    /// Always false: a trajectory holds at least frame 0.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn poses(&self) -> &[Matrix3<f64>] {
        &self.poses
    }

    pub fn motions(&self) -> &[Matrix3<f64>] {
        &self.motions
    }

    pub fn pose(&self, frame: usize) -> Option<&Matrix3<f64>> {
        self.poses.get(frame)
    }

    pub fn degraded_pairs(&self) -> usize {
        self.degraded.iter().filter(|&&d| d).count()
    }

    /// Transform from frame `from` coordinates to frame `to` coordinates.
    pub fn motion_between(&self, from: usize, to: usize) -> Matrix3<f64> {
        motion_between(&self.poses, from, to)
    }
}

/// `poses[to] · poses[from]⁻¹`, falling back to identity for a singular pose.
pub(crate) fn motion_between(poses: &[Matrix3<f64>], from: usize, to: usize) -> Matrix3<f64> {
    if from == to {
        return Matrix3::identity();
    }
    let inv = poses[from].try_inverse().unwrap_or_else(Matrix3::identity);
    poses[to] * inv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::translation;
    use approx::assert_relative_eq;

    fn rot(a: f64) -> Matrix3<f64> {
        let (s, c) = a.sin_cos();
        Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0)
    }

    fn assert_close(a: &Matrix3<f64>, b: &Matrix3<f64>) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-9);
        }
    }

    #[test]
    fn pose_zero_is_identity_and_motions_compose_in_order() {
        let ms = [translation(2.0, 0.0), rot(0.1), translation(0.0, -1.0)];
        let t = Trajectory::from_motions(ms);
        assert_eq!(t.len(), 4);
        assert_eq!(t.poses()[0], Matrix3::identity());
        assert_close(&t.poses()[3], &(ms[2] * ms[1] * ms[0]));
    }

    #[test]
    fn cumulative_pose_matches_stepwise_application_under_regrouping() {
        let ms = [translation(1.0, 2.0), rot(0.05), translation(-3.0, 0.5), rot(-0.02)];
        let t = Trajectory::from_motions(ms);

        // Apply one at a time to a point.
        let mut p = nalgebra::Vector3::new(10.0, 20.0, 1.0);
        for m in &ms {
            p = m * p;
        }
        let q = t.poses()[4] * nalgebra::Vector3::new(10.0, 20.0, 1.0);
        assert_relative_eq!(p, q, epsilon = 1e-9);

        // (m3 m2)(m1 m0) == m3 (m2 (m1 m0))
        let grouped = (ms[3] * ms[2]) * (ms[1] * ms[0]);
        assert_close(&t.poses()[4], &grouped);
    }

    #[test]
    fn degraded_estimate_holds_previous_pose() {
        let ok = MotionEstimate {
            transform: translation(4.0, 0.0),
            inlier_mask: vec![true; 3],
            n_inliers: 3,
            rms_error: 0.0,
            success: true,
        };
        let bad = MotionEstimate::degraded(3);
        let t = Trajectory::from_estimates([&ok, &bad, &ok]);
        assert_eq!(t.poses()[1], t.poses()[2]);
        assert_eq!(t.degraded_pairs(), 1);
        assert_relative_eq!(t.poses()[3][(0, 2)], 8.0);
    }

    #[test]
    fn motion_between_inverts_for_backward_pairs() {
        let t = Trajectory::from_motions([translation(1.0, 0.0), translation(2.0, 1.0)]);
        let fwd = t.motion_between(0, 2);
        let back = t.motion_between(2, 0);
        assert_close(&(fwd * back), &Matrix3::identity());
        assert_relative_eq!(fwd[(0, 2)], 3.0);
    }
}

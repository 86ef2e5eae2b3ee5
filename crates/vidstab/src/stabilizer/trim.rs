//! Border trimming and inclusion constraints.
//!
//! A trim ratio `t` keeps the centred rectangle covering `1 - t` of each
//! dimension, cutting `t / 2` from every side.

use nalgebra::Matrix3;

use crate::error::ConfigError;
use crate::motion::project;

/// How much border to cut from stabilized frames.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TrimPolicy {
    /// Total fraction of each dimension removed, in `[0, 1)`. Half of it
    /// comes off each side, so `0.1` cuts 5% from the left and 5% from the
    /// right.
    pub ratio: f64,
    /// Two-pass only: derive the ratio from the corrections instead.
    pub estimate_automatically: bool,
}

impl Default for TrimPolicy {
    fn default() -> Self {
        Self {
            ratio: 0.1,
            estimate_automatically: true,
        }
    }
}

impl TrimPolicy {
    /// Always use `ratio`.
    pub fn fixed(ratio: f64) -> Self {
        Self {
            ratio,
            estimate_automatically: false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if (0.0..1.0).contains(&self.ratio) {
            Ok(())
        } else {
            Err(ConfigError::OutOfRange {
                name: "trim_ratio",
                value: self.ratio,
                expected: "[0, 1)",
            })
        }
    }
}

/// Largest ratio considered by the searches below.
pub const MAX_TRIM_RATIO: f64 = 0.99;

const SEARCH_STEPS: usize = 30;
const INSIDE_TOL: f64 = 1e-7;

/// `[x0, y0, x1, y1]` of the kept region in pixel-centre coordinates.
/// `ratio` is the total fraction cut per dimension.
pub fn crop_rect(width: u32, height: u32, ratio: f64) -> [f64; 4] {
    let (w, h) = ((width.max(1) - 1) as f64, (height.max(1) - 1) as f64);
    let m = 0.5 * ratio;
    [m * w, m * h, (1.0 - m) * w, (1.0 - m) * h]
}

fn frame_corners(width: u32, height: u32) -> [[f64; 2]; 4] {
    let (w, h) = ((width.max(1) - 1) as f64, (height.max(1) - 1) as f64);
    [[0.0, 0.0], [w, 0.0], [w, h], [0.0, h]]
}

/// True if every corner of the trimmed rectangle falls inside the frame
/// quadrilateral moved by the forward warp `m`.
pub fn is_covered(m: &Matrix3<f64>, width: u32, height: u32, ratio: f64) -> bool {
    let quad = frame_corners(width, height).map(|c| project(m, c));
    if quad.iter().any(|q| !q[0].is_finite() || !q[1].is_finite()) {
        return false;
    }
    let [x0, y0, x1, y1] = crop_rect(width, height, ratio);
    [[x0, y0], [x1, y0], [x1, y1], [x0, y1]]
        .iter()
        .all(|p| inside_convex(&quad, *p))
}

fn inside_convex(quad: &[[f64; 2]; 4], p: [f64; 2]) -> bool {
    let mut sign = 0.0f64;
    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let cross = (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0]);
        let scale = (b[0] - a[0]).hypot(b[1] - a[1]).max(1.0);
        let c = cross / scale;
        if c.abs() <= INSIDE_TOL {
            continue;
        }
        if sign == 0.0 {
            sign = c.signum();
        } else if c.signum() != sign {
            return false;
        }
    }
    true
}

/// Smallest ratio whose trimmed rectangle is covered by the warped frame.
pub fn estimate_trim_ratio(m: &Matrix3<f64>, width: u32, height: u32) -> f64 {
    if is_covered(m, width, height, 0.0) {
        return 0.0;
    }
    if !is_covered(m, width, height, MAX_TRIM_RATIO) {
        return MAX_TRIM_RATIO;
    }
    let (mut lo, mut hi) = (0.0, MAX_TRIM_RATIO);
    for _ in 0..SEARCH_STEPS {
        let mid = 0.5 * (lo + hi);
        if is_covered(m, width, height, mid) {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi
}

/// Blend `m` toward identity just enough that the trimmed rectangle at
/// `ratio` stays covered.
pub fn ensure_inclusion(m: &Matrix3<f64>, width: u32, height: u32, ratio: f64) -> Matrix3<f64> {
    if is_covered(m, width, height, ratio) {
        return *m;
    }
    let id = Matrix3::identity();
    let blend = |t: f64| m * t + id * (1.0 - t);
    let (mut lo, mut hi) = (0.0, 1.0);
    for _ in 0..SEARCH_STEPS {
        let mid = 0.5 * (lo + hi);
        if is_covered(&blend(mid), width, height, ratio) {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    blend(lo)
}

//! Shared fixtures for unit and scenario tests.

use image::{Rgb, RgbImage};
use nalgebra::{Matrix3, Vector2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::features::CorrespondenceSource;
use crate::frame::Frame;
use crate::io::MemorySource;
use crate::motion::{project, Correspondence};

/// Smooth random texture made of Gaussian blobs, displaced by `offset`.
///
/// The texture is evaluated analytically, so `offset` gives an exact
/// sub-pixel shift of the same scene.
pub(crate) fn blob_texture(w: u32, h: u32, seed: u64, offset: [f64; 2]) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = ((w * h) / 120).max(8) as usize;
    let blobs: Vec<([f64; 2], f64, [f64; 3])> = (0..n)
        .map(|_| {
            let c = [
                rng.gen_range(-10.0..w as f64 + 10.0),
                rng.gen_range(-10.0..h as f64 + 10.0),
            ];
            let sigma = rng.gen_range(2.5..5.0);
            let amp = [
                rng.gen_range(-90.0..90.0),
                rng.gen_range(-90.0..90.0),
                rng.gen_range(-90.0..90.0),
            ];
            (c, sigma, amp)
        })
        .collect();

    RgbImage::from_fn(w, h, |x, y| {
        let px = x as f64 - offset[0];
        let py = y as f64 - offset[1];
        let mut v = [128.0f64; 3];
        for (c, sigma, amp) in &blobs {
            let d2 = (px - c[0]).powi(2) + (py - c[1]).powi(2);
            let g = (-d2 / (2.0 * sigma * sigma)).exp();
            for k in 0..3 {
                v[k] += amp[k] * g;
            }
        }
        Rgb(v.map(|c| c.round().clamp(0.0, 255.0) as u8))
    })
}

pub(crate) fn translation(tx: f64, ty: f64) -> Matrix3<f64> {
    Matrix3::new_translation(&Vector2::new(tx, ty))
}

/// Ground-truth correspondences from known absolute poses.
///
/// `poses[k]` maps scene coordinates into frame `k`; every scene point is
/// observed in every frame.
pub(crate) struct PoseCorrespondences {
    pub poses: Vec<Matrix3<f64>>,
    pub points: Vec<[f64; 2]>,
}

impl PoseCorrespondences {
    /// Scene points on a regular grid covering `w × h`.
    pub fn on_grid(poses: Vec<Matrix3<f64>>, w: f64, h: f64, nx: usize, ny: usize) -> Self {
        let mut points = Vec::with_capacity(nx * ny);
        for j in 0..ny {
            for i in 0..nx {
                points.push([
                    w * (i as f64 + 0.5) / nx as f64,
                    h * (j as f64 + 0.5) / ny as f64,
                ]);
            }
        }
        Self { poses, points }
    }
}

impl CorrespondenceSource for PoseCorrespondences {
    fn correspondences(&self, prev: &Frame, curr: &Frame) -> Vec<Correspondence> {
        let (Some(a), Some(b)) = (self.poses.get(prev.index()), self.poses.get(curr.index())) else {
            return Vec::new();
        };
        self.points
            .iter()
            .map(|&p| Correspondence::new(project(a, p), project(b, p)))
            .collect()
    }
}

/// Poses of a clip whose frame-to-frame motions are the given translations.
pub(crate) fn poses_from_steps(steps: &[[f64; 2]]) -> Vec<Matrix3<f64>> {
    let mut poses = vec![Matrix3::identity()];
    for s in steps {
        let last = poses[poses.len() - 1];
        poses.push(translation(s[0], s[1]) * last);
    }
    poses
}

pub(crate) fn flat_frames(n: usize, w: u32, h: u32) -> Vec<Frame> {
    (0..n)
        .map(|i| Frame::new(i, RgbImage::from_pixel(w, h, Rgb([90, 120, 150]))))
        .collect()
}

pub(crate) fn flat_source(n: usize, w: u32, h: u32) -> MemorySource {
    MemorySource::new(flat_frames(n, w, h))
}

//! Pyramidal Lucas–Kanade sparse optical flow.

use image::{GrayImage, ImageBuffer, Luma};
use rayon::prelude::*;

pub(crate) type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Bilinear sample with edge clamping. Empty images sample as 0.
#[inline]
pub(crate) fn sample(img: &GrayF32, x: f32, y: f32) -> f32 {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return 0.0;
    }
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let p = |xx, yy| img.get_pixel(xx, yy)[0];
    let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
    let bot = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
    top * (1.0 - fy) + bot * fy
}

fn downsample_2x(img: &GrayF32) -> GrayF32 {
    let (w, h) = img.dimensions();
    let (nw, nh) = ((w / 2).max(1), (h / 2).max(1));
    GrayF32::from_fn(nw, nh, |x, y| {
        let x0 = (2 * x).min(w - 1);
        let y0 = (2 * y).min(h - 1);
        let x1 = (x0 + 1).min(w - 1);
        let y1 = (y0 + 1).min(h - 1);
        Luma([0.25
            * (img.get_pixel(x0, y0)[0]
                + img.get_pixel(x1, y0)[0]
                + img.get_pixel(x0, y1)[0]
                + img.get_pixel(x1, y1)[0])])
    })
}

/// Image pyramid, level 0 at full resolution.
pub(crate) struct Pyramid {
    levels: Vec<GrayF32>,
}

impl Pyramid {
    /// Build up to `max_levels` levels, stopping before a level would be
    /// smaller than `min_size` on either side.
    pub fn build(gray: &GrayImage, max_levels: usize, min_size: u32) -> Self {
        let base = GrayF32::from_fn(gray.width(), gray.height(), |x, y| {
            Luma([gray.get_pixel(x, y)[0] as f32])
        });
        let mut levels = vec![base];
        while levels.len() < max_levels.max(1) {
            let Some(last) = levels.last() else { break };
            let (w, h) = last.dimensions();
            if w < 2 || h < 2 || w / 2 < min_size || h / 2 < min_size {
                break;
            }
            let next = downsample_2x(last);
            levels.push(next);
        }
        Self { levels }
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, i: usize) -> &GrayF32 {
        &self.levels[i]
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LkParams {
    pub window_radius: i32,
    pub max_iterations: usize,
    /// Stop when an update moves less than this many pixels.
    pub epsilon: f32,
    /// Minimum mean smaller eigenvalue of the window's gradient matrix.
    pub min_eigen: f32,
    /// Maximum mean absolute intensity residual after convergence.
    pub max_residual: f32,
}

/// Track `points` from `prev` into `next`. `None` marks a lost track.
pub(crate) fn track(
    prev: &Pyramid,
    next: &Pyramid,
    points: &[[f32; 2]],
    params: &LkParams,
) -> Vec<Option<[f32; 2]>> {
    let depth = prev.depth().min(next.depth());
    let (w, h) = next.level(0).dimensions();
    if w == 0 || h == 0 {
        return vec![None; points.len()];
    }
    points
        .par_iter()
        .map(|&p| track_one(prev, next, depth, p, params))
        .collect()
}

fn track_one(
    prev: &Pyramid,
    next: &Pyramid,
    depth: usize,
    p: [f32; 2],
    params: &LkParams,
) -> Option<[f32; 2]> {
    let r = params.window_radius;
    let n_win = ((2 * r + 1) * (2 * r + 1)) as f32;
    let mut guess = [0.0f32; 2];
    let mut template = Vec::with_capacity(((2 * r + 1) * (2 * r + 1)) as usize);

    for level in (0..depth).rev() {
        let scale = (1u32 << level) as f32;
        let i_img = prev.level(level);
        let j_img = next.level(level);
        let pl = [p[0] / scale, p[1] / scale];

        template.clear();
        let (mut gxx, mut gxy, mut gyy) = (0.0f32, 0.0f32, 0.0f32);
        for dy in -r..=r {
            for dx in -r..=r {
                let x = pl[0] + dx as f32;
                let y = pl[1] + dy as f32;
                let ix = 0.5 * (sample(i_img, x + 1.0, y) - sample(i_img, x - 1.0, y));
                let iy = 0.5 * (sample(i_img, x, y + 1.0) - sample(i_img, x, y - 1.0));
                gxx += ix * ix;
                gxy += ix * iy;
                gyy += iy * iy;
                template.push((sample(i_img, x, y), ix, iy));
            }
        }

        let det = gxx * gyy - gxy * gxy;
        let half_tr = 0.5 * (gxx + gyy);
        let min_eig = half_tr - (0.25 * (gxx - gyy).powi(2) + gxy * gxy).sqrt();
        if min_eig / n_win < params.min_eigen || det.abs() < f32::EPSILON {
            return None;
        }

        let mut v = [0.0f32; 2];
        for _ in 0..params.max_iterations {
            let (mut bx, mut by) = (0.0f32, 0.0f32);
            let mut k = 0;
            for dy in -r..=r {
                for dx in -r..=r {
                    let (iv, ix, iy) = template[k];
                    k += 1;
                    let jx = pl[0] + dx as f32 + guess[0] + v[0];
                    let jy = pl[1] + dy as f32 + guess[1] + v[1];
                    let diff = iv - sample(j_img, jx, jy);
                    bx += diff * ix;
                    by += diff * iy;
                }
            }
            let ex = (gyy * bx - gxy * by) / det;
            let ey = (gxx * by - gxy * bx) / det;
            v[0] += ex;
            v[1] += ey;
            if ex * ex + ey * ey < params.epsilon * params.epsilon {
                break;
            }
        }

        if level > 0 {
            guess = [2.0 * (guess[0] + v[0]), 2.0 * (guess[1] + v[1])];
        } else {
            guess = [guess[0] + v[0], guess[1] + v[1]];
        }
    }

    let q = [p[0] + guess[0], p[1] + guess[1]];
    let base = next.level(0);
    let (w, h) = base.dimensions();
    if !(q[0].is_finite() && q[1].is_finite())
        || q[0] < 0.0
        || q[1] < 0.0
        || q[0] > (w - 1) as f32
        || q[1] > (h - 1) as f32
    {
        return None;
    }

    let i0 = prev.level(0);
    let mut residual = 0.0f32;
    for dy in -r..=r {
        for dx in -r..=r {
            let a = sample(i0, p[0] + dx as f32, p[1] + dy as f32);
            let b = sample(base, q[0] + dx as f32, q[1] + dy as f32);
            residual += (a - b).abs();
        }
    }
    if residual / n_win > params.max_residual {
        return None;
    }
    Some(q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::blob_texture;

    fn params() -> LkParams {
        LkParams {
            window_radius: 7,
            max_iterations: 30,
            epsilon: 0.01,
            min_eigen: 1e-2,
            max_residual: 20.0,
        }
    }

    #[test]
    fn pyramid_halves_until_min_size() {
        let img = GrayImage::new(160, 120);
        let pyr = Pyramid::build(&img, 5, 20);
        assert_eq!(pyr.depth(), 3);
        assert_eq!(pyr.level(2).dimensions(), (40, 30));
    }

    #[test]
    fn empty_frames_lose_every_track() {
        let empty = Pyramid::build(&GrayImage::new(0, 12), 3, 0);
        assert_eq!(empty.depth(), 1);
        assert_eq!(sample(empty.level(0), 1.0, 1.0), 0.0);
        let tracked = track(&empty, &empty, &[[0.0, 0.0], [3.0, 4.0]], &params());
        assert_eq!(tracked, vec![None, None]);
    }

    #[test]
    fn tracks_known_shift_on_smooth_texture() {
        let a = image::imageops::grayscale(&blob_texture(160, 120, 21, [0.0, 0.0]));
        let b = image::imageops::grayscale(&blob_texture(160, 120, 21, [3.0, -2.0]));
        let pa = Pyramid::build(&a, 3, 16);
        let pb = Pyramid::build(&b, 3, 16);

        let pts: Vec<[f32; 2]> = (0..6)
            .flat_map(|i| (0..4).map(move |j| [30.0 + i as f32 * 20.0, 30.0 + j as f32 * 20.0]))
            .collect();
        let tracked = track(&pa, &pb, &pts, &params());

        let mut good = 0;
        for (p, t) in pts.iter().zip(&tracked) {
            if let Some(q) = t {
                if (q[0] - p[0] - 3.0).abs() < 0.5 && (q[1] - p[1] + 2.0).abs() < 0.5 {
                    good += 1;
                }
            }
        }
        assert!(good * 4 >= pts.len() * 3, "{} of {} tracked", good, pts.len());
    }

    #[test]
    fn flat_patch_is_lost() {
        let img = GrayImage::from_pixel(64, 64, Luma([90]));
        let pyr = Pyramid::build(&img, 2, 16);
        let out = track(&pyr, &pyr, &[[32.0, 32.0]], &params());
        assert_eq!(out, vec![None]);
    }
}

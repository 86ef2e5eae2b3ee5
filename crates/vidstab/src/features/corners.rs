//! Shi–Tomasi ("good features to track") corner selection.

use image::GrayImage;
use imageproc::gradients::{horizontal_scharr, vertical_scharr};

#[derive(Debug, Clone, Copy)]
pub(crate) struct CornerParams {
    pub max_corners: usize,
    /// Fraction of the strongest response a corner must reach.
    pub quality_level: f32,
    /// Minimum spacing between accepted corners, in pixels.
    pub min_distance: f32,
    /// Half-size of the structure-tensor window.
    pub block_radius: u32,
    /// Corners closer than this to the image edge are ignored.
    pub border: u32,
}

/// Box sum over a `(2r+1)²` window with clamped edges.
fn box_sum(src: &[f32], w: usize, h: usize, r: usize) -> Vec<f32> {
    let mut tmp = vec![0.0f32; w * h];
    for y in 0..h {
        let row = &src[y * w..(y + 1) * w];
        for x in 0..w {
            let lo = x.saturating_sub(r);
            let hi = (x + r).min(w - 1);
            tmp[y * w + x] = row[lo..=hi].iter().sum();
        }
    }
    let mut out = vec![0.0f32; w * h];
    for x in 0..w {
        for y in 0..h {
            let lo = y.saturating_sub(r);
            let hi = (y + r).min(h - 1);
            out[y * w + x] = (lo..=hi).map(|yy| tmp[yy * w + x]).sum();
        }
    }
    out
}

/// Smaller eigenvalue of the gradient structure tensor at every pixel.
pub(crate) fn min_eigen_response(gray: &GrayImage, block_radius: u32) -> Vec<f32> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let gx = horizontal_scharr(gray);
    let gy = vertical_scharr(gray);

    // Scharr kernels sum to 32 across the derivative direction.
    let scale = 1.0 / 32.0;
    let mut xx = vec![0.0f32; w * h];
    let mut xy = vec![0.0f32; w * h];
    let mut yy = vec![0.0f32; w * h];
    for (i, (a, b)) in gx.as_raw().iter().zip(gy.as_raw()).enumerate() {
        let dx = *a as f32 * scale;
        let dy = *b as f32 * scale;
        xx[i] = dx * dx;
        xy[i] = dx * dy;
        yy[i] = dy * dy;
    }

    let r = block_radius as usize;
    let sxx = box_sum(&xx, w, h, r);
    let sxy = box_sum(&xy, w, h, r);
    let syy = box_sum(&yy, w, h, r);

    sxx.iter()
        .zip(&sxy)
        .zip(&syy)
        .map(|((&a, &b), &c)| {
            let half_tr = 0.5 * (a + c);
            let d = (0.25 * (a - c) * (a - c) + b * b).sqrt();
            half_tr - d
        })
        .collect()
}

/// Strongest well-separated corners, strongest first, as `[x, y]`.
pub(crate) fn good_features(gray: &GrayImage, params: &CornerParams) -> Vec<[f32; 2]> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let b = params.border as usize;
    if w <= 2 * b + 2 || h <= 2 * b + 2 || params.max_corners == 0 {
        return Vec::new();
    }

    let resp = min_eigen_response(gray, params.block_radius);
    let max_resp = resp.iter().copied().fold(0.0f32, f32::max);
    if max_resp <= 0.0 {
        return Vec::new();
    }
    let thresh = max_resp * params.quality_level;

    // 3×3 local maxima above threshold.
    let mut cands: Vec<(f32, usize, usize)> = Vec::new();
    for y in b.max(1)..h - b.max(1) {
        for x in b.max(1)..w - b.max(1) {
            let v = resp[y * w + x];
            if v < thresh {
                continue;
            }
            let is_max = (y - 1..=y + 1)
                .all(|yy| (x - 1..=x + 1).all(|xx| resp[yy * w + xx] <= v));
            if is_max {
                cands.push((v, x, y));
            }
        }
    }
    cands.sort_by(|a, b| b.0.total_cmp(&a.0));

    // Greedy min-distance suppression on a bucket grid.
    let md = params.min_distance.max(1.0);
    let cell = md as usize;
    let gw = w / cell + 1;
    let gh = h / cell + 1;
    let mut grid: Vec<Vec<[f32; 2]>> = vec![Vec::new(); gw * gh];
    let mut out = Vec::new();
    for (_, x, y) in cands {
        let (cx, cy) = (x / cell, y / cell);
        let p = [x as f32, y as f32];
        let mut ok = true;
        'search: for ny in cy.saturating_sub(1)..=(cy + 1).min(gh - 1) {
            for nx in cx.saturating_sub(1)..=(cx + 1).min(gw - 1) {
                for q in &grid[ny * gw + nx] {
                    if (q[0] - p[0]).hypot(q[1] - p[1]) < md {
                        ok = false;
                        break 'search;
                    }
                }
            }
        }
        if ok {
            grid[cy * gw + cx].push(p);
            out.push(p);
            if out.len() >= params.max_corners {
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn checkerboard(w: u32, h: u32, square: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            if ((x / square) + (y / square)) % 2 == 0 {
                Luma([40])
            } else {
                Luma([210])
            }
        })
    }

    fn params() -> CornerParams {
        CornerParams {
            max_corners: 100,
            quality_level: 0.05,
            min_distance: 5.0,
            block_radius: 1,
            border: 4,
        }
    }

    #[test]
    fn checkerboard_corners_sit_on_square_junctions() {
        let img = checkerboard(64, 64, 16);
        let corners = good_features(&img, &params());
        assert!(corners.len() >= 9, "found {}", corners.len());
        for c in &corners {
            let nx = (c[0] / 16.0).round() * 16.0;
            let ny = (c[1] / 16.0).round() * 16.0;
            assert!((c[0] - nx).abs() <= 2.0 && (c[1] - ny).abs() <= 2.0, "{:?}", c);
        }
    }

    #[test]
    fn flat_image_has_no_corners() {
        let img = GrayImage::from_pixel(32, 32, Luma([128]));
        assert!(good_features(&img, &params()).is_empty());
    }

    #[test]
    fn corners_respect_min_distance_and_cap() {
        let img = checkerboard(96, 96, 8);
        let mut p = params();
        p.max_corners = 10;
        p.min_distance = 12.0;
        let corners = good_features(&img, &p);
        assert!(corners.len() <= 10);
        for (i, a) in corners.iter().enumerate() {
            for b in &corners[i + 1..] {
                assert!((a[0] - b[0]).hypot(a[1] - b[1]) >= 12.0);
            }
        }
    }
}

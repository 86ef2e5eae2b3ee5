//! Closed-form fitters for each motion model.
//!
//! All fitters take correspondences `src → dst` and return the 3×3 matrix `M`
//! with `dst ≈ project(M, src)`. Minimal subsets give exact solutions; larger
//! sets give the least-squares solution.
//!
//! - Translation: mean displacement.
//! - Translation + scale, rigid, similarity: centred Procrustes/Umeyama forms.
//! - Affine: linear least squares via SVD.
//! - Homography: DLT with Hartley normalization.

use nalgebra::{DMatrix, DVector, Matrix3};

use super::Correspondence;

// ── Error type ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum FitError {
    TooFewPoints { needed: usize, got: usize },
    Degenerate(&'static str),
    NumericalFailure(String),
}

impl std::fmt::Display for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewPoints { needed, got } => {
                write!(f, "too few points: need {}, got {}", needed, got)
            }
            Self::Degenerate(what) => write!(f, "degenerate configuration: {}", what),
            Self::NumericalFailure(msg) => write!(f, "numerical failure: {}", msg),
        }
    }
}

impl std::error::Error for FitError {}

const EPS: f64 = 1e-12;

// ── Centred statistics ───────────────────────────────────────────────────

/// Centroids of both point sets plus the sums needed by the rotation/scale
/// fitters: `Σ|p̃|²`, `Σ p̃·q̃` and `Σ p̃×q̃` over centred points.
struct Moments {
    src_mean: [f64; 2],
    dst_mean: [f64; 2],
    src_sq: f64,
    dot: f64,
    cross: f64,
}

fn moments(corrs: &[Correspondence]) -> Moments {
    let n = corrs.len() as f64;
    let mut sm = [0.0; 2];
    let mut dm = [0.0; 2];
    for c in corrs {
        sm[0] += c.src[0];
        sm[1] += c.src[1];
        dm[0] += c.dst[0];
        dm[1] += c.dst[1];
    }
    sm = [sm[0] / n, sm[1] / n];
    dm = [dm[0] / n, dm[1] / n];

    let (mut src_sq, mut dot, mut cross) = (0.0, 0.0, 0.0);
    for c in corrs {
        let p = [c.src[0] - sm[0], c.src[1] - sm[1]];
        let q = [c.dst[0] - dm[0], c.dst[1] - dm[1]];
        src_sq += p[0] * p[0] + p[1] * p[1];
        dot += p[0] * q[0] + p[1] * q[1];
        cross += p[0] * q[1] - p[1] * q[0];
    }
    Moments {
        src_mean: sm,
        dst_mean: dm,
        src_sq,
        dot,
        cross,
    }
}

/// `[a -b tx; b a ty; 0 0 1]` with the translation chosen so the source
/// centroid lands on the destination centroid.
fn linear_part_with_centroids(a: f64, b: f64, m: &Moments) -> Matrix3<f64> {
    let tx = m.dst_mean[0] - (a * m.src_mean[0] - b * m.src_mean[1]);
    let ty = m.dst_mean[1] - (b * m.src_mean[0] + a * m.src_mean[1]);
    Matrix3::new(a, -b, tx, b, a, ty, 0.0, 0.0, 1.0)
}

// ── Fitters ──────────────────────────────────────────────────────────────

pub(crate) fn fit_translation(corrs: &[Correspondence]) -> Result<Matrix3<f64>, FitError> {
    let n = corrs.len() as f64;
    let (mut tx, mut ty) = (0.0, 0.0);
    for c in corrs {
        tx += c.dst[0] - c.src[0];
        ty += c.dst[1] - c.src[1];
    }
    Ok(Matrix3::new_translation(&nalgebra::Vector2::new(tx / n, ty / n)))
}

pub(crate) fn fit_translation_scale(corrs: &[Correspondence]) -> Result<Matrix3<f64>, FitError> {
    let m = moments(corrs);
    if m.src_sq < EPS {
        return Err(FitError::Degenerate("coincident source points"));
    }
    let s = m.dot / m.src_sq;
    if s.abs() < EPS {
        return Err(FitError::Degenerate("zero scale"));
    }
    Ok(linear_part_with_centroids(s, 0.0, &m))
}

pub(crate) fn fit_rigid(corrs: &[Correspondence]) -> Result<Matrix3<f64>, FitError> {
    let m = moments(corrs);
    if m.dot.abs() < EPS && m.cross.abs() < EPS {
        return Err(FitError::Degenerate("rotation undetermined"));
    }
    let theta = m.cross.atan2(m.dot);
    Ok(linear_part_with_centroids(theta.cos(), theta.sin(), &m))
}

pub(crate) fn fit_similarity(corrs: &[Correspondence]) -> Result<Matrix3<f64>, FitError> {
    let m = moments(corrs);
    if m.src_sq < EPS {
        return Err(FitError::Degenerate("coincident source points"));
    }
    let a = m.dot / m.src_sq;
    let b = m.cross / m.src_sq;
    if a * a + b * b < EPS {
        return Err(FitError::Degenerate("zero scale"));
    }
    Ok(linear_part_with_centroids(a, b, &m))
}

pub(crate) fn fit_affine(corrs: &[Correspondence]) -> Result<Matrix3<f64>, FitError> {
    // Centre the source points so the design matrix stays well conditioned
    // for pixel-sized coordinates.
    let n = corrs.len();
    let m = moments(corrs);
    let mut a = DMatrix::zeros(n, 3);
    let mut bx = DVector::zeros(n);
    let mut by = DVector::zeros(n);
    for (i, c) in corrs.iter().enumerate() {
        a[(i, 0)] = c.src[0] - m.src_mean[0];
        a[(i, 1)] = c.src[1] - m.src_mean[1];
        a[(i, 2)] = 1.0;
        bx[i] = c.dst[0];
        by[i] = c.dst[1];
    }

    let svd = a.svd(true, true);
    let sv = &svd.singular_values;
    let max_sv = sv.max();
    if max_sv < EPS || sv.min() / max_sv < 1e-9 {
        return Err(FitError::Degenerate("collinear source points"));
    }
    let rx = svd
        .solve(&bx, EPS)
        .map_err(|e| FitError::NumericalFailure(e.to_string()))?;
    let ry = svd
        .solve(&by, EPS)
        .map_err(|e| FitError::NumericalFailure(e.to_string()))?;

    // Undo the centring: x' = r0 (x - mx) + r1 (y - my) + r2.
    let (mx, my) = (m.src_mean[0], m.src_mean[1]);
    Ok(Matrix3::new(
        rx[0],
        rx[1],
        rx[2] - rx[0] * mx - rx[1] * my,
        ry[0],
        ry[1],
        ry[2] - ry[0] * mx - ry[1] * my,
        0.0,
        0.0,
        1.0,
    ))
}

// ── Homography (DLT) ─────────────────────────────────────────────────────

/// Translate the centroid to the origin and scale so the mean distance from
/// it is sqrt(2).
fn normalize_points(pts: impl Iterator<Item = [f64; 2]>) -> (Matrix3<f64>, Vec<[f64; 2]>) {
    let pts: Vec<[f64; 2]> = pts.collect();
    let n = pts.len() as f64;
    let cx: f64 = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy: f64 = pts.iter().map(|p| p[1]).sum::<f64>() / n;

    let mean_dist: f64 = pts
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts
        .iter()
        .map(|p| [s * (p[0] - cx), s * (p[1] - cy)])
        .collect();
    (t, normalized)
}

pub(crate) fn fit_homography_dlt(corrs: &[Correspondence]) -> Result<Matrix3<f64>, FitError> {
    let n = corrs.len();
    let (t_src, src_n) = normalize_points(corrs.iter().map(|c| c.src));
    let (t_dst, dst_n) = normalize_points(corrs.iter().map(|c| c.dst));

    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = (src_n[i][0], src_n[i][1]);
        let (dx, dy) = (dst_n[i][0], dst_n[i][1]);

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // Null vector of A = eigenvector of the smallest eigenvalue of AᵀA.
    let ata = a.transpose() * &a;
    let eig = nalgebra::SymmetricEigen::new(ata);
    let min_idx = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.abs().total_cmp(&y.1.abs()))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let h = eig.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| FitError::NumericalFailure("T_dst not invertible".into()))?;
    let h = t_dst_inv * h_norm * t_src;

    let scale = h[(2, 2)];
    if scale.abs() < 1e-15 {
        return Err(FitError::Degenerate("homography maps origin to infinity"));
    }
    Ok(h / scale)
}

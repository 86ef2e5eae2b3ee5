//! RANSAC over a [`MotionModel`] with confidence-bounded iteration count.

use nalgebra::Matrix3;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::ConfigError;

use super::outlier::{NullOutlierRejector, OutlierRejector};
use super::{Correspondence, MotionModel};

/// User-facing RANSAC parameters. `None` fields mean "auto".
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RobustFitParams {
    /// Correspondences per hypothesis. `None` resolves to the model minimum.
    pub subset_size: Option<usize>,
    /// Transfer-error threshold in pixels. `None` resolves to
    /// [`MotionModel::default_inlier_threshold`].
    pub inlier_threshold: Option<f64>,
    /// Largest accepted outlier fraction, in (0, 1). Also the prior used for
    /// the initial iteration bound.
    pub max_outlier_ratio: f64,
    /// Smallest accepted inlier fraction, in (0, 1).
    pub min_inlier_ratio: f64,
    /// Probability that at least one sampled subset is outlier-free.
    pub confidence: f64,
    /// Hard cap on hypotheses per estimate.
    pub max_iterations: usize,
    /// Seed for subset sampling; estimates are deterministic per input.
    pub seed: u64,
}

impl Default for RobustFitParams {
    fn default() -> Self {
        Self {
            subset_size: None,
            inlier_threshold: None,
            max_outlier_ratio: 0.5,
            min_inlier_ratio: 0.1,
            confidence: 0.99,
            max_iterations: 1000,
            seed: 0,
        }
    }
}

/// [`RobustFitParams`] with every "auto" replaced and every range checked.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ResolvedFitParams {
    pub subset_size: usize,
    pub inlier_threshold: f64,
    pub max_outlier_ratio: f64,
    pub min_inlier_ratio: f64,
    pub confidence: f64,
    pub max_iterations: usize,
    pub seed: u64,
}

fn check_open_unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            expected: "(0, 1)",
        })
    }
}

impl RobustFitParams {
    /// Resolve "auto" values for `model` and validate ranges.
    pub fn resolve(&self, model: MotionModel) -> Result<ResolvedFitParams, ConfigError> {
        let minimum = model.min_subset_size();
        let subset_size = self.subset_size.unwrap_or(minimum);
        if subset_size < minimum {
            return Err(ConfigError::SubsetTooSmall {
                model,
                subset: subset_size,
                minimum,
            });
        }

        let inlier_threshold = self
            .inlier_threshold
            .unwrap_or_else(|| model.default_inlier_threshold());
        if !(inlier_threshold.is_finite() && inlier_threshold > 0.0) {
            return Err(ConfigError::OutOfRange {
                name: "inlier_threshold",
                value: inlier_threshold,
                expected: "> 0",
            });
        }

        check_open_unit("max_outlier_ratio", self.max_outlier_ratio)?;
        check_open_unit("min_inlier_ratio", self.min_inlier_ratio)?;
        check_open_unit("confidence", self.confidence)?;
        if self.max_iterations == 0 {
            return Err(ConfigError::OutOfRange {
                name: "max_iterations",
                value: 0.0,
                expected: ">= 1",
            });
        }

        Ok(ResolvedFitParams {
            subset_size,
            inlier_threshold,
            max_outlier_ratio: self.max_outlier_ratio,
            min_inlier_ratio: self.min_inlier_ratio,
            confidence: self.confidence,
            max_iterations: self.max_iterations,
            seed: self.seed,
        })
    }
}

impl ResolvedFitParams {
    /// Hypotheses needed to draw one clean subset with probability
    /// `confidence` when a fraction `outlier_ratio` of the data is bad:
    /// `ceil(log(1 - p) / log(1 - (1 - eps)^s))`, capped at `max_iterations`.
    pub fn iterations_for(&self, outlier_ratio: f64) -> usize {
        let p_clean = (1.0 - outlier_ratio.clamp(0.0, 1.0)).powi(self.subset_size as i32);
        if p_clean >= 1.0 {
            return 1;
        }
        if p_clean <= f64::EPSILON {
            return self.max_iterations;
        }
        let n = ((1.0 - self.confidence).ln() / (1.0 - p_clean).ln()).ceil();
        if !n.is_finite() {
            return self.max_iterations;
        }
        (n as usize).clamp(1, self.max_iterations)
    }
}

/// Result of one robust fit.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionEstimate {
    /// Frame-to-frame transform; identity when `success` is false.
    pub transform: Matrix3<f64>,
    /// One flag per input correspondence.
    pub inlier_mask: Vec<bool>,
    pub n_inliers: usize,
    /// RMS transfer error over inliers, in pixels.
    pub rms_error: f64,
    pub success: bool,
}

impl MotionEstimate {
    /// Identity fallback for a pair that could not be estimated.
    pub fn degraded(n_correspondences: usize) -> Self {
        Self {
            transform: Matrix3::identity(),
            inlier_mask: vec![false; n_correspondences],
            n_inliers: 0,
            rms_error: 0.0,
            success: false,
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.success
    }

    pub fn inlier_ratio(&self) -> f64 {
        if self.inlier_mask.is_empty() {
            0.0
        } else {
            self.n_inliers as f64 / self.inlier_mask.len() as f64
        }
    }
}

/// Fits one motion model robustly. Never fails on bad data: unusable input
/// yields [`MotionEstimate::degraded`].
pub struct RobustMotionEstimator {
    model: MotionModel,
    params: ResolvedFitParams,
    rejector: Box<dyn OutlierRejector>,
}

impl std::fmt::Debug for RobustMotionEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobustMotionEstimator")
            .field("model", &self.model)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl RobustMotionEstimator {
    pub fn new(model: MotionModel, params: &RobustFitParams) -> Result<Self, ConfigError> {
        Ok(Self {
            model,
            params: params.resolve(model)?,
            rejector: Box::new(NullOutlierRejector),
        })
    }

    /// Run `rejector` on every correspondence set before the global fit.
    pub fn with_outlier_rejector(mut self, rejector: impl OutlierRejector + 'static) -> Self {
        self.rejector = Box::new(rejector);
        self
    }

    pub fn model(&self) -> MotionModel {
        self.model
    }

    pub fn params(&self) -> &ResolvedFitParams {
        &self.params
    }

    pub fn estimate(&self, corrs: &[Correspondence]) -> MotionEstimate {
        let n = corrs.len();
        let p = &self.params;

        let keep = self.rejector.retain_mask(corrs);
        let candidates: Vec<Correspondence> = corrs
            .iter()
            .zip(&keep)
            .filter(|(_, &k)| k)
            .map(|(c, _)| *c)
            .collect();
        if candidates.len() < p.subset_size {
            tracing::trace!(
                "{} of {} correspondences left after local rejection, need {}",
                candidates.len(),
                n,
                p.subset_size
            );
            return MotionEstimate::degraded(n);
        }

        let Some(best) = self.search(&candidates) else {
            return MotionEstimate::degraded(n);
        };

        // Re-fit to all inliers of the best hypothesis.
        let inliers: Vec<Correspondence> = candidates
            .iter()
            .filter(|c| c.residual(&best) < p.inlier_threshold)
            .copied()
            .collect();
        let transform = self.model.fit(&inliers).unwrap_or(best);
        if transform.try_inverse().is_none() {
            return MotionEstimate::degraded(n);
        }

        let mut inlier_mask = vec![false; n];
        let mut n_inliers = 0usize;
        let mut sq_sum = 0.0;
        for (i, c) in corrs.iter().enumerate() {
            if !keep[i] {
                continue;
            }
            let r = c.residual(&transform);
            if r < p.inlier_threshold {
                inlier_mask[i] = true;
                n_inliers += 1;
                sq_sum += r * r;
            }
        }

        let inlier_ratio = n_inliers as f64 / n as f64;
        let outlier_ratio = 1.0 - inlier_ratio;
        if inlier_ratio < p.min_inlier_ratio || outlier_ratio > p.max_outlier_ratio {
            tracing::trace!(
                "rejecting {} fit: {}/{} inliers",
                self.model,
                n_inliers,
                n
            );
            return MotionEstimate::degraded(n);
        }

        MotionEstimate {
            transform,
            inlier_mask,
            n_inliers,
            rms_error: (sq_sum / n_inliers.max(1) as f64).sqrt(),
            success: true,
        }
    }

    /// Best-scoring hypothesis over random minimal subsets.
    fn search(&self, candidates: &[Correspondence]) -> Option<Matrix3<f64>> {
        let p = &self.params;
        let n = candidates.len();
        let mut rng = StdRng::seed_from_u64(p.seed);

        let mut best_count = 0usize;
        let mut best: Option<Matrix3<f64>> = None;
        let mut budget = p.iterations_for(p.max_outlier_ratio);
        let mut iter = 0usize;
        let mut subset = Vec::with_capacity(p.subset_size);

        while iter < budget {
            iter += 1;
            subset.clear();
            subset.extend(
                sample_indices(&mut rng, n, p.subset_size)
                    .into_iter()
                    .map(|i| candidates[i]),
            );
            let Ok(m) = self.model.fit(&subset) else {
                continue;
            };

            let count = candidates
                .iter()
                .filter(|c| c.residual(&m) < p.inlier_threshold)
                .count();
            if count > best_count {
                best_count = count;
                best = Some(m);
                let observed_outliers = 1.0 - count as f64 / n as f64;
                budget = budget.min(p.iterations_for(observed_outliers));
            }
        }

        tracing::trace!(
            "{} ransac: {} iterations, best {}/{}",
            self.model,
            iter,
            best_count,
            n
        );
        best
    }
}

/// Sample `k` distinct indices from `0..n` using Fisher–Yates partial shuffle.
pub(super) fn sample_indices(rng: &mut impl rand::Rng, n: usize, k: usize) -> Vec<usize> {
    debug_assert!(k <= n);
    let mut indices: Vec<usize> = (0..n).collect();
    for i in 0..k {
        let j = rng.gen_range(i..n);
        indices.swap(i, j);
    }
    indices.truncate(k);
    indices
}

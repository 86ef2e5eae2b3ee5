//! Pre-fit outlier rejection.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::ransac::sample_indices;
use super::Correspondence;

/// Filters correspondences before the global robust fit.
pub trait OutlierRejector: Send + Sync {
    /// One flag per correspondence; `false` removes it from the fit.
    fn retain_mask(&self, corrs: &[Correspondence]) -> Vec<bool>;
}

/// Accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOutlierRejector;

impl OutlierRejector for NullOutlierRejector {
    fn retain_mask(&self, corrs: &[Correspondence]) -> Vec<bool> {
        vec![true; corrs.len()]
    }
}

/// Grid-local translation consensus.
///
/// Correspondences are bucketed by source position into square cells. Inside
/// each cell a translation-only RANSAC picks the dominant displacement; points
/// disagreeing with it by more than `threshold` pixels are dropped.
#[derive(Debug, Clone)]
pub struct TranslationLocalOutlierRejector {
    /// Side of a grid cell in pixels.
    pub cell_size: f64,
    /// Displacement tolerance in pixels.
    pub threshold: f64,
    /// Hypotheses tried per cell.
    pub iterations: usize,
    pub seed: u64,
}

impl TranslationLocalOutlierRejector {
    pub const DEFAULT_CELL_SIZE: f64 = 50.0;

    pub fn new(threshold: f64) -> Self {
        Self {
            cell_size: Self::DEFAULT_CELL_SIZE,
            threshold,
            iterations: 16,
            seed: 0,
        }
    }
}

impl OutlierRejector for TranslationLocalOutlierRejector {
    fn retain_mask(&self, corrs: &[Correspondence]) -> Vec<bool> {
        let mut cells: BTreeMap<(i64, i64), Vec<usize>> = BTreeMap::new();
        for (i, c) in corrs.iter().enumerate() {
            let key = (
                (c.src[0] / self.cell_size).floor() as i64,
                (c.src[1] / self.cell_size).floor() as i64,
            );
            cells.entry(key).or_default().push(i);
        }

        let disp = |i: usize| {
            let c = &corrs[i];
            [c.dst[0] - c.src[0], c.dst[1] - c.src[1]]
        };
        let agrees = |t: [f64; 2], i: usize| {
            let d = disp(i);
            (d[0] - t[0]).hypot(d[1] - t[1]) < self.threshold
        };

        let mut mask = vec![false; corrs.len()];
        let mut rng = StdRng::seed_from_u64(self.seed);
        for members in cells.values() {
            // Small cells are tried exhaustively.
            let hypotheses: Vec<usize> = if members.len() <= self.iterations {
                members.clone()
            } else {
                sample_indices(&mut rng, members.len(), self.iterations)
                    .into_iter()
                    .map(|k| members[k])
                    .collect()
            };

            let mut best_t = [0.0; 2];
            let mut best_count = 0usize;
            for &h in &hypotheses {
                let t = disp(h);
                let count = members.iter().filter(|&&i| agrees(t, i)).count();
                if count > best_count {
                    best_count = count;
                    best_t = t;
                }
            }
            for &i in members {
                mask[i] = agrees(best_t, i);
            }
        }
        mask
    }
}

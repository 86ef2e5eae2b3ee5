//! Trajectory smoothing stabilizers.
//!
//! Both variants pull frames from a [`FrameSource`](crate::io::FrameSource)
//! and emit them stabilized, in source order, through the [`Stabilizer`]
//! trait.

pub mod filter;
mod one_pass;
pub mod trim;
mod two_pass;

pub use filter::GaussianMotionFilter;
pub use one_pass::OnePassStabilizer;
pub use trim::TrimPolicy;
pub use two_pass::TwoPassStabilizer;

use std::sync::Arc;

use nalgebra::Matrix3;
use rayon::prelude::*;

use crate::compositor::Compositor;
use crate::deblur::{BlurEstimate, Deblurrer};
use crate::error::StabilizeError;
use crate::features::CorrespondenceSource;
use crate::frame::Frame;
use crate::motion::{MotionEstimate, RobustMotionEstimator};

/// One output frame and the transforms that produced it.
#[derive(Debug, Clone)]
pub struct StabilizedFrame {
    /// Composited output frame.
    pub frame: Frame,
    /// Smoothing correction `S` (raw → stabilized coordinates).
    pub correction: Matrix3<f64>,
    /// Final warp applied, including wobble removal and inclusion limits.
    pub transform: Matrix3<f64>,
    pub blur: Option<BlurEstimate>,
    /// The motion into this frame could not be estimated.
    pub degraded: bool,
}

/// Pull-based stream of stabilized frames.
pub trait Stabilizer {
    /// Next stabilized frame in source order, or `None` when drained.
    fn next_frame(&mut self) -> Result<Option<StabilizedFrame>, StabilizeError>;

    /// Pairs whose motion fell back to identity so far.
    fn degraded_pairs(&self) -> usize;

    /// Trim ratio applied to output frames.
    fn trim_ratio(&self) -> f64;
}

// ── Motion stage ───────────────────────────────────────────────────────────

/// Correspondence source plus robust estimator for one motion model.
#[derive(Clone)]
pub struct MotionStage {
    source: Arc<dyn CorrespondenceSource>,
    estimator: Arc<RobustMotionEstimator>,
}

impl std::fmt::Debug for MotionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionStage")
            .field("estimator", &self.estimator)
            .finish_non_exhaustive()
    }
}

impl MotionStage {
    pub fn new(source: Arc<dyn CorrespondenceSource>, estimator: RobustMotionEstimator) -> Self {
        Self {
            source,
            estimator: Arc::new(estimator),
        }
    }

    pub fn estimator(&self) -> &RobustMotionEstimator {
        &self.estimator
    }

    /// Motion from `prev` to `curr`; identity when the pair is unusable.
    pub fn estimate(&self, prev: &Frame, curr: &Frame) -> MotionEstimate {
        let corrs = self.source.correspondences(prev, curr);
        let needed = self.estimator.params().subset_size;
        if corrs.len() < needed {
            tracing::debug!(
                "frames {}→{}: {} correspondences, need {}",
                prev.index(),
                curr.index(),
                corrs.len(),
                needed
            );
            return MotionEstimate::degraded(corrs.len());
        }
        let est = self.estimator.estimate(&corrs);
        tracing::debug!(
            "frames {}→{}: {} {}/{} inliers, rms {:.3}",
            prev.index(),
            curr.index(),
            self.estimator.model(),
            est.n_inliers,
            corrs.len(),
            est.rms_error
        );
        est
    }

    /// Estimates for every consecutive pair, computed in parallel and
    /// returned in frame order.
    pub fn estimate_all(&self, frames: &[Frame]) -> Vec<MotionEstimate> {
        frames
            .par_windows(2)
            .map(|pair| self.estimate(&pair[0], &pair[1]))
            .collect()
    }
}

// ── Output stage ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub(crate) struct Finisher {
    compositor: Compositor,
    deblurrer: Option<Deblurrer>,
}

impl Finisher {
    pub(crate) fn new(compositor: Compositor, deblurrer: Option<Deblurrer>) -> Self {
        Self {
            compositor,
            deblurrer,
        }
    }

    pub(crate) fn finish(
        &self,
        frame: &Frame,
        correction: Matrix3<f64>,
        transform: Matrix3<f64>,
        trim_ratio: f64,
        degraded: bool,
    ) -> StabilizedFrame {
        let (source, blur) = match &self.deblurrer {
            Some(d) => {
                let est = d.estimate(frame, &transform);
                (d.deblur(frame, &est), Some(est))
            }
            None => (frame.clone(), None),
        };
        StabilizedFrame {
            frame: self.compositor.compose(&source, &transform, trim_ratio),
            correction,
            transform,
            blur,
            degraded,
        }
    }
}

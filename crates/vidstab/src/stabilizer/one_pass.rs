use std::collections::VecDeque;

use nalgebra::Matrix3;

use crate::error::StabilizeError;
use crate::frame::Frame;
use crate::io::FrameSource;

use super::trim::{ensure_inclusion, TrimPolicy};
use super::{Finisher, GaussianMotionFilter, MotionStage, StabilizedFrame, Stabilizer};

/// Causal stabilizer: each frame is corrected from past frames only, with a
/// latency of zero frames.
pub struct OnePassStabilizer {
    source: Box<dyn FrameSource>,
    motion: MotionStage,
    filter: GaussianMotionFilter,
    trim: TrimPolicy,
    inclusion: bool,
    finisher: Finisher,
    prev: Option<Frame>,
    window: VecDeque<Matrix3<f64>>,
    degraded: usize,
}

impl OnePassStabilizer {
    pub(crate) fn new(
        source: Box<dyn FrameSource>,
        motion: MotionStage,
        filter: GaussianMotionFilter,
        trim: TrimPolicy,
        inclusion: bool,
        finisher: Finisher,
    ) -> Self {
        if trim.estimate_automatically {
            tracing::debug!("one-pass mode cannot estimate trim, using {:.3}", trim.ratio);
        }
        let capacity = filter.radius() + 1;
        Self {
            source,
            motion,
            filter,
            trim,
            inclusion,
            finisher,
            prev: None,
            window: VecDeque::with_capacity(capacity + 1),
            degraded: 0,
        }
    }

    /// Append the pose of `frame` to the window; true if its motion degraded.
    fn advance(&mut self, frame: &Frame) -> bool {
        let Some(prev) = self.prev.as_ref() else {
            self.window.push_back(Matrix3::identity());
            return false;
        };
        let est = self.motion.estimate(prev, frame);
        let degraded = est.is_degraded();
        if degraded {
            self.degraded += 1;
            tracing::warn!(
                "frames {}→{}: motion estimate degraded, holding pose",
                prev.index(),
                frame.index()
            );
        }
        let last = self.window.back().copied().unwrap_or_else(Matrix3::identity);
        self.window.push_back(est.transform * last);
        while self.window.len() > self.filter.radius() + 1 {
            self.window.pop_front();
        }
        degraded
    }
}

impl Stabilizer for OnePassStabilizer {
    fn next_frame(&mut self) -> Result<Option<StabilizedFrame>, StabilizeError> {
        let Some(frame) = self.source.next_frame()? else {
            return Ok(None);
        };
        let degraded = self.advance(&frame);

        let correction = self.filter.stabilize_causal(self.window.make_contiguous());
        let transform = if self.inclusion {
            ensure_inclusion(&correction, frame.width(), frame.height(), self.trim.ratio)
        } else {
            correction
        };

        let out = self
            .finisher
            .finish(&frame, correction, transform, self.trim.ratio, degraded);
        self.prev = Some(frame);
        Ok(Some(out))
    }

    fn degraded_pairs(&self) -> usize {
        self.degraded
    }

    fn trim_ratio(&self) -> f64 {
        self.trim.ratio
    }
}

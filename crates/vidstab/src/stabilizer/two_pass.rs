use std::collections::VecDeque;

use nalgebra::Matrix3;

use crate::error::StabilizeError;
use crate::frame::Frame;
use crate::io::FrameSource;
use crate::pipeline::CancellationToken;
use crate::trajectory::Trajectory;
use crate::wobble::WobbleSuppressor;

use super::trim::{ensure_inclusion, estimate_trim_ratio, TrimPolicy};
use super::{Finisher, GaussianMotionFilter, MotionStage, StabilizedFrame, Stabilizer};

/// Global stabilizer: reads and buffers the whole clip, smooths the complete
/// trajectory, then emits frames in order.
///
/// The first call to [`Stabilizer::next_frame`] runs the analysis pass.
pub struct TwoPassStabilizer {
    state: State,
    motion: MotionStage,
    filter: GaussianMotionFilter,
    trim: TrimPolicy,
    inclusion: bool,
    wobble: Option<WobbleSuppressor>,
    finisher: Finisher,
    cancel: Option<CancellationToken>,
}

enum State {
    Pending(Box<dyn FrameSource>),
    Ready(Plan),
    Drained,
}

struct Plan {
    frames: VecDeque<Frame>,
    corrections: Vec<Matrix3<f64>>,
    transforms: Vec<Matrix3<f64>>,
    degraded: Vec<bool>,
    degraded_pairs: usize,
    trim_ratio: f64,
    next: usize,
}

impl TwoPassStabilizer {
    pub(crate) fn new(
        source: Box<dyn FrameSource>,
        motion: MotionStage,
        filter: GaussianMotionFilter,
        trim: TrimPolicy,
        inclusion: bool,
        finisher: Finisher,
    ) -> Self {
        Self {
            state: State::Pending(source),
            motion,
            filter,
            trim,
            inclusion,
            wobble: None,
            finisher,
            cancel: None,
        }
    }

    pub(crate) fn with_wobble(mut self, wobble: WobbleSuppressor) -> Self {
        self.wobble = Some(wobble);
        self
    }

    /// Stop buffering early if `token` is cancelled while the clip is read.
    pub(crate) fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }

    fn analyze(&self, source: &mut dyn FrameSource) -> Result<Option<Plan>, StabilizeError> {
        // ── Pass 1: buffer and estimate ────────────────────────────────────
        let mut frames = Vec::with_capacity(source.frame_count().unwrap_or(0));
        while let Some(frame) = source.next_frame()? {
            frames.push(frame);
            if self.cancelled() {
                tracing::info!("cancelled while buffering after {} frames", frames.len());
                return Ok(None);
            }
        }
        let Some(first) = frames.first() else {
            return Ok(None);
        };
        let (w, h) = first.dimensions();

        let estimates = self.motion.estimate_all(&frames);
        let trajectory = Trajectory::from_estimates(&estimates);
        let mut degraded = vec![false; frames.len()];
        for (i, est) in estimates.iter().enumerate() {
            if est.is_degraded() {
                degraded[i + 1] = true;
                tracing::warn!(
                    "frames {}→{}: motion estimate degraded, holding pose",
                    i,
                    i + 1
                );
            }
        }

        // ── Pass 2 planning: smooth, suppress wobble, bound ────────────────
        let corrections = self.filter.stabilize_all(trajectory.poses());
        let residuals = match &self.wobble {
            Some(ws) => {
                let secondary = ws.estimate_motions(&frames);
                Some(ws.residuals(&trajectory, &secondary))
            }
            None => None,
        };

        let transforms: Vec<Matrix3<f64>> = corrections
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let unwobbled = match residuals.as_ref().and_then(|r| r.get(i)) {
                    Some(r) => s * r.try_inverse().unwrap_or_else(Matrix3::identity),
                    None => *s,
                };
                if self.inclusion {
                    ensure_inclusion(&unwobbled, w, h, self.trim.ratio)
                } else {
                    unwobbled
                }
            })
            .collect();

        let trim_ratio = if self.trim.estimate_automatically {
            transforms
                .iter()
                .map(|m| estimate_trim_ratio(m, w, h))
                .fold(0.0, f64::max)
        } else {
            self.trim.ratio
        };

        tracing::info!(
            "analyzed {} frames: {} degraded pairs, trim {:.3}{}",
            frames.len(),
            trajectory.degraded_pairs(),
            trim_ratio,
            if residuals.is_some() { ", wobble suppressed" } else { "" }
        );

        Ok(Some(Plan {
            frames: frames.into(),
            corrections,
            transforms,
            degraded,
            degraded_pairs: trajectory.degraded_pairs(),
            trim_ratio,
            next: 0,
        }))
    }
}

impl Stabilizer for TwoPassStabilizer {
    fn next_frame(&mut self) -> Result<Option<StabilizedFrame>, StabilizeError> {
        if let State::Pending(_) = self.state {
            let State::Pending(mut source) = std::mem::replace(&mut self.state, State::Drained)
            else {
                return Ok(None);
            };
            if let Some(plan) = self.analyze(source.as_mut())? {
                self.state = State::Ready(plan);
            }
        }

        let State::Ready(plan) = &mut self.state else {
            return Ok(None);
        };
        let Some(frame) = plan.frames.pop_front() else {
            return Ok(None);
        };
        let i = plan.next;
        plan.next += 1;
        Ok(Some(self.finisher.finish(
            &frame,
            plan.corrections[i],
            plan.transforms[i],
            plan.trim_ratio,
            plan.degraded[i],
        )))
    }

    fn degraded_pairs(&self) -> usize {
        match &self.state {
            State::Ready(plan) => plan.degraded_pairs,
            _ => 0,
        }
    }

    fn trim_ratio(&self) -> f64 {
        match &self.state {
            State::Ready(plan) => plan.trim_ratio,
            _ => self.trim.ratio,
        }
    }
}

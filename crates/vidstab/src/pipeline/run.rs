use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::compositor::Compositor;
use crate::deblur::Deblurrer;
use crate::error::{ConfigError, SinkError, StabilizeError};
use crate::features::{CorrespondenceSource, KeypointTracker};
use crate::io::{FrameSink, FrameSource, PreviewSignal, PreviewSurface};
use crate::motion::{MotionModel, RobustMotionEstimator, TranslationLocalOutlierRejector};
use crate::stabilizer::{
    Finisher, GaussianMotionFilter, MotionStage, OnePassStabilizer, Stabilizer, TwoPassStabilizer,
};
use crate::wobble::WobbleSuppressor;

use super::config::{EstimatorConfig, StabilizationMode, StabilizeConfig};
use super::report::RunReport;

/// Frame rate used when neither the configuration nor the source has one.
pub const DEFAULT_FPS: f64 = 30.0;

/// Shared flag that stops a running pipeline between frames.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A validated configuration wired into stages.
pub struct Pipeline<'a> {
    config: &'a StabilizeConfig,
    primary: Option<Arc<dyn CorrespondenceSource>>,
    wobble: Option<Arc<dyn CorrespondenceSource>>,
    cancel: CancellationToken,
}

impl<'a> Pipeline<'a> {
    /// Validate `config`; nothing is read until [`Pipeline::run`].
    pub fn new(config: &'a StabilizeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            primary: None,
            wobble: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the keypoint tracker of the primary estimator.
    pub fn with_correspondence_source(mut self, source: Arc<dyn CorrespondenceSource>) -> Self {
        self.primary = Some(source);
        self
    }

    /// Replace the keypoint tracker of the wobble estimator.
    pub fn with_wobble_correspondence_source(
        mut self,
        source: Arc<dyn CorrespondenceSource>,
    ) -> Self {
        self.wobble = Some(source);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &StabilizeConfig {
        self.config
    }

    /// Stabilizer for the configured mode, reading from `source`.
    pub fn build_stabilizer(
        &self,
        source: Box<dyn FrameSource>,
    ) -> Result<Box<dyn Stabilizer>, ConfigError> {
        let c = self.config;
        let motion = motion_stage(&c.estimator, self.primary.clone())?;
        let filter = GaussianMotionFilter::new(c.radius);
        let deblurrer = c
            .deblur
            .enabled
            .then(|| Deblurrer::new(c.deblur.radius, c.deblur.sensitivity));
        let finisher = Finisher::new(Compositor::new(c.border), deblurrer);

        Ok(match c.mode {
            StabilizationMode::OnePass => {
                if c.wobble.enabled {
                    return Err(ConfigError::WobbleRequiresTwoPass);
                }
                Box::new(OnePassStabilizer::new(
                    source,
                    motion,
                    filter,
                    c.trim,
                    c.correction_for_inclusion,
                    finisher,
                ))
            }
            StabilizationMode::TwoPass => {
                let mut s = TwoPassStabilizer::new(
                    source,
                    motion,
                    filter,
                    c.trim,
                    c.correction_for_inclusion,
                    finisher,
                )
                .with_cancellation(self.cancel.clone());
                if c.wobble.enabled {
                    let stage = motion_stage(&c.wobble.estimator, self.wobble.clone())?;
                    s = s.with_wobble(WobbleSuppressor::new(c.wobble.period, stage));
                }
                Box::new(s)
            }
        })
    }

    /// Drain `source` through the stabilizer into `sink` and `preview`.
    ///
    /// The sink is opened with the first frame's size. A cancel from the
    /// preview or the token ends the run cleanly after the current frame.
    /// Sink failures end the run at once unless a preview is attached, in
    /// which case the preview keeps running and the error is returned at the
    /// end.
    pub fn run(
        &self,
        source: Box<dyn FrameSource>,
        mut sink: Option<&mut dyn FrameSink>,
        mut preview: Option<&mut dyn PreviewSurface>,
    ) -> Result<RunReport, StabilizeError> {
        let frames_in_source = source.frame_count();
        let output_fps = self
            .config
            .output_fps
            .or(source.fps())
            .filter(|f| f.is_finite() && *f > 0.0)
            .unwrap_or(DEFAULT_FPS);
        let mut stabilizer = self.build_stabilizer(source)?;

        tracing::info!(
            "{} stabilization, radius {}, model {}{}{}",
            self.config.mode,
            self.config.radius,
            self.config.estimator.model,
            if self.config.wobble.enabled { ", wobble suppression" } else { "" },
            if self.config.deblur.enabled { ", deblurring" } else { "" }
        );

        let mut opened = false;
        let mut sink_error: Option<SinkError> = None;
        let mut processed = 0usize;
        let mut cancelled = false;

        loop {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let out = match stabilizer.next_frame() {
                Ok(Some(out)) => out,
                Ok(None) => break,
                Err(e) => {
                    if let (true, Some(s)) = (opened, sink.as_deref_mut()) {
                        if let Err(close_err) = s.close() {
                            tracing::warn!("closing sink after source failure: {}", close_err);
                        }
                    }
                    return Err(e);
                }
            };
            processed += 1;

            if sink_error.is_none() {
                if let Some(s) = sink.as_deref_mut() {
                    let mut written = Ok(());
                    if !opened {
                        let (w, h) = out.frame.dimensions();
                        written = s.open(w, h, output_fps);
                        opened = written.is_ok();
                    }
                    if written.is_ok() {
                        written = s.write(&out.frame);
                    }
                    if let Err(e) = written {
                        tracing::warn!("sink failed at frame {}: {}", out.frame.index(), e);
                        if preview.is_none() {
                            if opened {
                                if let Err(close_err) = s.close() {
                                    tracing::warn!("closing sink after sink failure: {}", close_err);
                                }
                            }
                            return Err(e.into());
                        }
                        sink_error = Some(e);
                    }
                }
            }

            if let Some(p) = preview.as_deref_mut() {
                if p.show(&out.frame) == PreviewSignal::Cancel {
                    tracing::info!("preview cancelled after {} frames", processed);
                    cancelled = true;
                    break;
                }
            }
        }
        cancelled |= self.cancel.is_cancelled();

        if let Some(e) = sink_error {
            if let (true, Some(s)) = (opened, sink.as_deref_mut()) {
                if let Err(close_err) = s.close() {
                    tracing::warn!("closing sink after sink failure: {}", close_err);
                }
            }
            return Err(e.into());
        }
        if let (true, Some(s)) = (opened, sink.as_deref_mut()) {
            s.close()?;
        }

        let report = RunReport {
            mode: self.config.mode,
            frames_processed: processed,
            frames_in_source,
            degraded_pairs: stabilizer.degraded_pairs(),
            trim_ratio: stabilizer.trim_ratio(),
            output_fps,
            cancelled,
        };
        tracing::info!(
            "{} frames processed, {} degraded pairs{}",
            report.frames_processed,
            report.degraded_pairs,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }
}

fn motion_stage(
    config: &EstimatorConfig,
    source: Option<Arc<dyn CorrespondenceSource>>,
) -> Result<MotionStage, ConfigError> {
    let mut estimator = RobustMotionEstimator::new(config.model, &config.ransac)?;
    let params = *estimator.params();
    if config.local_outlier_rejection {
        estimator = estimator.with_outlier_rejector(TranslationLocalOutlierRejector::new(
            local_rejection_threshold(config),
        ));
    }
    let source: Arc<dyn CorrespondenceSource> = match source {
        Some(s) => s,
        None => Arc::new(
            KeypointTracker::new(config.keypoints.clone())
                .with_min_correspondences(params.subset_size),
        ),
    };
    Ok(MotionStage::new(source, estimator))
}

/// Per-cell translation threshold for local outlier rejection.
///
/// An explicit RANSAC threshold applies as is; otherwise the translation
/// default is used, whatever the global model.
pub(super) fn local_rejection_threshold(config: &EstimatorConfig) -> f64 {
    config
        .ransac
        .inlier_threshold
        .unwrap_or_else(|| MotionModel::Translation.default_inlier_threshold())
}

/// Validate `config` and run it with keypoint tracking and no preview.
pub fn stabilize(
    config: &StabilizeConfig,
    source: Box<dyn FrameSource>,
    sink: Option<&mut dyn FrameSink>,
) -> Result<RunReport, StabilizeError> {
    Pipeline::new(config)?.run(source, sink, None)
}

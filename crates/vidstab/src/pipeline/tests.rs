//! End-to-end runs on synthetic clips.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use approx::assert_relative_eq;
use nalgebra::Matrix3;

use super::*;
use crate::error::{ConfigError, SinkError, SourceError, StabilizeError};
use crate::frame::Frame;
use crate::io::{FrameSink, FrameSource, MemorySink, MemorySource, PreviewSignal, PreviewSurface};
use crate::motion::{project, MotionModel};
use crate::stabilizer::{StabilizedFrame, Stabilizer};
use crate::test_utils::{
    blob_texture, flat_frames, flat_source, poses_from_steps, translation, PoseCorrespondences,
};

const W: u32 = 64;
const H: u32 = 48;

fn config(options: &[(&str, &str)]) -> StabilizeConfig {
    let mut all = vec![("output", "no")];
    all.extend_from_slice(options);
    StabilizeConfig::from_options(all).unwrap()
}

fn ground_truth(poses: Vec<Matrix3<f64>>) -> Arc<PoseCorrespondences> {
    Arc::new(PoseCorrespondences::on_grid(poses, W as f64, H as f64, 8, 6))
}

/// Run the stabilizer for `config` on flat frames with ground-truth motion.
fn stabilize_poses(config: &StabilizeConfig, poses: &[Matrix3<f64>]) -> Vec<StabilizedFrame> {
    let truth = ground_truth(poses.to_vec());
    let pipeline = Pipeline::new(config)
        .unwrap()
        .with_correspondence_source(truth.clone())
        .with_wobble_correspondence_source(truth);
    let mut stab = pipeline
        .build_stabilizer(Box::new(flat_source(poses.len(), W, H)))
        .unwrap();
    let mut out = Vec::new();
    while let Some(f) = stab.next_frame().unwrap() {
        out.push(f);
    }
    out
}

fn correction_x(frames: &[StabilizedFrame]) -> Vec<f64> {
    frames.iter().map(|f| f.correction[(0, 2)]).collect()
}

/// RMS of `values` after removing the least-squares line.
fn detrended_rms(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean_k = (n - 1.0) / 2.0;
    let mean_v = values.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (k, v) in values.iter().enumerate() {
        let dk = k as f64 - mean_k;
        sxy += dk * (v - mean_v);
        sxx += dk * dk;
    }
    let slope = sxy / sxx;
    let ss: f64 = values
        .iter()
        .enumerate()
        .map(|(k, v)| {
            let r = v - mean_v - slope * (k as f64 - mean_k);
            r * r
        })
        .sum();
    (ss / n).sqrt()
}

// ── Test doubles ───────────────────────────────────────────────────────────

struct CountingSource {
    inner: MemorySource,
    reads: Arc<AtomicUsize>,
}

impl FrameSource for CountingSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.next_frame()
    }
    fn frame_count(&self) -> Option<usize> {
        self.inner.frame_count()
    }
    fn fps(&self) -> Option<f64> {
        self.inner.fps()
    }
}

/// Yields its frames, then fails.
struct BrokenSource {
    frames: Vec<Frame>,
    next: usize,
}

impl FrameSource for BrokenSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let i = self.next;
        self.next += 1;
        match self.frames.get(i) {
            Some(f) => Ok(Some(f.clone())),
            None => Err(SourceError::Unavailable {
                index: i,
                reason: "truncated stream".to_string(),
            }),
        }
    }
    fn frame_count(&self) -> Option<usize> {
        None
    }
    fn fps(&self) -> Option<f64> {
        None
    }
}

/// Accepts `capacity` frames, then fails every write.
#[derive(Default)]
struct FullDisk {
    capacity: usize,
    written: usize,
    closed: bool,
    fail_close: bool,
}

impl FrameSink for FullDisk {
    fn open(&mut self, _: u32, _: u32, _: f64) -> Result<(), SinkError> {
        Ok(())
    }
    fn write(&mut self, _: &Frame) -> Result<(), SinkError> {
        if self.written >= self.capacity {
            return Err(SinkError::Create {
                path: "out".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.written += 1;
        Ok(())
    }
    fn close(&mut self) -> Result<(), SinkError> {
        self.closed = true;
        if self.fail_close {
            return Err(SinkError::NotOpen);
        }
        Ok(())
    }
}

/// Cancels after showing `after` frames, either by signal or through a token.
struct CancellingPreview {
    after: usize,
    shown: usize,
    token: Option<CancellationToken>,
}

impl PreviewSurface for CancellingPreview {
    fn show(&mut self, _: &Frame) -> PreviewSignal {
        self.shown += 1;
        if self.shown < self.after {
            return PreviewSignal::Continue;
        }
        match &self.token {
            Some(t) => {
                t.cancel();
                PreviewSignal::Continue
            }
            None => PreviewSignal::Cancel,
        }
    }
}

// ── Smoothing scenarios ────────────────────────────────────────────────────

#[test]
fn constant_motion_needs_no_correction_in_either_mode() {
    let poses = poses_from_steps(&[[2.0, -1.0]; 19]);
    for mode in ["one-pass", "two-pass"] {
        let c = config(&[("mode", mode), ("stab-radius", "5")]);
        let frames = stabilize_poses(&c, &poses);
        assert_eq!(frames.len(), 20);
        for f in &frames {
            assert!(f.correction[(0, 2)].abs() < 1e-6, "{}: {}", mode, f.correction);
            assert!(f.correction[(1, 2)].abs() < 1e-6, "{}: {}", mode, f.correction);
            assert!(!f.degraded);
        }
    }
}

#[test]
fn one_pass_correction_peaks_at_direction_reversal() {
    let mut steps = vec![[5.0, 0.0]; 5];
    steps.extend(vec![[-5.0, 0.0]; 4]);
    let poses = poses_from_steps(&steps);
    let c = config(&[("mode", "one-pass"), ("stab-radius", "3")]);
    let mags: Vec<f64> = correction_x(&stabilize_poses(&c, &poses))
        .iter()
        .map(|x| x.abs())
        .collect();
    assert_eq!(mags.len(), 10);

    let peak = (0..mags.len())
        .max_by(|&a, &b| mags[a].total_cmp(&mags[b]))
        .unwrap();
    assert!(peak == 5 || peak == 6, "peak at {} in {:?}", peak, mags);
    assert!(mags[peak] > 1.0);
    assert!(mags[0] < 1e-6);
    assert!(mags[9] < 0.25 * mags[peak], "{:?}", mags);
    assert!(
        mags[..=peak].windows(2).all(|p| p[1] >= p[0] - 1e-9),
        "rise not monotone: {:?}",
        mags
    );
    assert!(
        mags[peak..].windows(2).all(|p| p[1] <= p[0] + 1e-9),
        "decay not monotone: {:?}",
        mags
    );
}

#[test]
fn two_pass_correction_is_centred_on_reversal() {
    let mut steps = vec![[5.0, 0.0]; 5];
    steps.extend(vec![[-5.0, 0.0]; 4]);
    let poses = poses_from_steps(&steps);
    let c = config(&[("stab-radius", "3"), ("est-trim", "no")]);
    let xs = correction_x(&stabilize_poses(&c, &poses));
    // The turning point overshoots the smoothed path and is pulled back.
    assert!(xs[5] < -5.0, "{:?}", xs);
    assert!(xs[4] > xs[5] && xs[6] > xs[5]);
    assert!(xs[0].abs() < 1e-6 && xs[9].abs() < 1e-6);
}

#[test]
fn wobble_suppression_removes_periodic_shear() {
    let n = 33;
    let cy = H as f64 / 2.0;
    // Bottom edge sways 2 px with period 4; zero at every keyframe.
    let shear = |k: usize| (std::f64::consts::FRAC_PI_2 * k as f64).sin() * 2.0 / (H as f64 - cy);
    let poses: Vec<Matrix3<f64>> = (0..n)
        .map(|k| {
            let a = shear(k);
            let sway = Matrix3::new(1.0, a, -a * cy, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
            translation(3.0 * k as f64, 0.0) * sway
        })
        .collect();

    let c = config(&[
        ("model", "trans"),
        ("subset", "auto"),
        ("stab-radius", "5"),
        ("wobble-suppress", "yes"),
        ("ws-period", "4"),
        ("ws-model", "affine"),
    ]);
    let frames = stabilize_poses(&c, &poses);
    assert_eq!(frames.len(), n);

    let pivot = [W as f64 / 2.0, H as f64];
    let raw: Vec<f64> = poses.iter().map(|p| project(p, pivot)[0]).collect();
    let fixed: Vec<f64> = frames
        .iter()
        .zip(&poses)
        .map(|(f, p)| project(&(f.transform * p), pivot)[0])
        .collect();

    let before = detrended_rms(&raw);
    let after = detrended_rms(&fixed);
    assert!(before > 1.0, "fixture lost its wobble: {}", before);
    assert!(after < 0.2 * before, "before {} after {}", before, after);
}

#[test]
fn tracked_jitter_is_smoothed_end_to_end() {
    let n = 16;
    let offsets: Vec<f64> = (0..n)
        .map(|k| 2.0 * k as f64 + if k % 2 == 0 { 1.5 } else { -1.5 })
        .collect();
    let frames: Vec<Frame> = offsets
        .iter()
        .enumerate()
        .map(|(k, &o)| Frame::new(k, blob_texture(96, 72, 21, [o, 0.0])))
        .collect();

    let c = config(&[("stab-radius", "4"), ("nkps", "300"), ("est-trim", "no")]);
    let pipeline = Pipeline::new(&c).unwrap();
    let mut stab = pipeline
        .build_stabilizer(Box::new(MemorySource::new(frames)))
        .unwrap();
    let mut out = Vec::new();
    while let Some(f) = stab.next_frame().unwrap() {
        out.push(f);
    }
    assert_eq!(out.len(), n);
    assert_eq!(stab.degraded_pairs(), 0);

    // Scene x = 0 seen through the corrected pose.
    let stabilized: Vec<f64> = out
        .iter()
        .zip(&offsets)
        .map(|(f, &o)| project(&(f.correction * translation(o, 0.0)), [0.0, 0.0])[0])
        .collect();
    let accel = |v: &[f64]| -> f64 {
        v.windows(3).map(|w| (w[2] - 2.0 * w[1] + w[0]).abs()).sum::<f64>() / (v.len() - 2) as f64
    };
    let before = accel(&offsets);
    let after = accel(&stabilized);
    assert!(after < 0.3 * before, "before {} after {}", before, after);
}

// ── Orchestration ──────────────────────────────────────────────────────────

#[test]
fn cancellation_leaves_exactly_k_frames() {
    let poses = poses_from_steps(&[[1.0, 0.0]; 11]);
    for mode in ["one-pass", "two-pass"] {
        for use_token in [false, true] {
            let c = config(&[("mode", mode)]);
            let token = CancellationToken::new();
            let pipeline = Pipeline::new(&c)
                .unwrap()
                .with_correspondence_source(ground_truth(poses.clone()))
                .with_cancellation(token.clone());
            let mut sink = MemorySink::new();
            let mut preview = CancellingPreview {
                after: 5,
                shown: 0,
                token: use_token.then(|| token.clone()),
            };
            let report = pipeline
                .run(
                    Box::new(flat_source(12, W, H)),
                    Some(&mut sink),
                    Some(&mut preview),
                )
                .unwrap();
            assert!(report.cancelled, "{} token={}", mode, use_token);
            assert_eq!(report.frames_processed, 5);
            assert_eq!(sink.frames().len(), 5);
            assert!(sink.is_closed());
            let indices: Vec<usize> = sink.frames().iter().map(|f| f.index()).collect();
            assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        }
    }
}

#[test]
fn invalid_configuration_fails_before_reading() {
    assert!(matches!(
        StabilizeConfig::from_options([("model", "spiral")]),
        Err(ConfigError::UnknownModel(_))
    ));

    let reads = Arc::new(AtomicUsize::new(0));
    let source = CountingSource {
        inner: flat_source(4, W, H),
        reads: reads.clone(),
    };
    let c = config(&[("mode", "one-pass"), ("wobble-suppress", "yes")]);
    let mut sink = MemorySink::new();
    let err = stabilize(&c, Box::new(source), Some(&mut sink)).unwrap_err();
    assert!(matches!(
        err,
        StabilizeError::Config(ConfigError::WobbleRequiresTwoPass)
    ));
    assert_eq!(reads.load(Ordering::SeqCst), 0);
    assert!(sink.opened_with().is_none());
}

#[test]
fn source_failure_closes_sink_and_reports_error() {
    let c = config(&[("mode", "one-pass")]);
    let pipeline = Pipeline::new(&c)
        .unwrap()
        .with_correspondence_source(ground_truth(vec![Matrix3::identity(); 3]));
    let mut sink = MemorySink::new();
    let source = BrokenSource {
        frames: flat_frames(3, W, H),
        next: 0,
    };
    let err = pipeline.run(Box::new(source), Some(&mut sink), None).unwrap_err();
    assert!(matches!(
        err,
        StabilizeError::Source(SourceError::Unavailable { index: 3, .. })
    ));
    assert_eq!(sink.frames().len(), 3);
    assert!(sink.is_closed());
}

#[test]
fn sink_failure_stops_run_without_preview() {
    let c = config(&[("mode", "one-pass")]);
    let pipeline = Pipeline::new(&c)
        .unwrap()
        .with_correspondence_source(ground_truth(vec![Matrix3::identity(); 8]));
    let reads = Arc::new(AtomicUsize::new(0));
    let source = CountingSource {
        inner: flat_source(8, W, H),
        reads: reads.clone(),
    };
    let mut sink = FullDisk {
        capacity: 2,
        ..Default::default()
    };
    let err = pipeline.run(Box::new(source), Some(&mut sink), None).unwrap_err();
    assert!(matches!(err, StabilizeError::Sink(_)));
    assert_eq!(sink.written, 2);
    assert!(sink.closed);
    assert_eq!(reads.load(Ordering::SeqCst), 3);
}

#[test]
fn write_error_wins_over_close_error() {
    for with_preview in [false, true] {
        let c = config(&[("mode", "one-pass")]);
        let pipeline = Pipeline::new(&c)
            .unwrap()
            .with_correspondence_source(ground_truth(vec![Matrix3::identity(); 6]));
        let mut sink = FullDisk {
            capacity: 1,
            fail_close: true,
            ..Default::default()
        };
        let mut preview = crate::io::HeadlessPreview::default();
        let preview: Option<&mut dyn PreviewSurface> = if with_preview {
            Some(&mut preview)
        } else {
            None
        };
        let err = pipeline
            .run(Box::new(flat_source(6, W, H)), Some(&mut sink), preview)
            .unwrap_err();
        assert!(
            matches!(err, StabilizeError::Sink(SinkError::Create { .. })),
            "{:?}",
            err
        );
        assert!(sink.closed);
    }
}

#[test]
fn sink_failure_keeps_preview_running() {
    let c = config(&[("mode", "one-pass")]);
    let pipeline = Pipeline::new(&c)
        .unwrap()
        .with_correspondence_source(ground_truth(vec![Matrix3::identity(); 8]));
    let mut sink = FullDisk {
        capacity: 2,
        ..Default::default()
    };
    let mut preview = crate::io::HeadlessPreview::default();
    let err = pipeline
        .run(
            Box::new(flat_source(8, W, H)),
            Some(&mut sink),
            Some(&mut preview),
        )
        .unwrap_err();
    assert!(matches!(err, StabilizeError::Sink(_)));
    assert_eq!(preview.shown(), 8);
    assert_eq!(sink.written, 2);
    assert!(sink.closed);
}

#[test]
fn output_fps_follows_source_unless_overridden() {
    let run = |c: &StabilizeConfig, source: MemorySource| {
        let mut sink = MemorySink::new();
        let report = Pipeline::new(c)
            .unwrap()
            .with_correspondence_source(ground_truth(vec![Matrix3::identity(); 3]))
            .run(Box::new(source), Some(&mut sink), None)
            .unwrap();
        (report, sink.opened_with())
    };

    let (report, opened) = run(&config(&[]), flat_source(3, W, H).with_fps(25.0));
    assert_eq!(report.output_fps, 25.0);
    assert_eq!(opened, Some((W, H, 25.0)));

    let (report, _) = run(&config(&[("output-fps", "12")]), flat_source(3, W, H).with_fps(25.0));
    assert_eq!(report.output_fps, 12.0);

    let (report, opened) = run(&config(&[]), flat_source(3, W, H));
    assert_eq!(report.output_fps, DEFAULT_FPS);
    assert_eq!(opened, Some((W, H, DEFAULT_FPS)));
    assert_eq!(report.frames_processed, 3);
    assert_eq!(report.frames_in_source, Some(3));
    assert!(!report.cancelled);
}

#[test]
fn untrackable_clip_degrades_to_passthrough() {
    // Flat frames give the keypoint tracker nothing to follow.
    let c = config(&[]);
    let mut sink = MemorySink::new();
    let report = stabilize(&c, Box::new(flat_source(5, 32, 24)), Some(&mut sink)).unwrap();
    assert_eq!(report.frames_processed, 5);
    assert_eq!(report.degraded_pairs, 4);
    assert_eq!(report.trim_ratio, 0.0);
    let input = flat_frames(5, 32, 24);
    for (a, b) in sink.frames().iter().zip(&input) {
        assert_eq!(a.image(), b.image());
    }
}

#[test]
fn deblur_reports_blur_estimates() {
    let poses = poses_from_steps(&[[1.0, 0.0]; 5]);
    let c = config(&[("deblur", "yes"), ("radius", "6")]);
    let frames = stabilize_poses(&c, &poses);
    assert_eq!(frames.len(), 6);
    assert!(frames.iter().all(|f| f.blur.is_some()));
}

#[test]
fn local_rejection_keeps_translation_threshold_for_other_models() {
    let auto = config(&[("model", "homography"), ("thresh", "auto"), ("local-outlier-rejection", "yes")]);
    assert_relative_eq!(
        super::run::local_rejection_threshold(&auto.estimator),
        MotionModel::Translation.default_inlier_threshold()
    );
    assert!(Pipeline::new(&auto).is_ok());

    let explicit = config(&[("model", "homography"), ("thresh", "2.5")]);
    assert_relative_eq!(super::run::local_rejection_threshold(&explicit.estimator), 2.5);
}

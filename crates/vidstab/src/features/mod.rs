//! Keypoint detection and frame-to-frame tracking.

mod corners;
mod lk;

use crate::frame::Frame;
use crate::motion::Correspondence;

use corners::CornerParams;
use lk::{LkParams, Pyramid};

/// Produces correspondences between consecutive frames.
///
/// Implementations must return an empty set, not a short one, when fewer
/// than the caller's minimum can be produced.
pub trait CorrespondenceSource: Send + Sync {
    fn correspondences(&self, prev: &Frame, curr: &Frame) -> Vec<Correspondence>;
}

/// Corner detector and tracker settings.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct KeypointTrackerConfig {
    /// Maximum corners detected in the earlier frame (`nkps`).
    pub max_keypoints: usize,
    /// Corner acceptance relative to the strongest response.
    pub quality_level: f32,
    /// Minimum distance between corners in pixels.
    pub min_distance: f32,
    /// Structure-tensor half window for corner scoring.
    pub block_radius: u32,
    /// Pyramid levels used for tracking.
    pub pyramid_levels: usize,
    /// Lucas–Kanade half window.
    pub window_radius: u32,
    pub max_iterations: usize,
    /// Convergence threshold in pixels.
    pub epsilon: f32,
    /// Tracks whose window is flatter than this are dropped.
    pub min_eigen: f32,
    /// Tracks whose mean absolute residual exceeds this (0..255 scale) are dropped.
    pub max_residual: f32,
}

impl Default for KeypointTrackerConfig {
    fn default() -> Self {
        Self {
            max_keypoints: 1000,
            quality_level: 0.01,
            min_distance: 3.0,
            block_radius: 1,
            pyramid_levels: 3,
            window_radius: 10,
            max_iterations: 20,
            epsilon: 0.01,
            min_eigen: 1e-2,
            max_residual: 24.0,
        }
    }
}

/// Shi–Tomasi corners tracked by pyramidal Lucas–Kanade.
#[derive(Debug, Clone)]
pub struct KeypointTracker {
    config: KeypointTrackerConfig,
    min_correspondences: usize,
}

impl KeypointTracker {
    pub fn new(config: KeypointTrackerConfig) -> Self {
        Self {
            config,
            min_correspondences: 1,
        }
    }

    /// Pairs yielding fewer tracks than this return an empty set.
    pub fn with_min_correspondences(mut self, n: usize) -> Self {
        self.min_correspondences = n.max(1);
        self
    }

    pub fn config(&self) -> &KeypointTrackerConfig {
        &self.config
    }
}

impl CorrespondenceSource for KeypointTracker {
    fn correspondences(&self, prev: &Frame, curr: &Frame) -> Vec<Correspondence> {
        let c = &self.config;
        let prev_gray = prev.to_gray();
        let curr_gray = curr.to_gray();

        let corners = corners::good_features(
            &prev_gray,
            &CornerParams {
                max_corners: c.max_keypoints,
                quality_level: c.quality_level,
                min_distance: c.min_distance,
                block_radius: c.block_radius,
                border: c.block_radius + 1,
            },
        );
        if corners.len() < self.min_correspondences {
            tracing::debug!(
                "frame {}: {} corners, need {}",
                prev.index(),
                corners.len(),
                self.min_correspondences
            );
            return Vec::new();
        }

        let min_size = 2 * c.window_radius + 1;
        let prev_pyr = Pyramid::build(&prev_gray, c.pyramid_levels, min_size);
        let curr_pyr = Pyramid::build(&curr_gray, c.pyramid_levels, min_size);
        let tracked = lk::track(
            &prev_pyr,
            &curr_pyr,
            &corners,
            &LkParams {
                window_radius: c.window_radius as i32,
                max_iterations: c.max_iterations,
                epsilon: c.epsilon,
                min_eigen: c.min_eigen,
                max_residual: c.max_residual,
            },
        );

        let out: Vec<Correspondence> = corners
            .iter()
            .zip(tracked)
            .filter_map(|(p, q)| {
                q.map(|q| {
                    Correspondence::new([p[0] as f64, p[1] as f64], [q[0] as f64, q[1] as f64])
                })
            })
            .collect();

        tracing::trace!(
            "frames {}→{}: {} corners, {} tracked",
            prev.index(),
            curr.index(),
            corners.len(),
            out.len()
        );
        if out.len() < self.min_correspondences {
            return Vec::new();
        }
        out
    }
}

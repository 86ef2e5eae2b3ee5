//! Video motion stabilization.
//!
//! Frames flow through these stages:
//!
//! 1. **Features** – corner detection and pyramidal Lucas–Kanade tracking
//!    produce point correspondences between consecutive frames.
//! 2. **Motion** – RANSAC fits a parametric motion model per frame pair, with
//!    an identity fallback when the pair cannot be estimated.
//! 3. **Trajectory** – frame-to-frame motions are chained into camera poses.
//! 4. **Stabilizer** – a causal (one-pass) or global (two-pass) Gaussian
//!    filter turns poses into per-frame corrections. Two-pass mode also
//!    estimates the border trim and can suppress rolling-shutter wobble.
//! 5. **Compositor** – optional deblurring, then warp, border fill and trim.
//!
//! [`pipeline::Pipeline`] wires the stages from a [`StabilizeConfig`] and
//! drains them into a [`io::FrameSink`] and an optional preview.

pub mod compositor;
pub mod deblur;
pub mod error;
pub mod features;
mod frame;
pub mod io;
pub mod motion;
pub mod pipeline;
pub mod stabilizer;
pub mod trajectory;
pub mod wobble;

#[cfg(test)]
mod test_utils;

pub use compositor::{BorderMode, Compositor};
pub use error::{ConfigError, SinkError, SourceError, StabilizeError};
pub use frame::Frame;
pub use motion::{Correspondence, MotionEstimate, MotionModel, RobustFitParams};
pub use pipeline::{stabilize, CancellationToken, Pipeline, RunReport, StabilizeConfig};
pub use stabilizer::{StabilizedFrame, Stabilizer, TrimPolicy};
pub use trajectory::Trajectory;

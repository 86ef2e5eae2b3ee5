//! Error taxonomy for the stabilization pipeline.
//!
//! Configuration problems are raised before any frame is read. Source and sink
//! failures carry the underlying I/O or codec error. Degraded motion estimates
//! are not errors and never appear here.

use std::path::PathBuf;

use crate::motion::MotionModel;

/// Invalid or inconsistent configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown motion model: {0}")]
    UnknownModel(String),
    #[error("unknown option: {0}")]
    UnknownOption(String),
    #[error("invalid value {value:?} for option {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("{name} = {value} is out of range (expected {expected})")]
    OutOfRange {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },
    #[error("subset size {subset} is below the minimum of {minimum} for model {model}")]
    SubsetTooSmall {
        model: MotionModel,
        subset: usize,
        minimum: usize,
    },
    #[error("wobble suppression requires two-pass mode")]
    WobbleRequiresTwoPass,
}

/// The frame source could not be opened or read.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("cannot open frame source {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("frame source {} contains no frames", .0.display())]
    Empty(PathBuf),
    #[error("cannot decode frame {index} ({}): {source}", .path.display())]
    Decode {
        index: usize,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("frame {index} unavailable: {reason}")]
    Unavailable { index: usize, reason: String },
    #[error("frame {index} is {got:?}, expected {expected:?}")]
    SizeMismatch {
        index: usize,
        expected: (u32, u32),
        got: (u32, u32),
    },
}

/// The frame sink could not be opened or written.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("cannot create output {}: {source}", .path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write frame {index} to {}: {source}", .path.display())]
    Write {
        index: usize,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("cannot write manifest {}: {reason}", .path.display())]
    Manifest { path: PathBuf, reason: String },
    #[error("sink used before open")]
    NotOpen,
}

/// Top-level pipeline failure.
#[derive(Debug, thiserror::Error)]
pub enum StabilizeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

//! Frame sources, sinks and preview surfaces.

mod image_sequence;
mod memory;

pub use image_sequence::{ImageSequenceSink, ImageSequenceSource, SequenceManifest};
pub use memory::{MemorySink, MemorySource};

use crate::error::{SinkError, SourceError};
use crate::frame::Frame;

/// Finite ordered frame stream.
pub trait FrameSource: Send {
    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Total frames, when known up front.
    fn frame_count(&self) -> Option<usize>;

    /// Native frame rate, when known.
    fn fps(&self) -> Option<f64>;
}

/// Ordered frame consumer, opened lazily with the first frame's geometry.
pub trait FrameSink {
    fn open(&mut self, width: u32, height: u32, fps: f64) -> Result<(), SinkError>;
    fn write(&mut self, frame: &Frame) -> Result<(), SinkError>;
    fn close(&mut self) -> Result<(), SinkError>;
}

/// Returned by a preview after showing a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewSignal {
    Continue,
    Cancel,
}

/// Live display of the output stream.
pub trait PreviewSurface {
    fn show(&mut self, frame: &Frame) -> PreviewSignal;
}

/// Preview that displays nothing and logs progress.
#[derive(Debug, Default)]
pub struct HeadlessPreview {
    shown: usize,
}

impl HeadlessPreview {
    pub fn shown(&self) -> usize {
        self.shown
    }
}

impl PreviewSurface for HeadlessPreview {
    fn show(&mut self, frame: &Frame) -> PreviewSignal {
        self.shown += 1;
        tracing::trace!("preview frame {}", frame.index());
        PreviewSignal::Continue
    }
}

use std::collections::VecDeque;

use crate::error::{SinkError, SourceError};
use crate::frame::Frame;

use super::{FrameSink, FrameSource};

/// Frames held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    frames: VecDeque<Frame>,
    total: usize,
    fps: Option<f64>,
}

impl MemorySource {
    pub fn new(frames: Vec<Frame>) -> Self {
        let total = frames.len();
        Self {
            frames: frames.into(),
            total,
            fps: None,
        }
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        Ok(self.frames.pop_front())
    }

    fn frame_count(&self) -> Option<usize> {
        Some(self.total)
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }
}

/// Collects written frames.
#[derive(Debug, Default)]
pub struct MemorySink {
    frames: Vec<Frame>,
    opened: Option<(u32, u32, f64)>,
    closed: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    /// `(width, height, fps)` passed to `open`, if it was called.
    pub fn opened_with(&self) -> Option<(u32, u32, f64)> {
        self.opened
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl FrameSink for MemorySink {
    fn open(&mut self, width: u32, height: u32, fps: f64) -> Result<(), SinkError> {
        self.opened = Some((width, height, fps));
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<(), SinkError> {
        if self.opened.is_none() || self.closed {
            return Err(SinkError::NotOpen);
        }
        self.frames.push(frame.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.closed = true;
        Ok(())
    }
}

use std::sync::Arc;

use image::{GrayImage, RgbImage};

/// One decoded video frame.
///
/// Pixel data is shared and never mutated; stages that transform a frame
/// produce a new one with [`Frame::with_image`].
#[derive(Debug, Clone)]
pub struct Frame {
    index: usize,
    image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(index: usize, image: RgbImage) -> Self {
        Self {
            index,
            image: Arc::new(image),
        }
    }

    /// Position of this frame in the source sequence.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Luma conversion used by the keypoint tracker and blur metrics.
    pub fn to_gray(&self) -> GrayImage {
        image::imageops::grayscale(self.image.as_ref())
    }

    /// A new frame with the same sequence index and different pixels.
    pub fn with_image(&self, image: RgbImage) -> Self {
        Self::new(self.index, image)
    }
}

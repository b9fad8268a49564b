//! Frame data structures for captured camera content

use image::RgbaImage;
use std::time::Instant;

/// A single frame grabbed from the video feed
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// RGBA pixels
    pub image: RgbaImage,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

impl CapturedFrame {
    /// Wrap an already decoded image
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            timestamp: Instant::now(),
        }
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// True when the frame has no pixels (camera still warming up)
    pub fn is_empty(&self) -> bool {
        let (w, h) = self.dimensions();
        w == 0 || h == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_frame() {
        let frame = CapturedFrame::new(RgbaImage::new(0, 10));
        assert!(frame.is_empty());
        assert!(!CapturedFrame::new(RgbaImage::new(4, 4)).is_empty());
    }
}

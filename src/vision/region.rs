//! Scan window extraction
//!
//! Cuts the centered scan window out of a camera frame and resamples it to a
//! fixed resolution. Zoom shrinks the source window while the output size
//! stays the same.

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::config::ScanFrameSpec;
use crate::error::ScanError;

/// Source rectangle of a crop, in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// An extracted scan window
#[derive(Debug, Clone)]
pub struct Region {
    /// Resampled crop at `spec.output_size()`
    pub image: RgbaImage,
    /// Where the crop came from
    pub source: CropRect,
}

/// Compute the centered crop for a frame. Zoom below 1.0 is treated as 1.0.
pub fn crop_rect(
    frame_size: (u32, u32),
    spec: &ScanFrameSpec,
    zoom: f32,
) -> Result<CropRect, ScanError> {
    let (frame_w, frame_h) = frame_size;
    if frame_w == 0 || frame_h == 0 {
        return Err(ScanError::InvalidFrame(format!(
            "frame is {}x{}",
            frame_w, frame_h
        )));
    }

    let zoom = if zoom.is_finite() { zoom.max(1.0) } else { 1.0 };
    let width = ((spec.width as f32 / zoom).round() as u32).min(frame_w);
    let height = ((spec.height as f32 / zoom).round() as u32).min(frame_h);
    if width == 0 || height == 0 {
        return Err(ScanError::InvalidFrame(format!(
            "crop collapsed to {}x{} at zoom {:.2}",
            width, height, zoom
        )));
    }

    Ok(CropRect {
        x: (frame_w - width) / 2,
        y: (frame_h - height) / 2,
        width,
        height,
    })
}

/// Extract the scan window from `frame`
pub fn extract(frame: &RgbaImage, spec: &ScanFrameSpec, zoom: f32) -> Result<Region, ScanError> {
    let rect = crop_rect(frame.dimensions(), spec, zoom)?;
    let (out_w, out_h) = spec.output_size();
    if out_w == 0 || out_h == 0 {
        return Err(ScanError::InvalidFrame("scan window has zero size".to_string()));
    }

    let crop = imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image();
    let image = if crop.dimensions() == (out_w, out_h) {
        crop
    } else {
        imageops::resize(&crop, out_w, out_h, FilterType::Triangle)
    };

    Ok(Region {
        image,
        source: rect,
    })
}

//! Image-sequence camera
//!
//! Serves still images as a video feed, round-robin. Used by the CLI to scan
//! photos and by tests as a deterministic frame source.

use async_trait::async_trait;
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, info};

use super::{CameraFacing, CameraProvider, CapturedFrame, DeviceCapabilities, FrameSource};
use crate::error::ScanError;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// Frame source backed by decoded images
pub struct ImageSequenceSource {
    frames: Vec<RgbaImage>,
    next: AtomicUsize,
    facing: CameraFacing,
    capabilities: DeviceCapabilities,
    stopped: AtomicBool,
}

impl ImageSequenceSource {
    pub fn from_frames(frames: Vec<RgbaImage>, facing: CameraFacing) -> Self {
        Self {
            frames,
            next: AtomicUsize::new(0),
            facing,
            capabilities: DeviceCapabilities::default(),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl FrameSource for ImageSequenceSource {
    fn current_frame(&self) -> Option<CapturedFrame> {
        if self.frames.is_empty() || self.is_stopped() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.frames.len();
        Some(CapturedFrame::new(self.frames[index].clone()))
    }

    fn facing(&self) -> CameraFacing {
        self.facing
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!("Image sequence stopped");
        }
    }
}

/// Opens an [`ImageSequenceSource`] from a file or a directory of images
pub struct ImageSequenceProvider {
    path: PathBuf,
    facing: CameraFacing,
}

impl ImageSequenceProvider {
    /// `facing` is the direction this "camera" reports; requests for any
    /// other specific facing fail so the fallback order can be exercised.
    pub fn new(path: impl Into<PathBuf>, facing: CameraFacing) -> Self {
        Self {
            path: path.into(),
            facing,
        }
    }
}

#[async_trait]
impl CameraProvider for ImageSequenceProvider {
    async fn open(&self, facing: CameraFacing) -> Result<Box<dyn FrameSource>, ScanError> {
        if facing != CameraFacing::Any && facing != self.facing {
            return Err(ScanError::CameraAcquisition(format!(
                "no {} camera",
                facing
            )));
        }

        let path = self.path.clone();
        let frames = tokio::task::spawn_blocking(move || load_frames(&path))
            .await
            .map_err(|e| ScanError::CameraAcquisition(e.to_string()))??;

        info!("Opened image sequence {:?} ({} frames)", self.path, frames.len());
        Ok(Box::new(ImageSequenceSource::from_frames(frames, self.facing)))
    }
}

/// Decode one image, or every image in a directory sorted by file name
pub fn load_frames(path: &Path) -> Result<Vec<RgbaImage>, ScanError> {
    let files = if path.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(path)
            .map_err(|e| ScanError::CameraAcquisition(format!("{}: {}", path.display(), e)))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_image(p))
            .collect();
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    let frames = files
        .iter()
        .map(|file| {
            image::open(file)
                .map(|img| img.to_rgba8())
                .map_err(|e| ScanError::CameraAcquisition(format!("{}: {}", file.display(), e)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if frames.is_empty() {
        return Err(ScanError::CameraAcquisition(format!(
            "no images in {}",
            path.display()
        )));
    }
    Ok(frames)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(value: u8) -> RgbaImage {
        RgbaImage::from_pixel(4, 4, Rgba([value, value, value, 255]))
    }

    #[test]
    fn test_frames_served_round_robin() {
        let source =
            ImageSequenceSource::from_frames(vec![solid(10), solid(20)], CameraFacing::Environment);

        let values: Vec<u8> = (0..5)
            .map(|_| source.current_frame().unwrap().image.get_pixel(0, 0)[0])
            .collect();
        assert_eq!(values, vec![10, 20, 10, 20, 10]);
    }

    #[test]
    fn test_stopped_source_has_no_frames() {
        let source = ImageSequenceSource::from_frames(vec![solid(1)], CameraFacing::User);
        source.stop();
        assert!(source.current_frame().is_none());
    }

    #[tokio::test]
    async fn test_open_directory() {
        let dir = tempfile::tempdir().unwrap();
        solid(200).save(dir.path().join("b.png")).unwrap();
        solid(100).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let provider = ImageSequenceProvider::new(dir.path(), CameraFacing::Environment);
        let source = provider.open(CameraFacing::Environment).await.unwrap();

        assert_eq!(source.current_frame().unwrap().image.get_pixel(0, 0)[0], 100);
        assert_eq!(source.current_frame().unwrap().image.get_pixel(0, 0)[0], 200);
    }

    #[tokio::test]
    async fn test_open_wrong_facing_fails() {
        let dir = tempfile::tempdir().unwrap();
        solid(1).save(dir.path().join("a.png")).unwrap();

        let provider = ImageSequenceProvider::new(dir.path(), CameraFacing::User);
        assert!(provider.open(CameraFacing::Environment).await.is_err());
        assert!(provider.open(CameraFacing::Any).await.is_ok());
    }

    #[tokio::test]
    async fn test_open_empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ImageSequenceProvider::new(dir.path(), CameraFacing::Any);
        let err = provider.open(CameraFacing::Any).await.err().unwrap();
        assert!(matches!(err, ScanError::CameraAcquisition(_)));
    }
}

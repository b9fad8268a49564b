//! Camera Capture Layer
//!
//! Abstracts the live video feed behind [`CameraProvider`] and
//! [`FrameSource`]. Acquisition prefers the environment-facing camera and
//! falls back to the user-facing one, then to any camera.

pub mod frame;
pub mod sequence;

pub use frame::CapturedFrame;
pub use sequence::{ImageSequenceProvider, ImageSequenceSource};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ScanError;

/// Which way the camera points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraFacing {
    /// Rear camera, pointing away from the user
    Environment,
    /// Front camera
    User,
    /// Whatever the device offers
    Any,
}

impl CameraFacing {
    /// Order in which facings are tried during acquisition
    pub const ACQUISITION_ORDER: [CameraFacing; 3] =
        [CameraFacing::Environment, CameraFacing::User, CameraFacing::Any];
}

impl std::fmt::Display for CameraFacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CameraFacing::Environment => "environment",
            CameraFacing::User => "user",
            CameraFacing::Any => "any",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for CameraFacing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "environment" | "rear" | "back" => Ok(CameraFacing::Environment),
            "user" | "front" => Ok(CameraFacing::User),
            "any" => Ok(CameraFacing::Any),
            other => Err(format!("unknown camera facing '{}'", other)),
        }
    }
}

/// Optional device features, probed once when the camera is opened
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceCapabilities {
    pub torch: bool,
    /// Hardware zoom range (min, max) when supported
    pub zoom: Option<(f32, f32)>,
    pub focus: bool,
    pub exposure: bool,
    pub white_balance: bool,
}

/// An open camera delivering frames
pub trait FrameSource: Send + Sync {
    /// Latest frame, `None` while the feed is not ready
    fn current_frame(&self) -> Option<CapturedFrame>;

    fn facing(&self) -> CameraFacing;

    fn capabilities(&self) -> &DeviceCapabilities;

    /// Switch the torch. Only called when [`DeviceCapabilities::torch`] is set.
    fn set_torch(&self, _on: bool) -> Result<(), ScanError> {
        Err(ScanError::CameraAcquisition("torch not supported".to_string()))
    }

    /// Release the device
    fn stop(&self);
}

/// Opens cameras by facing direction
#[async_trait]
pub trait CameraProvider: Send + Sync {
    async fn open(&self, facing: CameraFacing) -> Result<Box<dyn FrameSource>, ScanError>;
}

/// Open a camera, trying environment, user, then any.
///
/// Fails with [`ScanError::CameraAcquisition`] when every attempt fails.
pub async fn acquire_camera(
    provider: &dyn CameraProvider,
) -> Result<Box<dyn FrameSource>, ScanError> {
    let mut last_error = None;

    for facing in CameraFacing::ACQUISITION_ORDER {
        match provider.open(facing).await {
            Ok(source) => {
                info!(facing = %facing, "Camera acquired");
                log_capabilities(source.capabilities());
                return Ok(source);
            }
            Err(e) => {
                debug!(facing = %facing, "Camera open failed: {}", e);
                last_error = Some(e);
            }
        }
    }

    let reason = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no camera available".to_string());
    warn!("Camera acquisition failed: {}", reason);
    Err(ScanError::CameraAcquisition(reason))
}

/// Turn the torch on or off if the device supports it. Returns whether the
/// request was applied.
pub fn set_torch_if_supported(source: &dyn FrameSource, on: bool) -> bool {
    if !source.capabilities().torch {
        debug!("Torch not supported, ignoring");
        return false;
    }
    match source.set_torch(on) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to set torch: {}", e);
            false
        }
    }
}

fn log_capabilities(caps: &DeviceCapabilities) {
    debug!(
        torch = caps.torch,
        zoom = ?caps.zoom,
        focus = caps.focus,
        exposure = caps.exposure,
        white_balance = caps.white_balance,
        "Camera capabilities"
    );
}

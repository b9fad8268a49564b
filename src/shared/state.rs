//! Scanner status shared with readers outside the control loop

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::analysis::{DetectionEvent, DigitString};
use crate::capture::CameraFacing;
use crate::scanner::ScanState;
use crate::vision::OcrProfile;

/// Input method currently offered to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    #[default]
    Camera,
    Manual,
}

/// Snapshot of the scanner, updated by the runner after every event
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStatus {
    pub mode: ScanMode,
    pub state: ScanState,
    /// Id of the running session
    pub session_id: Option<Uuid>,
    /// Latest status line
    pub feedback: String,
    /// First reading awaiting confirmation
    pub pending: Option<DigitString>,
    /// Digits typed on the keypad so far
    pub keypad: String,
    pub profile: OcrProfile,
    pub zoom: f32,
    /// Facing of the open camera
    pub camera: Option<CameraFacing>,
    /// Cycles started since launch
    pub cycles: u64,
    /// Detections emitted since launch
    pub detections: u64,
    pub last_detection: Option<DetectionEvent>,
    /// Last error message (if any)
    pub last_error: Option<String>,
}

impl ScanStatus {
    /// Clear any error state
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Set an error message
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn is_scanning(&self) -> bool {
        self.state != ScanState::Idle
    }
}

/// Status behind a lock, cheap to clone
pub type SharedStatus = Arc<RwLock<ScanStatus>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_helpers() {
        let mut status = ScanStatus::default();
        status.set_error("camera lost");
        assert_eq!(status.last_error.as_deref(), Some("camera lost"));
        status.clear_error();
        assert!(status.last_error.is_none());
    }

    #[test]
    fn test_default_is_idle_camera_mode() {
        let status = ScanStatus::default();
        assert_eq!(status.mode, ScanMode::Camera);
        assert!(!status.is_scanning());
    }
}

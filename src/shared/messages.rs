//! Message types for communication with the scan runner

use std::sync::Arc;

use crate::analysis::{DetectionEvent, ValidNumberSet};
use crate::capture::CameraFacing;
use crate::config::PreprocessingOptions;
use crate::scanner::{KeypadKey, ScanState};
use crate::vision::{OcrProfile, Technique};

use super::state::ScanMode;

/// Commands sent to the scan runner
#[derive(Debug, Clone)]
pub enum ScanCommand {
    /// Open the camera and start scanning
    Start,
    /// Stop scanning and release the camera
    Stop,
    /// Release the current camera and open one with the given facing
    SwitchCamera(CameraFacing),
    SetProfile(OcrProfile),
    /// Digital zoom, clamped to >= 1.0
    SetZoom(f32),
    /// Options for the next cycle
    SetPreprocessing(PreprocessingOptions),
    SetTechnique(Technique),
    /// Ignored when the camera has no torch
    SetTorch(bool),
    /// Stop camera scanning in favour of keypad entry
    ManualMode,
    /// Validate a typed number
    SubmitManual(String),
    /// One key press on the manual entry keypad
    Keypad(KeypadKey),
    /// Swap in a reloaded valid number list
    SetNumbers(Arc<ValidNumberSet>),
    /// Stop everything and end the runner task
    Shutdown,
}

/// Updates published by the scan runner
#[derive(Debug, Clone)]
pub enum ScanUpdate {
    /// New status line for the user
    Feedback(String),
    /// An accepted number (camera or manual)
    Detected(DetectionEvent),
    StateChanged(ScanState),
    ModeChanged(ScanMode),
    /// Camera opened (`Some`) or released (`None`)
    CameraChanged(Option<CameraFacing>),
}

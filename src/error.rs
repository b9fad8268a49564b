//! Error taxonomy for the scanning core
//!
//! Every per-cycle failure is caught at the controller boundary and turned into
//! a feedback string. Only camera acquisition failures change the scan mode.

use std::time::Duration;

/// Errors raised inside the capture-recognize-verify pipeline
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScanError {
    /// Crop geometry collapsed to zero area
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// An advanced preprocessing step was replaced by a simpler one (non-fatal)
    #[error("preprocessing step '{step}' degraded: {reason}")]
    PreprocessingDegraded { step: &'static str, reason: String },

    /// recognize() did not finish inside the watchdog window
    #[error("OCR timed out after {0:?}")]
    OcrTimeout(Duration),

    /// The OCR engine failed during recognition
    #[error("OCR failed: {0}")]
    OcrFailure(String),

    /// No camera could be opened
    #[error("camera acquisition failed: {0}")]
    CameraAcquisition(String),

    /// Malformed input to the validator or manual entry
    #[error("invalid number format: {0:?}")]
    ValidationFormat(String),
}

impl ScanError {
    /// Human-readable status line shown to the user for this error
    pub fn feedback(&self) -> String {
        match self {
            ScanError::InvalidFrame(_) => "Camera frame not ready, retrying...".to_string(),
            ScanError::PreprocessingDegraded { .. } => "Scanning...".to_string(),
            ScanError::OcrTimeout(_) => "Scanning timed out, resuming...".to_string(),
            ScanError::OcrFailure(_) => "Error while scanning. Trying again...".to_string(),
            ScanError::CameraAcquisition(_) => {
                "Could not start the camera! Switched to manual entry.".to_string()
            }
            ScanError::ValidationFormat(input) => {
                format!("'{}' is not a valid number", input)
            }
        }
    }
}

impl From<image::ImageError> for ScanError {
    fn from(err: image::ImageError) -> Self {
        ScanError::OcrFailure(err.to_string())
    }
}

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        ScanError::OcrFailure(err.to_string())
    }
}

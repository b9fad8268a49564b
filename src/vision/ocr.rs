//! OCR engine seam
//!
//! Defines the recognizer interface, the parameter profiles it is configured
//! with, and a guard that shuts the engine down on every exit path.

use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::ScanError;

/// Characters the recognizer may produce
pub const DIGIT_WHITELIST: &str = "0123456789";

/// Named parameter bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrProfile {
    /// Single pass, single line
    Fast,
    #[default]
    Balanced,
    /// Several passes, block segmentation first
    Accurate,
}

impl OcrProfile {
    /// Baseline parameters for this profile
    pub fn parameters(self) -> OcrParameters {
        match self {
            OcrProfile::Fast => OcrParameters {
                page_seg_mode: 7,
                engine_mode: 1,
                passes: 1,
                min_confidence: 0.0,
                whitelist: DIGIT_WHITELIST.to_string(),
            },
            OcrProfile::Balanced => OcrParameters {
                page_seg_mode: 7,
                engine_mode: 1,
                passes: 2,
                min_confidence: 0.6,
                whitelist: DIGIT_WHITELIST.to_string(),
            },
            OcrProfile::Accurate => OcrParameters {
                page_seg_mode: 6,
                engine_mode: 1,
                passes: 3,
                min_confidence: 0.75,
                whitelist: DIGIT_WHITELIST.to_string(),
            },
        }
    }
}

impl std::str::FromStr for OcrProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(OcrProfile::Fast),
            "balanced" => Ok(OcrProfile::Balanced),
            "accurate" => Ok(OcrProfile::Accurate),
            other => Err(format!("unknown OCR profile '{}'", other)),
        }
    }
}

/// Full engine parameter set. `configure` always replaces all of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrParameters {
    /// Tesseract page segmentation mode (6 = block, 7 = single line)
    pub page_seg_mode: u8,
    /// Tesseract engine mode (1 = LSTM only)
    pub engine_mode: u8,
    /// Maximum recognition attempts per bitmap
    pub passes: u8,
    /// Confidence (0.0 - 1.0) at which further passes are skipped
    pub min_confidence: f32,
    pub whitelist: String,
}

impl OcrParameters {
    /// Layer explicit overrides on top of these parameters
    pub fn with_overrides(mut self, overrides: &OcrOverrides) -> Self {
        if let Some(psm) = overrides.page_seg_mode {
            self.page_seg_mode = psm;
        }
        if let Some(oem) = overrides.engine_mode {
            self.engine_mode = oem;
        }
        if let Some(passes) = overrides.passes {
            self.passes = passes.max(1);
        }
        if let Some(conf) = overrides.min_confidence {
            self.min_confidence = conf.clamp(0.0, 1.0);
        }
        if let Some(whitelist) = &overrides.whitelist {
            self.whitelist = whitelist.clone();
        }
        self
    }
}

/// Optional per-parameter overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_seg_mode: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_mode: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passes: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<String>,
}

/// Recognized text of one bitmap
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrOutput {
    pub text: String,
    /// Mean word confidence (0.0 - 1.0)
    pub confidence: f32,
}

/// A stateful recognizer
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Replace the parameter set with `profile` plus `overrides`. Idempotent.
    fn configure(&mut self, profile: OcrProfile, overrides: &OcrOverrides);

    /// Recognize the text in `image`
    async fn recognize(&self, image: &DynamicImage) -> Result<OcrOutput, ScanError>;

    /// Release engine resources. Later `recognize` calls fail.
    fn shutdown(&mut self);
}

/// Engine shared between the controller and in-flight cycles
pub type SharedEngine = Arc<Mutex<Box<dyn OcrEngine>>>;

/// Owns the shared engine and shuts it down when dropped
pub struct EngineGuard {
    engine: SharedEngine,
    shut_down: bool,
}

impl EngineGuard {
    pub fn new(engine: Box<dyn OcrEngine>) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            shut_down: false,
        }
    }

    /// Handle for cycle tasks
    pub fn shared(&self) -> SharedEngine {
        Arc::clone(&self.engine)
    }

    /// Shut down, waiting for any in-flight recognition to finish
    pub async fn shutdown(mut self) {
        self.engine.lock().await.shutdown();
        self.shut_down = true;
        debug!("OCR engine shut down");
    }
}

impl Drop for EngineGuard {
    fn drop(&mut self) {
        if self.shut_down {
            return;
        }
        match self.engine.try_lock() {
            Ok(mut engine) => {
                engine.shutdown();
                debug!("OCR engine shut down on drop");
            }
            Err(_) => warn!("OCR engine busy while dropping guard, skipping shutdown"),
        }
    }
}

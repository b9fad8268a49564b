//! Application Configuration
//!
//! Scanner settings stored in TOML format. Every section falls back to its
//! defaults when missing from the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::vision::ocr::{OcrOverrides, OcrProfile};
use crate::vision::preprocess::{PreprocessBackend, Technique};

/// Lower bounds for scan loop timing
const MIN_TICK_INTERVAL_MS: u64 = 50;
const MIN_CONFIRM_DELAY_MS: u64 = 50;
const MIN_WATCHDOG_MS: u64 = 1000;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Timing of the scan loop
    pub scan: ScanSettings,
    /// Scan window geometry
    pub frame: ScanFrameSpec,
    /// Image preprocessing before OCR
    pub preprocessing: PreprocessingSettings,
    /// OCR engine settings
    pub ocr: OcrSettings,
    /// Valid number list
    pub numbers: NumberListSettings,
}

impl AppConfig {
    /// Clamp values that may have been written out of range by hand
    pub fn sanitized(mut self) -> Self {
        self.scan.zoom = self.scan.zoom.max(1.0);
        self.scan.tick_interval_ms = self.scan.tick_interval_ms.max(MIN_TICK_INTERVAL_MS);
        self.scan.confirm_delay_ms = self.scan.confirm_delay_ms.max(MIN_CONFIRM_DELAY_MS);
        self.scan.watchdog_ms = self.scan.watchdog_ms.max(MIN_WATCHDOG_MS);
        self.frame = self.frame.sanitized();
        self.preprocessing.options = self.preprocessing.options.clamped();
        self
    }
}

/// Scan loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Interval between capture ticks
    pub tick_interval_ms: u64,
    /// Delay before the confirmation re-check
    pub confirm_delay_ms: u64,
    /// Pause after an accepted detection
    pub cooldown_ms: u64,
    /// Maximum time a single cycle may hold the processing lock
    pub watchdog_ms: u64,
    /// Digital zoom factor (>= 1.0)
    pub zoom: f32,
}

impl ScanSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn confirm_delay(&self) -> Duration {
        Duration::from_millis(self.confirm_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            confirm_delay_ms: 300,
            cooldown_ms: 2000,
            watchdog_ms: 8000,
            zoom: 1.0,
        }
    }
}

/// Size of the scan window in logical pixels, plus the oversampling factor
/// applied when the crop is resampled
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanFrameSpec {
    pub width: u32,
    pub height: u32,
    pub pixel_density: f32,
}

impl ScanFrameSpec {
    /// Output resolution of an extracted region
    pub fn output_size(&self) -> (u32, u32) {
        let density = self.pixel_density.max(1.0);
        (
            (self.width as f32 * density).round() as u32,
            (self.height as f32 * density).round() as u32,
        )
    }

    fn sanitized(mut self) -> Self {
        self.pixel_density = self.pixel_density.clamp(1.0, 4.0);
        self
    }
}

impl Default for ScanFrameSpec {
    fn default() -> Self {
        Self {
            width: 280,
            height: 100,
            pixel_density: 2.0,
        }
    }
}

/// Preprocessing section: technique, tier and filter options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingSettings {
    pub technique: Technique,
    pub backend: PreprocessBackend,
    pub options: PreprocessingOptions,
}

/// Filter parameters for one preprocessing pass.
///
/// Fields are only changed through the setters, which clamp to the supported
/// range. A pass reads an immutable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingOptions {
    contrast: f32,
    brightness: f32,
    gamma: f32,
    denoising_strength: u32,
    dilation_size: u32,
    rotation_angle: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    threshold: Option<u8>,
    block_radius: u32,
    min_contour_area: f32,
    invert: bool,
    sharpen: bool,
    auto_deskew: bool,
    edge_enhance: bool,
}

impl Default for PreprocessingOptions {
    fn default() -> Self {
        Self {
            contrast: 1.5,
            brightness: 0.0,
            gamma: 1.0,
            denoising_strength: 1,
            dilation_size: 0,
            rotation_angle: 0.0,
            threshold: None,
            block_radius: 15,
            min_contour_area: 20.0,
            invert: false,
            sharpen: false,
            auto_deskew: false,
            edge_enhance: false,
        }
    }
}

impl PreprocessingOptions {
    /// Contrast multiplier around mid-gray
    pub fn contrast(&self) -> f32 {
        self.contrast
    }

    /// Brightness offset added after the contrast remap
    pub fn brightness(&self) -> f32 {
        self.brightness
    }

    pub fn gamma(&self) -> f32 {
        self.gamma
    }

    /// Median filter radius; 0 disables denoising
    pub fn denoising_strength(&self) -> u32 {
        self.denoising_strength
    }

    /// Dilation radius applied to dark strokes; 0 disables it
    pub fn dilation_size(&self) -> u32 {
        self.dilation_size
    }

    /// Fixed rotation in degrees, ignored when auto-deskew is on
    pub fn rotation_angle(&self) -> f32 {
        self.rotation_angle
    }

    /// Global threshold level, `None` means Otsu
    pub fn threshold(&self) -> Option<u8> {
        self.threshold
    }

    /// Neighbourhood radius of the adaptive threshold
    pub fn block_radius(&self) -> u32 {
        self.block_radius
    }

    /// Contours smaller than this are dropped as speckle
    pub fn min_contour_area(&self) -> f32 {
        self.min_contour_area
    }

    pub fn invert(&self) -> bool {
        self.invert
    }

    pub fn sharpen(&self) -> bool {
        self.sharpen
    }

    pub fn auto_deskew(&self) -> bool {
        self.auto_deskew
    }

    pub fn edge_enhance(&self) -> bool {
        self.edge_enhance
    }

    pub fn set_contrast(&mut self, value: f32) -> &mut Self {
        self.contrast = value.clamp(0.1, 5.0);
        self
    }

    pub fn set_brightness(&mut self, value: f32) -> &mut Self {
        self.brightness = value.clamp(-128.0, 128.0);
        self
    }

    pub fn set_gamma(&mut self, value: f32) -> &mut Self {
        self.gamma = value.clamp(0.1, 5.0);
        self
    }

    pub fn set_denoising_strength(&mut self, value: u32) -> &mut Self {
        self.denoising_strength = value.min(5);
        self
    }

    pub fn set_dilation_size(&mut self, value: u32) -> &mut Self {
        self.dilation_size = value.min(5);
        self
    }

    pub fn set_rotation_angle(&mut self, degrees: f32) -> &mut Self {
        self.rotation_angle = degrees.clamp(-45.0, 45.0);
        self
    }

    pub fn set_threshold(&mut self, level: Option<u8>) -> &mut Self {
        self.threshold = level;
        self
    }

    pub fn set_block_radius(&mut self, value: u32) -> &mut Self {
        self.block_radius = value.clamp(1, 64);
        self
    }

    pub fn set_min_contour_area(&mut self, value: f32) -> &mut Self {
        self.min_contour_area = value.max(0.0);
        self
    }

    pub fn set_invert(&mut self, on: bool) -> &mut Self {
        self.invert = on;
        self
    }

    pub fn set_sharpen(&mut self, on: bool) -> &mut Self {
        self.sharpen = on;
        self
    }

    pub fn set_auto_deskew(&mut self, on: bool) -> &mut Self {
        self.auto_deskew = on;
        self
    }

    pub fn set_edge_enhance(&mut self, on: bool) -> &mut Self {
        self.edge_enhance = on;
        self
    }

    /// Re-apply every setter so hand-edited values end up in range
    pub fn clamped(self) -> Self {
        let mut out = self.clone();
        out.set_contrast(self.contrast)
            .set_brightness(self.brightness)
            .set_gamma(self.gamma)
            .set_denoising_strength(self.denoising_strength)
            .set_dilation_size(self.dilation_size)
            .set_rotation_angle(self.rotation_angle)
            .set_block_radius(self.block_radius)
            .set_min_contour_area(self.min_contour_area);
        out
    }
}

/// OCR engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Parameter bundle to start with
    pub profile: OcrProfile,
    /// Path or name of the tesseract executable
    pub tesseract_path: String,
    /// Tesseract language code
    pub language: String,
    /// Per-parameter overrides layered on the profile
    pub overrides: OcrOverrides,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            profile: OcrProfile::default(),
            tesseract_path: "tesseract".to_string(),
            language: "eng".to_string(),
            overrides: OcrOverrides::default(),
        }
    }
}

/// Where the valid number list comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NumberListSettings {
    /// Text file with one number per line; defaults to the data dir
    pub list_path: Option<PathBuf>,
    /// Supplement sparse lists with the built-in numbers
    pub fallback_when_sparse: bool,
}

impl NumberListSettings {
    /// Configured list path, or `numbers.txt` in the data directory
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match &self.list_path {
            Some(path) => Ok(path.clone()),
            None => Ok(crate::storage::get_data_dir()?.join("numbers.txt")),
        }
    }
}

impl Default for NumberListSettings {
    fn default() -> Self {
        Self {
            list_path: None,
            fallback_when_sparse: true,
        }
    }
}

/// Default config file location
pub fn default_config_path() -> Result<PathBuf> {
    Ok(crate::storage::get_config_dir()?.join("config.toml"))
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    debug!("Loaded config from {:?}", path);
    Ok(config.sanitized())
}

/// Load configuration, using defaults when the file does not exist
pub fn load_or_default(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        info!("No config at {:?}, using defaults", path);
        return Ok(AppConfig::default());
    }
    load_config(path)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file {}", path.display()))?;
    Ok(())
}

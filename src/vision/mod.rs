//! Vision/OCR Layer
//!
//! Turns camera frames into candidate text:
//! - scan window extraction with digital zoom
//! - preprocessing (advanced `imageproc` chain with a baseline fallback)
//! - OCR behind the [`OcrEngine`] seam, with a Tesseract adapter

pub mod ocr;
pub mod preprocess;
pub mod region;
pub mod tesseract;

pub use ocr::{
    EngineGuard, OcrEngine, OcrOutput, OcrOverrides, OcrParameters, OcrProfile, SharedEngine,
};
pub use preprocess::{ImagePreprocessor, PreprocessBackend, Processed, Technique};
pub use region::{extract, CropRect, Region};
pub use tesseract::TesseractEngine;

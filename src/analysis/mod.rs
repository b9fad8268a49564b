//! Analysis of OCR output
//!
//! Extracts candidate numbers from recognized text, checks them against the
//! valid set and broadcasts accepted detections.

pub mod digits;
pub mod events;
pub mod validation;

pub use digits::{extract_best, DigitString, DIGIT_WIDTH};
pub use events::{DetectionEvent, DetectionSource, EventEmitter};
pub use validation::ValidNumberSet;

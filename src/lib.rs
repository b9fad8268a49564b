//! Duck Scanner - reads 4-digit duck numbers from a camera feed
//!
//! Frames are cropped to the scan frame, preprocessed, passed to an OCR
//! engine and confirmed by a second reading before a number is accepted and
//! checked against the valid list.

pub mod analysis;
pub mod capture;
pub mod config;
pub mod error;
pub mod scanner;
pub mod shared;
pub mod storage;
pub mod vision;

pub use error::ScanError;

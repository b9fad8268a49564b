//! Capture, recognize and verify
//!
//! [`ScanController`] is the pure state machine, [`ScanRunner`] drives it with
//! tokio timers and pipeline tasks, and [`ManualEntry`] covers keypad input
//! when no camera is available.

pub mod controller;
pub mod manual;
pub mod runner;
pub mod session;

pub use controller::{Action, ControllerEvent, ScanController, ScanTimings};
pub use manual::{check_manual, KeypadKey, ManualEntry};
pub use runner::{ScanHandle, ScanRunner};
pub use session::{ScanSession, ScanState};

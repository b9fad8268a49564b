//! Shared state and messaging between the scan runner and its front ends
//!
//! Commands flow into the runner over a tokio channel, updates flow out to
//! crossbeam subscribers, and the latest status sits behind a lock.

pub mod messages;
pub mod state;

pub use messages::{ScanCommand, ScanUpdate};
pub use state::{ScanMode, ScanStatus, SharedStatus};

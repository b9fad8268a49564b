//! Scan session data and controller states

use serde::Serialize;
use std::time::Instant;
use uuid::Uuid;

use crate::analysis::DigitString;

/// Where the controller is in the capture-recognize-verify loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    /// Not scanning
    #[default]
    Idle,
    /// Waiting for the next tick
    Streaming,
    /// First recognition of a cycle in flight
    Capturing,
    /// Confirmation re-check in flight
    Verifying,
    /// Cooling down after an accepted number
    Paused,
}

/// One run of the scanner, from start to stop or manual switch
#[derive(Debug, Clone)]
pub struct ScanSession {
    pub id: Uuid,
    pub started_at: Instant,
    pub is_active: bool,
    pub is_paused: bool,
    /// At most one cycle in flight
    pub is_processing: bool,
    /// First reading awaiting confirmation
    pub pending_candidate: Option<DigitString>,
    pub last_feedback: String,
}

impl ScanSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Instant::now(),
            is_active: true,
            is_paused: false,
            is_processing: false,
            pending_candidate: None,
            last_feedback: String::new(),
        }
    }

    /// State derived from the session flags
    pub fn state(&self) -> ScanState {
        if !self.is_active {
            ScanState::Idle
        } else if self.is_paused {
            ScanState::Paused
        } else if self.is_processing && self.pending_candidate.is_some() {
            ScanState::Verifying
        } else if self.is_processing {
            ScanState::Capturing
        } else {
            ScanState::Streaming
        }
    }
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_follows_flags() {
        let mut session = ScanSession::new();
        assert_eq!(session.state(), ScanState::Streaming);

        session.is_processing = true;
        assert_eq!(session.state(), ScanState::Capturing);

        session.pending_candidate = DigitString::normalize("1234");
        assert_eq!(session.state(), ScanState::Verifying);

        session.is_processing = false;
        session.pending_candidate = None;
        session.is_paused = true;
        assert_eq!(session.state(), ScanState::Paused);

        session.is_active = false;
        assert_eq!(session.state(), ScanState::Idle);
    }

    #[test]
    fn test_sessions_get_unique_ids() {
        assert_ne!(ScanSession::new().id, ScanSession::new().id);
    }
}

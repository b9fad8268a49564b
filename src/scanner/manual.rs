//! Manual number entry
//!
//! Keypad buffer for typing a number when the camera is unavailable. A
//! completed entry is validated exactly like a camera detection.

use crate::analysis::{DetectionEvent, DetectionSource, DigitString, ValidNumberSet, DIGIT_WIDTH};
use crate::error::ScanError;

/// Validate typed input: 1 to 4 digits, left-padded before the lookup
pub fn check_manual(
    input: &str,
    numbers: &ValidNumberSet,
) -> Result<DetectionEvent, ScanError> {
    let input = input.trim();
    if input.is_empty() || input.len() > DIGIT_WIDTH {
        return Err(ScanError::ValidationFormat(input.to_string()));
    }
    let number = DigitString::normalize(input)
        .ok_or_else(|| ScanError::ValidationFormat(input.to_string()))?;

    let is_valid = numbers.is_valid(&number);
    Ok(DetectionEvent::new(number, is_valid, DetectionSource::Manual))
}

/// A key on the manual entry keypad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeypadKey {
    Digit(char),
    Backspace,
    Clear,
    /// Check whatever has been typed, padding short input
    Submit,
}

/// Digits typed so far on the keypad
#[derive(Debug, Clone, Default)]
pub struct ManualEntry {
    buffer: String,
}

impl ManualEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Append a digit. Ignored when it is not a digit or the buffer is full.
    pub fn push_digit(&mut self, digit: char) -> bool {
        if !digit.is_ascii_digit() || self.buffer.len() >= DIGIT_WIDTH {
            return false;
        }
        self.buffer.push(digit);
        true
    }

    pub fn is_complete(&self) -> bool {
        self.buffer.len() == DIGIT_WIDTH
    }

    /// Append a digit and check the entry as soon as it is complete
    pub fn push_and_check(
        &mut self,
        digit: char,
        numbers: &ValidNumberSet,
    ) -> Option<DetectionEvent> {
        if !self.push_digit(digit) || !self.is_complete() {
            return None;
        }
        self.submit(numbers).ok()
    }

    /// Apply one key press. Returns the event when the entry was checked.
    pub fn press(
        &mut self,
        key: KeypadKey,
        numbers: &ValidNumberSet,
    ) -> Option<Result<DetectionEvent, ScanError>> {
        match key {
            KeypadKey::Digit(digit) => self.push_and_check(digit, numbers).map(Ok),
            KeypadKey::Backspace => {
                self.backspace();
                None
            }
            KeypadKey::Clear => {
                self.clear();
                None
            }
            KeypadKey::Submit => Some(self.submit(numbers)),
        }
    }

    pub fn backspace(&mut self) {
        self.buffer.pop();
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Validate the buffer. The buffer is cleared once an event is produced.
    pub fn submit(&mut self, numbers: &ValidNumberSet) -> Result<DetectionEvent, ScanError> {
        let event = check_manual(&self.buffer, numbers)?;
        self.buffer.clear();
        Ok(event)
    }
}

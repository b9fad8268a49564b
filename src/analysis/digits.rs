//! Digit run extraction and normalization
//!
//! Turns free OCR text into a fixed-width candidate number.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::error::ScanError;

/// Number of digits in a duck number
pub const DIGIT_WIDTH: usize = 4;

static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9]+").expect("digit run pattern is valid")
});

/// A normalized candidate: always exactly [`DIGIT_WIDTH`] ASCII digits
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DigitString(String);

impl DigitString {
    /// Normalize a run of digits to the fixed width.
    ///
    /// Longer runs keep their last digits (leading noise is more common than
    /// trailing noise), shorter runs are left-padded with zeros.
    /// Returns `None` for empty input or anything that is not all digits.
    pub fn normalize(run: &str) -> Option<Self> {
        if run.is_empty() || !run.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let normalized = if run.len() > DIGIT_WIDTH {
            run[run.len() - DIGIT_WIDTH..].to_string()
        } else {
            format!("{:0>width$}", run, width = DIGIT_WIDTH)
        };

        Some(Self(normalized))
    }

    /// Parse a string that must already be exactly [`DIGIT_WIDTH`] digits
    pub fn parse_exact(value: &str) -> Result<Self, ScanError> {
        if value.len() == DIGIT_WIDTH && value.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(value.to_string()))
        } else {
            Err(ScanError::ValidationFormat(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the digits
    pub fn value(&self) -> u32 {
        // Four ASCII digits always fit
        self.0.bytes().fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'))
    }
}

impl fmt::Display for DigitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DigitString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DigitString {
    type Error = ScanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_exact(&value)
    }
}

impl From<DigitString> for String {
    fn from(value: DigitString) -> Self {
        value.0
    }
}

/// All maximal digit runs in `text`, in order of appearance
pub fn digit_runs(text: &str) -> Vec<&str> {
    DIGIT_RUN.find_iter(text).map(|m| m.as_str()).collect()
}

/// Pick the best candidate number from OCR text.
///
/// Priority:
/// 1. the first run whose original length is exactly [`DIGIT_WIDTH`]
/// 2. otherwise the longest normalized run, first seen on ties
pub fn extract_best(text: &str) -> Option<DigitString> {
    let runs = digit_runs(text);
    if runs.is_empty() {
        return None;
    }

    if let Some(exact) = runs.iter().find(|run| run.len() == DIGIT_WIDTH) {
        return DigitString::normalize(exact);
    }

    let mut best: Option<DigitString> = None;
    for run in runs {
        let Some(candidate) = DigitString::normalize(run) else {
            continue;
        };
        let longer = best
            .as_ref()
            .map(|b| candidate.as_str().len() > b.as_str().len())
            .unwrap_or(true);
        if longer {
            best = Some(candidate);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_long_run_keeps_trailing_digits() {
        for run in ["12345", "9876543", "000001234"] {
            let normalized = DigitString::normalize(run).unwrap();
            assert_eq!(normalized.as_str(), &run[run.len() - DIGIT_WIDTH..]);
        }
    }

    #[test]
    fn test_normalize_short_run_left_pads() {
        assert_eq!(DigitString::normalize("7").unwrap().as_str(), "0007");
        assert_eq!(DigitString::normalize("42").unwrap().as_str(), "0042");
        assert_eq!(DigitString::normalize("042").unwrap().as_str(), "0042");
    }

    #[test]
    fn test_normalize_exact_run_unchanged() {
        assert_eq!(DigitString::normalize("1234").unwrap().as_str(), "1234");
        assert_eq!(DigitString::normalize("0000").unwrap().as_str(), "0000");
    }

    #[test]
    fn test_normalize_rejects_non_digits() {
        assert!(DigitString::normalize("").is_none());
        assert!(DigitString::normalize("12a4").is_none());
        assert!(DigitString::normalize("١٢٣٤").is_none());
    }

    #[test]
    fn test_digit_runs() {
        assert_eq!(digit_runs("ab12 cd 3456x7"), vec!["12", "3456", "7"]);
        assert!(digit_runs("no digits here").is_empty());
    }

    #[test]
    fn test_extract_best_lone_four_digit_run_is_unchanged() {
        assert_eq!(extract_best("duck 0815 !").unwrap().as_str(), "0815");
        assert_eq!(extract_best("1234").unwrap().as_str(), "1234");
    }

    #[test]
    fn test_extract_best_prefers_exact_width_run() {
        // 12345 is longer, but 5678 has exactly four digits
        assert_eq!(extract_best("12345 5678").unwrap().as_str(), "5678");
        assert_eq!(extract_best("12 3456 7890").unwrap().as_str(), "3456");
    }

    #[test]
    fn test_extract_best_falls_back_to_longest_run() {
        assert_eq!(extract_best("7 042").unwrap().as_str(), "0042");
        assert_eq!(extract_best("123456").unwrap().as_str(), "3456");
        // Equal normalized length: first seen wins
        assert_eq!(extract_best("12 34").unwrap().as_str(), "0012");
    }

    #[test]
    fn test_extract_best_none_without_digits() {
        assert!(extract_best("").is_none());
        assert!(extract_best("O O L").is_none());
    }

    #[test]
    fn test_parse_exact() {
        assert!(DigitString::parse_exact("0042").is_ok());
        assert!(DigitString::parse_exact("42").is_err());
        assert!(DigitString::parse_exact("12345").is_err());
        assert!(DigitString::parse_exact("12a4").is_err());
    }

    #[test]
    fn test_value() {
        assert_eq!(DigitString::normalize("0042").unwrap().value(), 42);
        assert_eq!(DigitString::normalize("9999").unwrap().value(), 9999);
    }
}

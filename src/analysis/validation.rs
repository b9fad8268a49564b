//! Membership checks against the set of valid duck numbers

use std::collections::HashSet;

use super::digits::DigitString;

/// Read-mostly set of valid numbers.
///
/// Entries are stored as loaded, so the tolerant comparisons in
/// [`ValidNumberSet::is_valid`] still work when the source was not padded.
#[derive(Debug, Clone, Default)]
pub struct ValidNumberSet {
    entries: Vec<String>,
    exact: HashSet<String>,
}

impl ValidNumberSet {
    /// Build a set from raw entries, dropping duplicates in first-seen order
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for entry in entries {
            let entry = entry.into();
            if set.exact.insert(entry.clone()) {
                set.entries.push(entry);
            }
        }
        set
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in load order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// True when any entry matches `candidate` by direct equality,
    /// numeric equality, or trimmed case-insensitive equality.
    pub fn is_valid(&self, candidate: &DigitString) -> bool {
        if self.exact.contains(candidate.as_str()) {
            return true;
        }

        let value = u64::from(candidate.value());
        self.entries.iter().any(|entry| {
            numeric_value(entry) == Some(value)
                || entry.trim().eq_ignore_ascii_case(candidate.as_str())
        })
    }
}

/// Value of an all-digit entry, ignoring leading zeros
fn numeric_value(entry: &str) -> Option<u64> {
    let entry = entry.trim();
    if entry.is_empty() || !entry.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let significant = entry.trim_start_matches('0');
    if significant.is_empty() {
        return Some(0);
    }
    significant.parse().ok()
}

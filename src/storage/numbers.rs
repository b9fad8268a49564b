//! Valid number list
//!
//! Loads the externally supplied list of duck numbers and provides the
//! file-backed add/remove operations used by the admin commands.

use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::analysis::{DigitString, ValidNumberSet, DIGIT_WIDTH};

/// Numbers used when the list is missing or too sparse to be useful
pub const FALLBACK_NUMBERS: [&str; 6] = ["0001", "0002", "0003", "0123", "1234", "4321"];

/// Lists with fewer entries than this get the fallback numbers added
pub const MIN_LIST_LEN: usize = 5;

/// Parse delimited list text.
///
/// Accepts any line ending, splits on newlines and commas, trims, drops
/// empty entries, left-pads to the fixed width and removes duplicates while
/// keeping first-seen order.
pub fn parse_number_list(text: &str) -> Vec<String> {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut seen = std::collections::HashSet::new();
    text.split(['\n', ','])
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| format!("{:0>width$}", entry, width = DIGIT_WIDTH))
        .filter(|entry| seen.insert(entry.clone()))
        .collect()
}

/// Build the valid set from parsed entries, adding the fallback numbers
/// when the list is sparse
pub fn build_valid_set(mut entries: Vec<String>, fallback_when_sparse: bool) -> ValidNumberSet {
    if fallback_when_sparse && entries.len() < MIN_LIST_LEN {
        info!(
            "Number list has only {} entries, adding {} fallback numbers",
            entries.len(),
            FALLBACK_NUMBERS.len()
        );
        entries.extend(FALLBACK_NUMBERS.iter().map(|n| n.to_string()));
    }
    ValidNumberSet::new(entries)
}

/// Load the valid set from a file. An unreadable file yields the fallback set.
pub fn load_valid_numbers(path: &Path, fallback_when_sparse: bool) -> ValidNumberSet {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let entries = parse_number_list(&text);
            debug!("Loaded {} numbers from {:?}", entries.len(), path);
            build_valid_set(entries, fallback_when_sparse)
        }
        Err(e) => {
            warn!("Could not read number list {:?}: {}, using fallback numbers", path, e);
            ValidNumberSet::new(FALLBACK_NUMBERS)
        }
    }
}

/// Errors from the admin add/remove operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Input was not exactly four digits
    #[error("Invalid number format. Must be 4 digits.")]
    InvalidFormat(String),

    #[error("Number {0} already exists")]
    Duplicate(String),

    #[error("Number {0} not found")]
    NotFound(String),

    #[error("Number list unavailable: {0}")]
    Io(#[from] std::io::Error),
}

/// JSON body describing a store error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub error: String,
    pub code: u16,
}

impl StoreError {
    /// HTTP-style status code for the error
    pub fn code(&self) -> u16 {
        match self {
            StoreError::InvalidFormat(_) => 400,
            StoreError::Duplicate(_) => 409,
            StoreError::NotFound(_) => 404,
            StoreError::Io(_) => 500,
        }
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            error: self.to_string(),
            code: self.code(),
        }
    }

    /// Serialize the error payload to a JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.payload())
            .unwrap_or_else(|_| format!("{{\"error\":\"{}\",\"code\":{}}}", self, self.code()))
    }
}

/// File-backed list of valid numbers, one per line
#[derive(Debug, Clone)]
pub struct NumberStore {
    path: PathBuf,
}

impl NumberStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All numbers in file order. A missing file is an empty list.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(parse_number_list(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Append a number. Rejects anything but exactly four digits and
    /// numbers already in the list.
    pub fn add(&self, input: &str) -> Result<DigitString, StoreError> {
        let number = Self::parse(input)?;
        let mut numbers = self.list()?;
        if numbers.iter().any(|n| n == number.as_str()) {
            return Err(StoreError::Duplicate(number.to_string()));
        }

        numbers.push(number.to_string());
        self.write(&numbers)?;
        info!(number = %number, "Number added");
        Ok(number)
    }

    /// Remove a number. Rejects malformed input and numbers not in the list.
    pub fn remove(&self, input: &str) -> Result<DigitString, StoreError> {
        let number = Self::parse(input)?;
        let mut numbers = self.list()?;
        let before = numbers.len();
        numbers.retain(|n| n != number.as_str());
        if numbers.len() == before {
            return Err(StoreError::NotFound(number.to_string()));
        }

        self.write(&numbers)?;
        info!(number = %number, "Number removed");
        Ok(number)
    }

    fn parse(input: &str) -> Result<DigitString, StoreError> {
        DigitString::parse_exact(input.trim())
            .map_err(|_| StoreError::InvalidFormat(input.to_string()))
    }

    /// Replace the file contents through a temp file in the same directory
    fn write(&self, numbers: &[String]) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        for number in numbers {
            writeln!(tmp, "{}", number)?;
        }
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

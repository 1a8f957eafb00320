//! DAL configuration options.
//!
//! Each repository names a DAL and carries an ordered list of key/value
//! options that are handed to that driver once, at configuration time.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DalError, DalResult};

/// A typed option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// Integer value.
    Int(i64),
    /// String value (numbers given as strings are parsed on demand).
    Str(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Int(v) => write!(f, "{}", v),
            OptionValue::Str(s) => write!(f, "{}", s),
        }
    }
}

/// One key/value option of a DAL stanza.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigOption {
    /// Option key.
    pub key: String,
    /// Option value.
    pub value: OptionValue,
}

impl ConfigOption {
    /// Creates a string-valued option.
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: OptionValue::Str(value.to_string()),
        }
    }

    /// Creates an integer-valued option.
    pub fn int(key: &str, value: i64) -> Self {
        Self {
            key: key.to_string(),
            value: OptionValue::Int(value),
        }
    }

    /// Returns the value as a string, rendering integers in decimal.
    pub fn as_str(&self) -> String {
        self.value.to_string()
    }

    /// Returns the value as a signed integer.
    pub fn as_i64(&self) -> DalResult<i64> {
        match &self.value {
            OptionValue::Int(v) => Ok(*v),
            OptionValue::Str(s) => s.trim().parse::<i64>().map_err(|e| DalError::InvalidOption {
                key: self.key.clone(),
                reason: format!("'{}' is not an integer: {}", s, e),
            }),
        }
    }

    /// Returns the value as an unsigned 32-bit integer.
    pub fn as_u32(&self) -> DalResult<u32> {
        let v = self.as_i64()?;
        u32::try_from(v).map_err(|_| DalError::InvalidOption {
            key: self.key.clone(),
            reason: format!("{} is out of range", v),
        })
    }

    /// Like [`as_u32`](Self::as_u32) but rejects zero.
    pub fn as_nonzero_u32(&self) -> DalResult<u32> {
        match self.as_u32()? {
            0 => Err(DalError::InvalidOption {
                key: self.key.clone(),
                reason: "must be greater than 0".to_string(),
            }),
            v => Ok(v),
        }
    }
}

/// The DAL stanza of a repository: driver name plus its options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoDalConfig {
    /// Name of the driver (e.g. "POSIX", "MC", "FUZZY").
    pub dal: String,
    /// Options passed to the driver's configure step.
    #[serde(default)]
    pub options: Vec<ConfigOption>,
}

impl RepoDalConfig {
    /// Parses a stanza from JSON text.
    pub fn from_json(text: &str) -> DalResult<Self> {
        serde_json::from_str(text).map_err(|e| DalError::InvalidOption {
            key: "dal".to_string(),
            reason: e.to_string(),
        })
    }

    /// Reads a stanza from a JSON file.
    pub fn from_file(path: &Path) -> DalResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

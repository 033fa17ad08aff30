//! Line codec for replica-to-replica updates.
//!
//! Each propagated write travels as a single `key:value\n` line on its own
//! connection. A key or value containing `:` or a line break would not
//! survive the trip, and neither would whitespace the receiver trims off the
//! line. [`Update::validate`] refuses those before a write is applied.

use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

const SEPARATOR: char = ':';

/// Longest update line ingress buffers before dropping the connection.
pub const MAX_UPDATE_LENGTH: usize = 64 * 1024;

/// One replicated write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub key: String,
    pub value: String,
}

impl Update {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Builds an update that is known to survive [`Update::encode`] followed
    /// by [`parse_update`].
    pub fn try_new(key: impl Into<String>, value: impl Into<String>) -> Result<Self, ParseError> {
        let update = Self::new(key, value);
        update.validate()?;
        Ok(update)
    }

    /// Checks that the encoded line parses back to this exact update.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.key.is_empty() {
            return Err(ParseError::EmptyKey);
        }
        for (field, text) in [("key", &self.key), ("value", &self.value)] {
            if text.contains(SEPARATOR) {
                return Err(ParseError::Unencodable {
                    field,
                    reason: "contains ':'",
                });
            }
            if text.contains(['\n', '\r']) {
                return Err(ParseError::Unencodable {
                    field,
                    reason: "contains a line break",
                });
            }
        }
        if self.key.trim_start() != self.key {
            return Err(ParseError::Unencodable {
                field: "key",
                reason: "starts with whitespace",
            });
        }
        if self.value.trim_end() != self.value {
            return Err(ParseError::Unencodable {
                field: "value",
                reason: "ends with whitespace",
            });
        }
        Ok(())
    }

    /// Encodes the update as a newline-terminated `key:value` line.
    pub fn encode(&self) -> Vec<u8> {
        format!("{self}\n").into_bytes()
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.key, self.value)
    }
}

impl FromStr for Update {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_update(s)
    }
}

/// Parses one inbound line, ignoring surrounding whitespace.
///
/// The value may be empty; the key may not.
pub fn parse_update(line: &str) -> Result<Update, ParseError> {
    let trimmed = line.trim();
    let count = trimmed.matches(SEPARATOR).count();
    match count {
        0 => Err(ParseError::MissingSeparator),
        1 => {
            let (key, value) = trimmed
                .split_once(SEPARATOR)
                .ok_or(ParseError::MissingSeparator)?;
            if key.is_empty() {
                return Err(ParseError::EmptyKey);
            }
            Ok(Update::new(key, value))
        }
        count => Err(ParseError::TooManySeparators { count }),
    }
}

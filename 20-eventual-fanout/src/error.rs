//! Typed errors for the library surface.
//!
//! Application code (servers, clients, `main`) uses `anyhow`; these enums
//! cover the two places callers want to match on the failure.

use thiserror::Error;

use crate::papers::PaperId;

/// A `key:value` pair that is not a valid peer update line.
///
/// Ingress discards such lines and keeps reading the connection; local
/// writes that could not be encoded are refused before they are applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("update line has no ':' separator")]
    MissingSeparator,
    #[error("update line has {count} ':' separators, expected exactly one")]
    TooManySeparators { count: usize },
    #[error("update key is empty")]
    EmptyKey,
    #[error("update {field} cannot be sent as a line: {reason}")]
    Unencodable {
        field: &'static str,
        reason: &'static str,
    },
}

/// Failures surfaced by the paper service to its callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaperError {
    #[error("paper {0} not found")]
    NotFound(PaperId),
    #[error("paper {field} must not be empty")]
    EmptyField { field: &'static str },
}

//! Errors raised by core value types.

use thiserror::Error;

/// A string that does not parse as the named identifier type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid {kind} '{input}': {reason}")]
pub struct InvalidId {
    pub kind: &'static str,
    pub input: String,
    pub reason: String,
}

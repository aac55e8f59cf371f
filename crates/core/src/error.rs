//! Core error model.

use thiserror::Error;

/// Result type used when constructing or parsing core values.
pub type CoreResult<T> = Result<T, CoreError>;

/// Failure to build a core value (tag or identifier).
///
/// Ordering violations are not reported here: comparing two well-formed tags
/// never fails. Whether a tag is acceptable at a given point of a projection
/// session is decided by the checkpoint manager.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Stream-scoped tags require a non-empty stream name.
    #[error("stream name must not be empty")]
    EmptyStreamName,

    /// The textual form of a tag could not be parsed.
    #[error("malformed checkpoint tag '{input}': {reason}")]
    MalformedTag { input: String, reason: String },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl CoreError {
    pub fn malformed_tag(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedTag {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

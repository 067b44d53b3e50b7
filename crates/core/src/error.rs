//! Error types for the rosetta translation engine.

use thiserror::Error;

/// Primary error type for document translation operations.
///
/// Only `Parse` and `Io` are fatal for a whole task; the per-page and
/// per-unit variants are caught inside the pipeline and degrade gracefully.
/// `Cancelled` is a distinct terminal state, not a failure.
#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("cannot parse document: {0}")]
    Parse(String),

    #[error("malformed content stream on page {page}: {msg}")]
    MalformedStream { page: usize, msg: String },

    #[error("font embedding failed: {0}")]
    FontEmbed(String),

    #[error("translation unit failed: {0}")]
    TranslationUnit(String),

    #[error("layout detection failed: {0}")]
    Layout(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<lopdf::Error> for TranslateError {
    fn from(err: lopdf::Error) -> Self {
        TranslateError::Parse(err.to_string())
    }
}

/// Convenience Result type alias for TranslateError.
pub type Result<T> = std::result::Result<T, TranslateError>;

//! Decode error types.

use thiserror::Error;

/// Result type for decoding operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reading or decoding a MINFLUX record array.
///
/// A decode that returns any of these produced no table.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Memory mapping error.
    #[error("memory mapping error: {0}")]
    MmapError(String),

    /// Malformed header, dtype or payload.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// The iteration sub-array has a shape the decoder does not handle.
    #[error("unsupported iteration shape: {0}")]
    UnsupportedShape(String),

    /// A required structured field is absent.
    #[error("missing field: {0}")]
    MissingField(String),

    /// No iteration holds valid values for a field.
    #[error("no valid iteration found for field '{field}'")]
    NoValidIteration {
        /// Name of the field.
        field: &'static str,
    },

    /// No event matches the requested validity flag.
    #[error("no {} entries in file", validity_label(*.valid))]
    NoEntries {
        /// Validity flag that was requested.
        valid: bool,
    },

    /// File extension without a native decoder.
    #[error("unsupported file extension: {0}")]
    UnsupportedExtension(String),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] minflux_core::Error),
}

fn validity_label(valid: bool) -> &'static str {
    if valid {
        "valid"
    } else {
        "invalid"
    }
}

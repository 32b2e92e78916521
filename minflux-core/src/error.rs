//! Error types for minflux-core.

use thiserror::Error;

/// Result type alias for minflux operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types shared by the analysis crates.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// An operation received no usable values.
    #[error("input contains no values")]
    EmptyInput,

    /// A numeric parameter is outside its allowed domain.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Two parallel arrays differ in length.
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Reference length.
        expected: usize,
        /// Offending length.
        actual: usize,
    },

    /// A pixel write fell outside the output grid.
    #[error("pixel ({row}, {col}) outside {rows}x{cols} grid")]
    RenderIndex {
        /// Target row.
        row: isize,
        /// Target column.
        col: isize,
        /// Grid rows.
        rows: usize,
        /// Grid columns.
        cols: usize,
    },

    /// Unknown column name.
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

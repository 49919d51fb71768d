//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A column identifier could not be parsed.
    #[error("invalid column identifier '{0}'")]
    InvalidColumn(String),

    /// Pagination parameters are out of range.
    #[error("invalid pagination: {0}")]
    InvalidPagination(String),

    /// A value could not be converted to the requested shape.
    #[error("cannot read {actual} as {expected}")]
    ValueShape {
        expected: &'static str,
        actual: &'static str,
    },
}

//! Error types for the document layer.

use std::fmt;

/// Errors that can occur during document tree operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    /// The element ID is invalid or the element has been detached.
    InvalidElement,
    /// Attempted to append an element under its own descendant.
    CycleDetected,
    /// The document root cannot be detached.
    CannotDetachRoot,
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidElement => write!(f, "Invalid or detached element ID"),
            Self::CycleDetected => {
                write!(f, "Cannot append an element under its own descendant")
            }
            Self::CannotDetachRoot => write!(f, "The document root cannot be detached"),
        }
    }
}

impl std::error::Error for DocumentError {}

/// Result type for document operations.
pub type DocumentResult<T> = std::result::Result<T, DocumentError>;

//! Error types for the key-value stores
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Store Error Enum ==
/// Unified error type for both store backends.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Key not found in the store
    #[error("key not found")]
    NotFound,

    /// Positional iteration past the last entry
    #[error("position {0} is past the end of the store")]
    EndOfSequence(usize),

    /// Store is out of space and cannot admit the entry
    #[error("allocation failure: {0}")]
    AllocationFailure(String),

    /// Store name cannot be mapped to a region file
    #[error("invalid store name `{0}`")]
    InvalidName(String),

    /// Region file exists but is not a usable store
    #[error("region `{name}` is not a valid store: {reason}")]
    InvalidRegion { name: String, reason: String },

    /// Underlying filesystem or mapping failure
    #[error("region I/O error")]
    Io(#[from] std::io::Error),
}

// == Result Type Alias ==
/// Convenience Result type for the key-value stores.
pub type Result<T> = std::result::Result<T, StoreError>;

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(StoreError::NotFound.to_string(), "key not found");
        assert_eq!(
            StoreError::EndOfSequence(7).to_string(),
            "position 7 is past the end of the store"
        );
        assert_eq!(
            StoreError::InvalidName("a/b".to_string()).to_string(),
            "invalid store name `a/b`"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: StoreError = io.into();
        assert!(matches!(err, StoreError::Io(_)));
    }
}

//! Error taxonomy for portal operations.

use crate::PortalSize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PortalError {
    /// The wand selection does not describe a portal window
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    /// Linking two selections of different dimensions
    #[error("Origin and destination have different sizes ({origin} and {destination})")]
    DifferentSizes {
        origin: PortalSize,
        destination: PortalSize,
    },

    /// A persisted record could not be decoded
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The position is local but its world is not loaded
    #[error("World is not available: {0}")]
    WorldUnavailable(String),

    /// The caller broke a contract, e.g. asked for the block of an external position
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl PortalError {
    pub fn invalid_selection(msg: impl Into<String>) -> Self {
        Self::InvalidSelection(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Errors that should be reported back to whoever issued the command
    /// rather than treated as a bug in the caller.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::InvalidOperation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PortalError::DifferentSizes {
            origin: PortalSize::new(2.0, 3.0),
            destination: PortalSize::new(3.0, 3.0),
        };
        assert_eq!(
            err.to_string(),
            "Origin and destination have different sizes (2x3 and 3x3)"
        );

        let err = PortalError::invalid_operation("Cannot get the block of an external position");
        assert!(err.to_string().starts_with("Invalid operation"));
    }

    #[test]
    fn test_user_facing_classification() {
        assert!(PortalError::invalid_selection("corners not in line").is_user_facing());
        assert!(PortalError::not_found("portal").is_user_facing());
        assert!(!PortalError::invalid_operation("rename nether portal").is_user_facing());
    }
}

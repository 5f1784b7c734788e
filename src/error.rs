//! Error types shared by all manipulators

use thiserror::Error;

/// Errors returned by manipulator operations
#[derive(Error, Debug)]
pub enum DroverError {
    /// The backend could not be reached: socket not initialized, dial or
    /// write failure, or a response that never arrived. Retryable.
    #[error("Cannot communicate: {0}")]
    CannotCommunicate(String),

    /// An object could not be encoded into a request body
    #[error("Cannot marshal: {0}")]
    CannotMarshal(String),

    /// A frame or body could not be decoded into the expected shape
    #[error("Cannot unmarshal: {0}")]
    CannotUnmarshal(String),

    /// The server rejected the query with a non-2xx status
    #[error("Cannot execute query: {0}")]
    CannotExecuteQuery(String),

    /// The requested object does not exist
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// The operation violates a server-side constraint
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// The operation is not supported by this manipulator
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// No transaction exists for the given transaction ID
    #[error("Cannot commit transaction: {0}")]
    CannotCommit(String),
}

impl DroverError {
    /// Whether the error indicates a transient communication failure the
    /// caller may retry.
    pub fn is_communication(&self) -> bool {
        matches!(self, DroverError::CannotCommunicate(_))
    }
}

/// Result type for manipulator operations
pub type Result<T> = std::result::Result<T, DroverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_cannot_communicate() {
        let err = DroverError::CannotCommunicate("dial failed".to_string());
        assert_eq!(err.to_string(), "Cannot communicate: dial failed");
    }

    #[test]
    fn test_error_display_object_not_found() {
        let err = DroverError::ObjectNotFound("no object with ID abc".to_string());
        assert_eq!(err.to_string(), "Object not found: no object with ID abc");
    }

    #[test]
    fn test_error_display_not_implemented() {
        let err = DroverError::NotImplemented("Assign".to_string());
        assert_eq!(err.to_string(), "Not implemented: Assign");
    }

    #[test]
    fn test_is_communication() {
        assert!(DroverError::CannotCommunicate("x".into()).is_communication());
        assert!(!DroverError::CannotExecuteQuery("x".into()).is_communication());
        assert!(!DroverError::ObjectNotFound("x".into()).is_communication());
    }
}

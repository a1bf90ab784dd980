//! Error types shared by the façade and every provider
//!
//! Each variant is one failure classification reported by the host store.
//! The façade never translates between them: a provider maps its native
//! failure onto the matching variant and the caller's stream receives it as-is.

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, DbError>;

/// Errors that can occur during store operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DbError {
    /// Requested store or index is not in scope
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness or key generation conflict
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Operation against a finished transaction or a closed connection
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Request issued after the owning transaction stopped accepting work
    #[error("transaction inactive: {0}")]
    TransactionInactive(String),

    /// Explicit or cascading abort of the owning transaction
    #[error("transaction aborted: {0}")]
    Abort(String),

    /// A version change cannot proceed while other connections remain open
    #[error("blocked: {0}")]
    Blocked(String),

    /// Malformed key, key path or key range
    #[error("data error: {0}")]
    Data(String),

    /// Write attempted in a read-only transaction
    #[error("read-only transaction: {0}")]
    ReadOnly(String),

    /// Requested version is lower than the stored version
    #[error("version error: {0}")]
    Version(String),

    /// Invalid arguments or mode for the operation
    #[error("invalid access: {0}")]
    InvalidAccess(String),

    /// Host storage quota exceeded
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The store provider is not available in this environment
    #[error("store not available: {0}")]
    NotAvailable(String),

    /// Caller-supplied codec failed to serialize or deserialize a value
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Host failure with no known classification
    #[error("{name}: {message}")]
    Unknown { name: String, message: String },
}

impl DbError {
    /// Map a host exception name (`DOMException.name`) onto a classification.
    pub fn from_dom(name: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match name {
            "NotFoundError" => DbError::NotFound(message),
            "ConstraintError" => DbError::Constraint(message),
            "InvalidStateError" => DbError::InvalidState(message),
            "TransactionInactiveError" => DbError::TransactionInactive(message),
            "AbortError" => DbError::Abort(message),
            "DataError" => DbError::Data(message),
            "ReadOnlyError" => DbError::ReadOnly(message),
            "VersionError" => DbError::Version(message),
            "InvalidAccessError" => DbError::InvalidAccess(message),
            "QuotaExceededError" => DbError::QuotaExceeded(message),
            _ => DbError::Unknown {
                name: name.to_string(),
                message,
            },
        }
    }

    /// Host exception name for this classification.
    pub fn dom_name(&self) -> &str {
        match self {
            DbError::NotFound(_) => "NotFoundError",
            DbError::Constraint(_) => "ConstraintError",
            DbError::InvalidState(_) => "InvalidStateError",
            DbError::TransactionInactive(_) => "TransactionInactiveError",
            DbError::Abort(_) => "AbortError",
            DbError::Blocked(_) => "BlockedError",
            DbError::Data(_) => "DataError",
            DbError::ReadOnly(_) => "ReadOnlyError",
            DbError::Version(_) => "VersionError",
            DbError::InvalidAccess(_) => "InvalidAccessError",
            DbError::QuotaExceeded(_) => "QuotaExceededError",
            DbError::NotAvailable(_) => "NotAvailableError",
            DbError::Serialization(_) => "DataCloneError",
            DbError::Unknown { name, .. } => name,
        }
    }

    /// True for failures caused by issuing work at the wrong time.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            DbError::InvalidState(_) | DbError::TransactionInactive(_)
        )
    }

    /// True for the abort classification.
    pub fn is_abort(&self) -> bool {
        matches!(self, DbError::Abort(_))
    }

    /// True for the constraint classification.
    pub fn is_constraint(&self) -> bool {
        matches!(self, DbError::Constraint(_))
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dom_names_map_back() {
        for err in [
            DbError::NotFound("x".into()),
            DbError::Constraint("x".into()),
            DbError::InvalidState("x".into()),
            DbError::TransactionInactive("x".into()),
            DbError::Abort("x".into()),
            DbError::Data("x".into()),
            DbError::ReadOnly("x".into()),
            DbError::Version("x".into()),
        ] {
            assert_eq!(DbError::from_dom(err.dom_name(), "x"), err);
        }
    }

    #[test]
    fn test_unknown_keeps_name() {
        let err = DbError::from_dom("WeirdError", "boom");
        assert_eq!(err.dom_name(), "WeirdError");
        assert_eq!(err.to_string(), "WeirdError: boom");
    }

    #[test]
    fn test_state_errors() {
        assert!(DbError::InvalidState("closed".into()).is_state_error());
        assert!(DbError::TransactionInactive("late".into()).is_state_error());
        assert!(!DbError::Abort("x".into()).is_state_error());
    }
}

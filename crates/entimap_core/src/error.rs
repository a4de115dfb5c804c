//! Error types for entimap core.

use crate::entity::Identifier;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in session, batch and store operations.
///
/// Errors are `Clone` so a single failure can be delivered to every waiter of
/// a shared fetch and to every error subscriber.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// The session observed an earlier operational error and must be cleared.
    #[error("invalid session: {cause}")]
    InvalidSession {
        /// The error that invalidated the session.
        cause: String,
    },

    /// The session has been closed.
    #[error("session is closed")]
    SessionClosed,

    /// The operation was dropped from the queue before it ran.
    #[error("operation abandoned before execution")]
    TaskAbandoned,

    /// The entity carries an identifier but is not managed by this session.
    #[error("detached entity in collection {collection}")]
    DetachedEntity {
        /// Collection of the detached entity.
        collection: String,
    },

    /// The operation requires a managed entity.
    #[error("entity in collection {collection} is not managed by this session")]
    NotManaged {
        /// Collection of the entity.
        collection: String,
    },

    /// The entity type was never registered with the session factory.
    #[error("unmapped entity type: {type_name}")]
    UnmappedEntity {
        /// Rust type name.
        type_name: String,
    },

    /// An identifier was required but the entity has none.
    #[error("missing identifier for entity in collection {collection}")]
    MissingIdentifier {
        /// Collection of the entity.
        collection: String,
    },

    /// A batch may only be executed once.
    #[error("batch has already been executed")]
    BatchExecuted,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Document not found in the store.
    #[error("entity {id} not found in collection {collection}")]
    EntityNotFound {
        /// The collection searched.
        collection: String,
        /// The identifier that was not found.
        id: Identifier,
    },

    /// A bulk write reported different counts than were submitted.
    #[error("bulk write mismatch on {collection}: {message}")]
    BulkWriteMismatch {
        /// Collection the bulk write targeted.
        collection: String,
        /// Expected versus reported counts.
        message: String,
    },

    /// The document store reported a failure.
    #[error("store error: {message}")]
    Store {
        /// Description of the failure.
        message: String,
    },

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] entimap_codec::CodecError),

    /// An entity could not be converted to or from its document.
    #[error("mapping error: {message}")]
    Mapping {
        /// Description of the failure.
        message: String,
    },

    /// Internal bookkeeping reached a state that should be impossible.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the violated invariant.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid session error.
    pub fn invalid_session(cause: &CoreError) -> Self {
        Self::InvalidSession {
            cause: cause.to_string(),
        }
    }

    /// Creates a detached entity error.
    pub fn detached(collection: impl Into<String>) -> Self {
        Self::DetachedEntity {
            collection: collection.into(),
        }
    }

    /// Creates a not managed error.
    pub fn not_managed(collection: impl Into<String>) -> Self {
        Self::NotManaged {
            collection: collection.into(),
        }
    }

    /// Creates an unmapped entity error.
    pub fn unmapped(type_name: impl Into<String>) -> Self {
        Self::UnmappedEntity {
            type_name: type_name.into(),
        }
    }

    /// Creates a missing identifier error.
    pub fn missing_identifier(collection: impl Into<String>) -> Self {
        Self::MissingIdentifier {
            collection: collection.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(collection: impl Into<String>, id: Identifier) -> Self {
        Self::EntityNotFound {
            collection: collection.into(),
            id,
        }
    }

    /// Creates a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Creates a mapping error.
    pub fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping {
            message: message.into(),
        }
    }

    /// Creates an invariant violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Returns true for usage errors.
    ///
    /// Usage errors are reported to the caller but leave the session usable.
    /// Every other error is operational and invalidates the session until it
    /// is cleared.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::InvalidSession { .. }
                | Self::SessionClosed
                | Self::TaskAbandoned
                | Self::DetachedEntity { .. }
                | Self::NotManaged { .. }
                | Self::UnmappedEntity { .. }
                | Self::MissingIdentifier { .. }
                | Self::BatchExecuted
                | Self::InvalidOperation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_classification() {
        assert!(CoreError::detached("people").is_usage());
        assert!(CoreError::BatchExecuted.is_usage());
        assert!(CoreError::missing_identifier("people").is_usage());
        assert!(!CoreError::store("connection reset").is_usage());
        assert!(!CoreError::invariant("link without state").is_usage());
        assert!(!CoreError::BulkWriteMismatch {
            collection: "people".into(),
            message: "expected 1 inserted, got 0".into(),
        }
        .is_usage());
    }

    #[test]
    fn invalid_session_carries_cause() {
        let cause = CoreError::store("disk full");
        let err = CoreError::invalid_session(&cause);
        assert_eq!(err.to_string(), "invalid session: store error: disk full");
    }
}

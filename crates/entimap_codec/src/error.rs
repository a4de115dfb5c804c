//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding or decoding documents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended in the middle of an item.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Bytes remained after the top-level item.
    #[error("{remaining} trailing bytes after document")]
    TrailingBytes {
        /// Number of unread bytes.
        remaining: usize,
    },

    /// Floats have no canonical document representation.
    #[error("float values are not supported in documents")]
    FloatForbidden,

    /// Indefinite-length items are not canonical.
    #[error("indefinite-length items are forbidden")]
    IndefiniteLengthForbidden,

    /// A text string was not valid UTF-8.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// An integer does not fit in `i64`.
    #[error("integer overflow")]
    IntegerOverflow,

    /// A map key was not a text string.
    #[error("document keys must be text strings")]
    NonTextKey,

    /// The input is well-formed CBOR but not canonical.
    #[error("non-canonical encoding: {message}")]
    NonCanonical {
        /// What rule was broken.
        message: String,
    },

    /// A length prefix exceeded the configured limit.
    #[error("declared length {claimed} exceeds limit {max_allowed}")]
    SizeLimitExceeded {
        /// Declared length.
        claimed: u64,
        /// Largest accepted length.
        max_allowed: u64,
    },

    /// A CBOR construct documents never use (tags, undefined, simple values).
    #[error("unsupported CBOR item: {item}")]
    Unsupported {
        /// Description of the item.
        item: String,
    },
}

impl CodecError {
    /// Creates a non-canonical encoding error.
    pub fn non_canonical(message: impl Into<String>) -> Self {
        Self::NonCanonical {
            message: message.into(),
        }
    }

    /// Creates an unsupported item error.
    pub fn unsupported(item: impl Into<String>) -> Self {
        Self::Unsupported { item: item.into() }
    }
}

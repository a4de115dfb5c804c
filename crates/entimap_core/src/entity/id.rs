//! Entity identifiers and identity generation.

use crate::error::{CoreError, CoreResult};
use entimap_codec::Value;
use std::fmt;
use uuid::Uuid;

/// Unique identifier of a persisted entity.
///
/// Identifiers are 128-bit UUIDs that are:
/// - Assigned once, on the first `save`
/// - Stored in the document as a 16-byte string
/// - Cleared again when a removal is flushed
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier([u8; 16]);

impl Identifier {
    /// Creates an identifier from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Creates a new random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Converts to a UUID.
    #[must_use]
    pub fn to_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.0)
    }

    /// Creates an identifier from a slice.
    ///
    /// Returns `None` if the slice is not exactly 16 bytes.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        <[u8; 16]>::try_from(slice).ok().map(Self)
    }

    /// Document representation of this identifier.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Bytes(self.0.to_vec())
    }

    /// Reads an identifier from its document representation.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_bytes().and_then(Self::from_slice)
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.to_uuid())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid())
    }
}

impl From<Uuid> for Identifier {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.into_bytes())
    }
}

impl From<Identifier> for Uuid {
    fn from(id: Identifier) -> Self {
        id.to_uuid()
    }
}

impl From<[u8; 16]> for Identifier {
    fn from(bytes: [u8; 16]) -> Self {
        Self::from_bytes(bytes)
    }
}

/// Produces and interprets identifiers for new entities.
pub trait IdentityGenerator: Send + Sync {
    /// Generates a fresh identifier.
    fn generate(&self) -> Identifier;

    /// Returns true if `value` is a well-formed stored identifier.
    fn validate(&self, value: &Value) -> bool {
        Identifier::from_value(value).is_some()
    }

    /// Parses the textual form of an identifier.
    fn from_string(&self, text: &str) -> CoreResult<Identifier>;

    /// Compares two identifiers.
    fn are_equal(&self, a: &Identifier, b: &Identifier) -> bool {
        a == b
    }
}

/// Generates random (v4) UUID identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdentityGenerator for UuidGenerator {
    fn generate(&self) -> Identifier {
        Identifier::new()
    }

    fn from_string(&self, text: &str) -> CoreResult<Identifier> {
        Uuid::parse_str(text)
            .map(Identifier::from)
            .map_err(|e| CoreError::invalid_operation(format!("invalid identifier {text:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_unique() {
        assert_ne!(Identifier::new(), Identifier::new());
    }

    #[test]
    fn from_slice() {
        assert!(Identifier::from_slice(&[0u8; 16]).is_some());
        assert!(Identifier::from_slice(&[0u8; 15]).is_none());
        assert!(Identifier::from_slice(&[0u8; 17]).is_none());
    }

    #[test]
    fn value_form() {
        let id = Identifier::from_bytes([9; 16]);
        assert_eq!(Identifier::from_value(&id.to_value()), Some(id));
        assert_eq!(Identifier::from_value(&Value::Text("x".into())), None);
    }

    #[test]
    fn generator_parses_display_form() {
        let gen = UuidGenerator;
        let id = gen.generate();
        let parsed = gen.from_string(&id.to_string()).unwrap();
        assert!(gen.are_equal(&id, &parsed));
        assert!(gen.validate(&id.to_value()));
        assert!(!gen.validate(&Value::Integer(3)));
    }

    #[test]
    fn generator_rejects_garbage() {
        assert!(matches!(
            UuidGenerator.from_string("not-a-uuid"),
            Err(CoreError::InvalidOperation { .. })
        ));
    }
}

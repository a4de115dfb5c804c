//! Mapping capability between entity types and documents.

use crate::entity::walk::Walker;
use crate::entity::Identifier;
use crate::error::CoreResult;
use crate::types::{ChangeTracking, Priority};
use bitflags::bitflags;
use entimap_codec::Value;

bitflags! {
    /// Cascade flags carried by a mapped property.
    ///
    /// A session operation follows a property only when the property's flags
    /// intersect the operation's cascade mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PropertyFlags: u32 {
        /// Follow the property when saving.
        const SAVE = 1 << 0;
        /// Follow the property when removing.
        const REMOVE = 1 << 1;
        /// Follow the property when detaching.
        const DETACH = 1 << 2;
        /// Follow the property when refreshing.
        const REFRESH = 1 << 3;
        /// Resolve unresolved references reached during the walk.
        const DEREFERENCE = 1 << 4;
        /// Every cascade operation.
        const ALL = Self::SAVE.bits() | Self::REMOVE.bits() | Self::DETACH.bits() | Self::REFRESH.bits();
    }
}

/// Static description of how an entity type is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityMapping {
    /// Collection holding the documents of this type.
    pub collection: &'static str,
    /// Overrides the session default when set.
    pub change_tracking: Option<ChangeTracking>,
    /// Writes are guarded by an optimistic version field.
    pub versioned: bool,
    /// Priority of this collection's bulk command during a flush.
    pub priority: Priority,
}

impl EntityMapping {
    /// Creates a mapping for `collection` with default options.
    #[must_use]
    pub const fn new(collection: &'static str) -> Self {
        Self {
            collection,
            change_tracking: None,
            versioned: false,
            priority: Priority::MEDIUM,
        }
    }

    /// Sets the change tracking policy.
    #[must_use]
    pub const fn change_tracking(mut self, policy: ChangeTracking) -> Self {
        self.change_tracking = Some(policy);
        self
    }

    /// Enables optimistic versioning.
    #[must_use]
    pub const fn versioned(mut self) -> Self {
        self.versioned = true;
        self
    }

    /// Sets the flush priority.
    #[must_use]
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// A type whose instances a session can manage.
///
/// # Example
///
/// ```
/// use entimap_codec::Value;
/// use entimap_core::{CoreResult, Entity, EntityMapping, Identifier};
///
/// struct Tag {
///     id: Option<Identifier>,
///     label: String,
/// }
///
/// impl Entity for Tag {
///     const MAPPING: EntityMapping = EntityMapping::new("tags");
///
///     fn identifier(&self) -> Option<Identifier> {
///         self.id
///     }
///
///     fn set_identifier(&mut self, id: Option<Identifier>) {
///         self.id = id;
///     }
///
///     fn to_document(&self) -> CoreResult<Value> {
///         Ok(Value::document().with("label", self.label.as_str()))
///     }
///
///     fn from_document(doc: &Value) -> CoreResult<Self> {
///         let label = doc.get("label").and_then(Value::as_text).unwrap_or_default();
///         Ok(Tag { id: None, label: label.to_string() })
///     }
/// }
/// ```
pub trait Entity: Send + Sync + Sized + 'static {
    /// Storage description of this type.
    const MAPPING: EntityMapping;

    /// Returns the identifier, if one was assigned.
    fn identifier(&self) -> Option<Identifier>;

    /// Assigns or clears the identifier.
    fn set_identifier(&mut self, id: Option<Identifier>);

    /// Writes the entity's fields to a document.
    ///
    /// The identifier and version fields are added by the session and must
    /// not be written here.
    fn to_document(&self) -> CoreResult<Value>;

    /// Reads an entity from a stored document.
    ///
    /// References come back unresolved.
    fn from_document(doc: &Value) -> CoreResult<Self>;

    /// Reports related entities, references and embedded values.
    fn walk(&self, _walker: &mut Walker<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_excludes_dereference() {
        assert!(PropertyFlags::ALL.contains(PropertyFlags::SAVE | PropertyFlags::REFRESH));
        assert!(!PropertyFlags::ALL.contains(PropertyFlags::DEREFERENCE));
    }

    #[test]
    fn mapping_builder_is_const() {
        const M: EntityMapping = EntityMapping::new("notes")
            .versioned()
            .priority(Priority::HIGH)
            .change_tracking(ChangeTracking::Observe);
        assert_eq!(M.collection, "notes");
        assert!(M.versioned);
        assert_eq!(M.priority, Priority::HIGH);
        assert_eq!(M.change_tracking, Some(ChangeTracking::Observe));
    }
}

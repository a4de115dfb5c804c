//! Entity mapping, handles and identifiers.

mod handle;
mod id;
mod mapping;
mod reference;
mod walk;

pub use handle::Handle;
pub use id::{IdentityGenerator, Identifier, UuidGenerator};
pub use mapping::{Entity, EntityMapping, PropertyFlags};
pub use reference::Reference;
pub use walk::{Walk, Walker};

pub(crate) use handle::{instantiate, EntityObject, ObjectKey, Observer};
pub(crate) use walk::Cascade;

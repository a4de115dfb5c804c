//! # entimap core
//!
//! Unit-of-work engine mirroring in-memory entities against a document store.
//!
//! This crate provides:
//! - Sessions with an identity map and a pending schedule list
//! - Change tracking by deferred dirty checks or mutation observers
//! - Cascading save, remove, detach and refresh over entity graphs
//! - A task queue that runs conflicting operations in submission order
//! - Priority-grouped batches of per-collection bulk writes
//! - A `DocumentStore` boundary with an in-memory implementation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entimap_core::{Handle, MemoryStore, SessionFactory};
//! use std::sync::Arc;
//!
//! let mut factory = SessionFactory::new(Arc::new(MemoryStore::new()));
//! factory.register::<Person>();
//!
//! let session = factory.create_session();
//! let ada = Handle::new(Person::new("Ada"));
//! session.save(&ada).await?;
//! session.flush().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod config;
mod entity;
mod error;
mod error_feed;
mod persister;
mod session;
mod stats;
mod store;
pub mod types;

pub use batch::{Batch, BulkCommand, Command};
pub use config::Config;
pub use entity::{
    Entity, EntityMapping, Handle, IdentityGenerator, Identifier, PropertyFlags, Reference,
    UuidGenerator, Walk, Walker,
};
pub use error::{CoreError, CoreResult};
pub use error_feed::{ErrorFeed, SessionError};
pub use session::{Operation, Pending, Session, SessionFactory};
pub use stats::{SessionStats, StatsSnapshot};
pub use store::{BulkWriteResult, Criteria, DocumentStore, MemoryStore, Update, WriteOp};
pub use types::{ChangeTracking, EntityState, Priority};

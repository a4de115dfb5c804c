//! # entimap testkit
//!
//! Test utilities for entimap.
//!
//! This crate provides:
//! - Sample entity types covering every mapping option
//! - Fault-injecting and recording document stores
//! - Property-based test generators using proptest
//! - Tracing initialisation for test binaries
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entimap_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn saves_a_person() {
//!     init_tracing();
//!     let (session, store) = memory_session();
//!     let ada = person("Ada");
//!     session.save(&ada).await.unwrap();
//!     session.flush().await.unwrap();
//!     assert_eq!(store.len(Person::MAPPING.collection), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stores;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::stores::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stores::*;

static TRACING: Once = Once::new();

/// Installs a test-friendly `tracing` subscriber once per process.
///
/// Filtering follows `RUST_LOG` and defaults to warnings only.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

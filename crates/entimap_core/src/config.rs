//! Session configuration.

use crate::types::ChangeTracking;
use serde::{Deserialize, Serialize};

/// Configuration shared by every session a factory creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of entity links turned into batch commands per scheduler turn
    /// while building a flush.
    pub flush_chunk_size: usize,

    /// Change tracking for mappings that do not declare their own.
    pub default_change_tracking: ChangeTracking,

    /// Document field holding the optimistic version of versioned entities.
    pub version_field: String,

    /// Document field holding the entity identifier.
    pub identifier_field: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flush_chunk_size: 1000,
            default_change_tracking: ChangeTracking::DeferredImplicit,
            version_field: "_v".to_string(),
            identifier_field: "_id".to_string(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flush chunk size. Zero is treated as one.
    #[must_use]
    pub const fn flush_chunk_size(mut self, size: usize) -> Self {
        self.flush_chunk_size = if size == 0 { 1 } else { size };
        self
    }

    /// Sets the default change tracking policy.
    #[must_use]
    pub const fn default_change_tracking(mut self, policy: ChangeTracking) -> Self {
        self.default_change_tracking = policy;
        self
    }

    /// Sets the version field name.
    #[must_use]
    pub fn version_field(mut self, field: impl Into<String>) -> Self {
        self.version_field = field.into();
        self
    }

    /// Sets the identifier field name.
    #[must_use]
    pub fn identifier_field(mut self, field: impl Into<String>) -> Self {
        self.identifier_field = field.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.flush_chunk_size, 1000);
        assert_eq!(
            config.default_change_tracking,
            ChangeTracking::DeferredImplicit
        );
        assert_eq!(config.version_field, "_v");
        assert_eq!(config.identifier_field, "_id");
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .flush_chunk_size(0)
            .default_change_tracking(ChangeTracking::Observe)
            .version_field("version");

        assert_eq!(config.flush_chunk_size, 1);
        assert_eq!(config.default_change_tracking, ChangeTracking::Observe);
        assert_eq!(config.version_field, "version");
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"default_change_tracking":"deferred_explicit"}"#).unwrap();
        assert_eq!(
            config.default_change_tracking,
            ChangeTracking::DeferredExplicit
        );
        assert_eq!(config.flush_chunk_size, 1000);
        assert_eq!(config.identifier_field, "_id");
    }
}

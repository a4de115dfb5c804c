//! Session bootstrap.

use crate::config::Config;
use crate::entity::{Entity, EntityObject, IdentityGenerator, UuidGenerator};
use crate::error::{CoreError, CoreResult};
use crate::persister::Persister;
use crate::session::Session;
use crate::store::DocumentStore;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Persisters of the registered entity types.
#[derive(Clone, Default)]
pub(crate) struct Registry {
    persisters: HashMap<TypeId, Arc<Persister>>,
}

impl Registry {
    fn register<T: Entity>(&mut self, config: &Config) {
        self.persisters
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::new(Persister::new::<T>(config)));
    }

    pub fn get(&self, entity_type: TypeId, type_name: &str) -> CoreResult<Arc<Persister>> {
        self.persisters
            .get(&entity_type)
            .cloned()
            .ok_or_else(|| CoreError::unmapped(type_name))
    }

    pub fn for_object(&self, object: &dyn EntityObject) -> CoreResult<Arc<Persister>> {
        self.get(object.entity_type(), object.type_name())
    }

    pub fn of<T: Entity>(&self) -> CoreResult<Arc<Persister>> {
        self.get(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    pub fn len(&self) -> usize {
        self.persisters.len()
    }
}

/// Creates sessions over one document store.
///
/// # Example
///
/// ```rust,ignore
/// let mut factory = SessionFactory::new(Arc::new(MemoryStore::new()));
/// factory.register::<Person>().register::<Address>();
///
/// let session = factory.create_session();
/// ```
pub struct SessionFactory {
    store: Arc<dyn DocumentStore>,
    config: Arc<Config>,
    generator: Arc<dyn IdentityGenerator>,
    registry: Registry,
}

impl SessionFactory {
    /// Creates a factory with the default configuration.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_config(store, Config::default())
    }

    /// Creates a factory with a custom configuration.
    pub fn with_config(store: Arc<dyn DocumentStore>, config: Config) -> Self {
        Self {
            store,
            config: Arc::new(config),
            generator: Arc::new(UuidGenerator),
            registry: Registry::default(),
        }
    }

    /// Replaces the identity generator used for new entities.
    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn IdentityGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Registers a mapped entity type. Registering twice is a no-op.
    pub fn register<T: Entity>(&mut self) -> &mut Self {
        self.registry.register::<T>(&self.config);
        debug!(
            collection = T::MAPPING.collection,
            entity = std::any::type_name::<T>(),
            "entity type registered"
        );
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the store sessions write to.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Creates a new session. Sessions share the store but nothing else.
    pub fn create_session(&self) -> Session {
        Session::new(
            Arc::clone(&self.store),
            Arc::clone(&self.config),
            Arc::clone(&self.generator),
            self.registry.clone(),
        )
    }
}

impl fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("config", &self.config)
            .field("types", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityMapping, Identifier};
    use crate::store::MemoryStore;
    use entimap_codec::Value;

    struct Label {
        id: Option<Identifier>,
    }

    impl Entity for Label {
        const MAPPING: EntityMapping = EntityMapping::new("labels");

        fn identifier(&self) -> Option<Identifier> {
            self.id
        }

        fn set_identifier(&mut self, id: Option<Identifier>) {
            self.id = id;
        }

        fn to_document(&self) -> CoreResult<Value> {
            Ok(Value::document())
        }

        fn from_document(_doc: &Value) -> CoreResult<Self> {
            Ok(Label { id: None })
        }
    }

    #[test]
    fn registry_lookup() {
        let mut factory = SessionFactory::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            factory.registry.of::<Label>(),
            Err(CoreError::UnmappedEntity { .. })
        ));
        factory.register::<Label>().register::<Label>();
        assert_eq!(factory.registry.len(), 1);
        assert_eq!(factory.registry.of::<Label>().unwrap().collection(), "labels");
    }
}

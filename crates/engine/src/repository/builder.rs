//! Engine builder for fluent configuration

use super::PersistenceEngine;
use crate::cache::ReclaimableCache;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::facade::StoreFacade;
use crate::id_gen::{IdGenerator, IdGenerators};
use crate::schemas::SchemaRegistry;
use redmap_core::{EntitySchema, Error, Result};
use redmap_storage::Connection;
use std::sync::Arc;

// ============================================================================
// Engine Builder Pattern
// ============================================================================

/// Builder for [`PersistenceEngine`]
///
/// ```ignore
/// use redmap_engine::{EngineConfig, PersistenceEngine};
/// use redmap_storage::MemoryStore;
///
/// // Defaults: system clock, built-in id generators, no process cache
/// let engine = PersistenceEngine::open(MemoryStore::new().connect(), EngineConfig::default())?;
///
/// // Custom wiring
/// let engine = PersistenceEngine::builder(MemoryStore::new().connect())
///     .config(EngineConfig::from_file(path)?)
///     .generator("fixed", MyGenerator)
///     .schema(user_schema)
///     .build()?;
/// ```
pub struct EngineBuilder<C: Connection> {
    conn: C,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    cache: Option<Arc<ReclaimableCache>>,
    generators: IdGenerators,
    schemas: Vec<EntitySchema>,
}

impl<C: Connection> EngineBuilder<C> {
    /// Builder over `conn` with default config and the system clock
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            cache: None,
            generators: IdGenerators::new(),
            schemas: Vec::new(),
        }
    }

    /// Use `config`
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing cache, regardless of `config.cache.enabled`
    ///
    /// Lets several engines share one process cache.
    pub fn cache(mut self, cache: Arc<ReclaimableCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Time source for timeline and index scores
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Shared time source, e.g. a `ManualClock` the caller keeps stepping
    pub fn shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register an id generator under `name`
    pub fn generator(self, name: impl Into<String>, generator: impl IdGenerator + 'static) -> Self {
        self.generators.register(name, generator);
        self
    }

    /// Register a schema when the engine is built
    pub fn schema(mut self, schema: EntitySchema) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Validate configuration and build the engine
    ///
    /// # Errors
    ///
    /// - `Error::Config` for an invalid config or an unregistered default
    ///   generator
    /// - `Error::Schema` if a queued schema fails to register
    pub fn build(self) -> Result<PersistenceEngine<C>> {
        self.config.validate()?;
        if !self.generators.contains(&self.config.default_generator) {
            return Err(Error::Config(format!(
                "default_generator '{}' is not registered",
                self.config.default_generator
            )));
        }

        let cache = match self.cache {
            Some(cache) => Some(cache),
            None if self.config.cache.enabled => Some(Arc::new(ReclaimableCache::new(
                self.config.cache.times_cache_clear,
                self.config.cache.retain,
            ))),
            None => None,
        };

        let engine = PersistenceEngine::from_parts(
            StoreFacade::new(self.conn, self.clock),
            SchemaRegistry::new(),
            self.generators,
            cache,
            self.config,
        );
        for schema in self.schemas {
            engine.register(schema)?;
        }
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use redmap_core::{FieldDescriptor, ScalarType};
    use redmap_storage::{MemoryConnection, MemoryStore};

    fn builder() -> EngineBuilder<MemoryConnection> {
        PersistenceEngine::builder(MemoryStore::new().connect())
    }

    #[test]
    fn test_defaults_have_no_cache() {
        let engine = builder().build().unwrap();
        assert!(engine.cache().is_none());
        assert!(engine.cache_stats().is_none());
        assert_eq!(engine.config(), &EngineConfig::default());
    }

    #[test]
    fn test_cache_from_config() {
        let config = EngineConfig {
            cache: CacheConfig {
                enabled: true,
                ..CacheConfig::default()
            },
            ..EngineConfig::default()
        };
        let engine = builder().config(config).build().unwrap();
        assert!(engine.cache().is_some());
    }

    #[test]
    fn test_explicit_cache_is_shared() {
        let cache = Arc::new(ReclaimableCache::new(10, 10));
        let engine = builder().cache(Arc::clone(&cache)).build().unwrap();
        assert!(Arc::ptr_eq(engine.cache().unwrap(), &cache));
    }

    #[test]
    fn test_unknown_default_generator_is_config_error() {
        let config = EngineConfig {
            default_generator: "nope".to_string(),
            ..EngineConfig::default()
        };
        assert!(matches!(
            builder().config(config).build(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.cache.times_cache_clear = 0;
        assert!(matches!(
            builder().config(config).build(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_schemas_registered_on_build() {
        let schema = EntitySchema::builder("te")
            .field(FieldDescriptor::scalar("age", ScalarType::I32))
            .build()
            .unwrap();
        let engine = builder().schema(schema).build().unwrap();
        assert_eq!(engine.schema("te").unwrap().table(), "te");
    }

    #[test]
    fn test_schema_naming_unknown_generator_fails_build() {
        let schema = EntitySchema::builder("te")
            .auto_id("missing")
            .field(FieldDescriptor::scalar("age", ScalarType::I32))
            .build()
            .unwrap();
        assert!(matches!(
            builder().schema(schema).build(),
            Err(Error::Schema(_))
        ));
    }
}

//! Id generators
//!
//! Auto-id schemas name a generator; the engine resolves it through an
//! [`IdGenerators`] registry. Two generators are always registered:
//!
//! - `"default"`: per-table counter in the store (`INCR table:__id__`)
//! - `"uuid"`: random v4 uuid, no store traffic

use dashmap::DashMap;
use redmap_core::keys;
use redmap_core::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// Atomic counter in the store
pub trait Counter {
    /// Increment `key` and return the new value
    fn incr(&mut self, key: &str) -> Result<i64>;
}

/// Produces ids for new records of a table
pub trait IdGenerator: Send + Sync {
    /// Next id for `table`
    fn generate(&self, table: &str, counter: &mut dyn Counter) -> Result<String>;
}

/// Store-backed monotonic counter, one per table
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterGenerator;

impl IdGenerator for CounterGenerator {
    fn generate(&self, table: &str, counter: &mut dyn Counter) -> Result<String> {
        counter
            .incr(&keys::id_counter_key(table))
            .map(|n| n.to_string())
    }
}

/// Random v4 uuid
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self, _table: &str, _counter: &mut dyn Counter) -> Result<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }
}

/// Generators by name
#[derive(Clone)]
pub struct IdGenerators {
    generators: Arc<DashMap<String, Arc<dyn IdGenerator>>>,
}

impl IdGenerators {
    /// Registry holding the built-in generators
    pub fn new() -> Self {
        let registry = Self {
            generators: Arc::new(DashMap::new()),
        };
        registry.register("default", CounterGenerator);
        registry.register("uuid", UuidGenerator);
        registry
    }

    /// Register (or replace) a generator
    pub fn register(&self, name: impl Into<String>, generator: impl IdGenerator + 'static) {
        self.generators.insert(name.into(), Arc::new(generator));
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.generators.contains_key(name)
    }

    /// Look up a generator
    ///
    /// # Errors
    ///
    /// `Error::Schema` when no generator has that name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn IdGenerator>> {
        self.generators
            .get(name)
            .map(|g| Arc::clone(g.value()))
            .ok_or_else(|| Error::schema(format!("unknown id generator '{}'", name)))
    }
}

impl Default for IdGenerators {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdGenerators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.generators.iter().map(|e| e.key().clone()).collect();
        names.sort();
        f.debug_struct("IdGenerators").field("names", &names).finish()
    }
}

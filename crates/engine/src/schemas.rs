//! Schema registry
//!
//! Schemas are validated once, on registration, and shared as
//! `Arc<EntitySchema>` afterwards. A table's schema cannot change while the
//! engine runs; registering the identical schema again is a no-op.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use redmap_core::{EntitySchema, Error, Result};
use std::sync::Arc;

/// Registered schemas by table
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: Arc<DashMap<String, Arc<EntitySchema>>>,
}

impl SchemaRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a schema
    ///
    /// # Errors
    ///
    /// `Error::Schema` if the schema is invalid or its table is already
    /// registered with a different shape.
    pub fn register(&self, schema: EntitySchema) -> Result<Arc<EntitySchema>> {
        schema.validate()?;
        match self.schemas.entry(schema.table().to_string()) {
            Entry::Occupied(existing) => {
                if **existing.get() == schema {
                    Ok(Arc::clone(existing.get()))
                } else {
                    Err(Error::schema(format!(
                        "table '{}' is already registered with a different schema",
                        schema.table()
                    )))
                }
            }
            Entry::Vacant(slot) => {
                let schema = Arc::new(schema);
                slot.insert(Arc::clone(&schema));
                Ok(schema)
            }
        }
    }

    /// Schema of `table`
    pub fn get(&self, table: &str) -> Result<Arc<EntitySchema>> {
        self.schemas
            .get(table)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| Error::schema(format!("no schema registered for table '{}'", table)))
    }

    /// Whether `table` has a schema
    pub fn contains(&self, table: &str) -> bool {
        self.schemas.contains_key(table)
    }

    /// Registered tables, sorted
    pub fn tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.schemas.iter().map(|e| e.key().clone()).collect();
        tables.sort();
        tables
    }
}

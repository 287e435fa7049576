//! Persistence engine: record save/get/update/delete and queries
//!
//! `PersistenceEngine` owns one [`StoreFacade`] (and so one connection),
//! the schema and id-generator registries, and an optional
//! [`ReclaimableCache`]. Every operation:
//!
//! 1. resolves the record type's schema,
//! 2. consults the cache where it can,
//! 3. drives the facade under the facade lock, flushing the pipeline before
//!    returning.
//!
//! ## Failure handling
//!
//! Absence is `Ok(None)` (or `Ok(false)`), never an error. On any error the
//! facade is reset, so no half-built pipeline leaks into the next call, and
//! the error is logged under `redmap::engine` before it is returned.
//!
//! ## Save order
//!
//! All field writes are encoded and queued first. The uniqueness claim is
//! then taken with an immediate set-if-absent; a lost claim discards the
//! queue, so a conflicting save leaves nothing behind. Only then is the
//! pipeline flushed.

mod builder;
mod queries;

pub use builder::EngineBuilder;

use crate::cache::{CacheStats, CacheoutListener, ReclaimableCache};
use crate::config::EngineConfig;
use crate::facade::{stored_form, value_token, StoreFacade};
use crate::id_gen::IdGenerators;
use crate::schemas::SchemaRegistry;
use parking_lot::Mutex;
use redmap_core::{EntitySchema, Error, FieldDescriptor, Record, Result, Value};
use redmap_storage::Connection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Engine traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Read operations served (cache hits included)
    pub reads: u64,
    /// Write operations completed
    pub writes: u64,
}

/// Record persistence over a Redis-like store
pub struct PersistenceEngine<C: Connection> {
    facade: Mutex<StoreFacade<C>>,
    schemas: SchemaRegistry,
    generators: IdGenerators,
    cache: Option<Arc<ReclaimableCache>>,
    config: EngineConfig,
    reads: AtomicU64,
    writes: AtomicU64,
}

fn log_failure(op: &'static str, table: &str, err: &Error) {
    match err {
        Error::UniquenessConflict { .. } | Error::ImmutableField { .. } => {
            warn!(target: "redmap::engine", op, table, error = %err, "operation refused");
        }
        Error::MissingRecord { .. } => {
            debug!(target: "redmap::engine", op, table, error = %err, "record missing");
        }
        _ => {
            error!(
                target: "redmap::engine",
                op,
                table,
                error = %err,
                fatal = err.is_fatal(),
                "operation failed"
            );
        }
    }
}

impl<C: Connection> PersistenceEngine<C> {
    /// Start configuring an engine over `conn`
    pub fn builder(conn: C) -> EngineBuilder<C> {
        EngineBuilder::new(conn)
    }

    /// Engine with the given config and no pre-registered schemas
    pub fn open(conn: C, config: EngineConfig) -> Result<Self> {
        EngineBuilder::new(conn).config(config).build()
    }

    pub(crate) fn from_parts(
        facade: StoreFacade<C>,
        schemas: SchemaRegistry,
        generators: IdGenerators,
        cache: Option<Arc<ReclaimableCache>>,
        config: EngineConfig,
    ) -> Self {
        info!(
            target: "redmap::engine",
            tables = schemas.tables().len(),
            cache = cache.is_some(),
            "persistence engine ready"
        );
        Self {
            facade: Mutex::new(facade),
            schemas,
            generators,
            cache,
            config,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // Plumbing
    // ========================================================================

    /// Run `f` under the facade lock; on error reset the facade and log
    fn guarded<T>(
        &self,
        op: &'static str,
        table: &str,
        f: impl FnOnce(&mut StoreFacade<C>) -> Result<T>,
    ) -> Result<T> {
        let mut facade = self.facade.lock();
        let result = f(&mut facade);
        if let Err(err) = &result {
            facade.reset();
            log_failure(op, table, err);
        }
        result
    }

    fn schema_for(&self, op: &'static str, table: &str) -> Result<Arc<EntitySchema>> {
        self.schemas.get(table).map_err(|err| {
            log_failure(op, table, &err);
            err
        })
    }

    fn field_for<'s>(
        &self,
        op: &'static str,
        schema: &'s EntitySchema,
        column: &str,
    ) -> Result<&'s FieldDescriptor> {
        schema.field(column).map_err(|err| {
            log_failure(op, schema.table(), &err);
            err
        })
    }

    fn fail<T>(&self, op: &'static str, table: &str, err: Error) -> Result<T> {
        log_failure(op, table, &err);
        Err(err)
    }

    fn active_cache(&self, schema: &EntitySchema) -> Option<&ReclaimableCache> {
        self.cache.as_deref().filter(|_| schema.cacheable())
    }

    fn read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn wrote(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Run `f` under the facade lock, then cache what it loaded
    ///
    /// Fresh loads are cached only after the lock is released: a cache put
    /// can drain and notify the cacheout listener, which may call back into
    /// the engine.
    fn loading<T>(
        &self,
        op: &'static str,
        schema: &EntitySchema,
        f: impl FnOnce(&mut StoreFacade<C>, &mut Vec<Arc<Record>>) -> Result<T>,
    ) -> Result<T> {
        let mut fresh = Vec::new();
        let result = self.guarded(op, schema.table(), |facade| f(facade, &mut fresh))?;
        if let Some(cache) = self.active_cache(schema) {
            for record in &fresh {
                cache.cache(record);
            }
        }
        Ok(result)
    }

    /// Cached record, or a batched load from the store
    ///
    /// Runs under the facade lock, so query paths can rehydrate many ids
    /// without re-entering it. Records read from the store are pushed to
    /// `fresh` for [`Self::loading`] to cache.
    fn load(
        &self,
        facade: &mut StoreFacade<C>,
        schema: &EntitySchema,
        id: &str,
        fresh: &mut Vec<Arc<Record>>,
    ) -> Result<Option<Arc<Record>>> {
        if let Some(hit) = self
            .active_cache(schema)
            .and_then(|c| c.get(schema.table(), id))
        {
            return Ok(Some(hit));
        }
        let Some(values) = facade.read_fields(schema.table(), id, schema.fields())? else {
            return Ok(None);
        };
        let mut record = Record::with_id(schema.table(), id);
        for (field, value) in schema.fields().iter().zip(values) {
            if !value.is_null() {
                record.set(field.column.as_str(), value);
            }
        }
        let record = Arc::new(record);
        fresh.push(Arc::clone(&record));
        Ok(Some(record))
    }

    fn check_columns(schema: &EntitySchema, record: &Record) -> Result<()> {
        for (column, _) in record.iter() {
            schema.field(column)?;
        }
        Ok(())
    }

    fn immutable_fields(schema: &EntitySchema) -> Vec<&FieldDescriptor> {
        schema.fields().iter().filter(|f| f.is_immutable()).collect()
    }

    // ========================================================================
    // Schemas
    // ========================================================================

    /// Register a record type
    ///
    /// # Errors
    ///
    /// `Error::Schema` if the schema is invalid, names an unknown id
    /// generator, or conflicts with an already registered schema.
    pub fn register(&self, schema: EntitySchema) -> Result<Arc<EntitySchema>> {
        let table = schema.table().to_string();
        if let Some(name) = schema.id_generator() {
            if !self.generators.contains(name) {
                return self.fail(
                    "register",
                    &table,
                    Error::schema(format!("{}: unknown id generator '{}'", table, name)),
                );
            }
        }
        let registered = self
            .schemas
            .register(schema)
            .map_err(|err| {
                log_failure("register", &table, &err);
                err
            })?;
        debug!(target: "redmap::engine", table = %table, "schema registered");
        Ok(registered)
    }

    /// Registered schema of `table`
    pub fn schema(&self, table: &str) -> Result<Arc<EntitySchema>> {
        self.schemas.get(table)
    }

    // ========================================================================
    // Save
    // ========================================================================

    /// Persist a record, assigning an id if its schema generates them
    ///
    /// Returns the persisted record with its id, in the form a reload from
    /// the store yields, as shared by the cache.
    ///
    /// # Errors
    ///
    /// - `MissingId`: no id and the schema does not generate ids
    /// - `UniquenessConflict`: another record holds the unique value; nothing
    ///   was written
    /// - `Schema`, `TypeMismatch`, `UnsupportedType`, `InvalidValue`: the
    ///   record does not fit its schema; nothing was written
    /// - `Store`: the store failed; the record may be partially written
    pub fn save(&self, record: Record) -> Result<Arc<Record>> {
        let schema = self.schema_for("save", record.table())?;
        let table = schema.table().to_string();
        let saved = self.guarded("save", &table, |facade| {
            self.save_with(facade, &schema, record)
        })?;
        self.wrote();
        if let Some(cache) = self.active_cache(&schema) {
            cache.cache(&saved);
        }
        Ok(saved)
    }

    fn save_with(
        &self,
        facade: &mut StoreFacade<C>,
        schema: &EntitySchema,
        mut record: Record,
    ) -> Result<Arc<Record>> {
        let table = schema.table();
        Self::check_columns(schema, &record)?;

        let id = match record.id() {
            Some(id) => id.to_string(),
            None if schema.is_auto_id() => {
                let name = schema
                    .id_generator()
                    .unwrap_or(self.config.default_generator.as_str());
                let id = self.generators.get(name)?.generate(table, &mut *facade)?;
                record.set_id(id.as_str());
                id
            }
            None => {
                return Err(Error::MissingId {
                    table: table.to_string(),
                })
            }
        };

        // Previous unique/indexed tokens, so a re-save can release them
        let immutables = Self::immutable_fields(schema);
        let previous = facade.read_tokens(table, &id, &immutables)?;

        facade.mark_exists(table, &id);
        let mut stored = Record::with_id(table, id.as_str());
        for field in schema.fields() {
            let value = record.value(&field.column);
            facade.write(table, &id, field, value)?;
            let value = stored_form(field, value)?;
            if !value.is_null() {
                stored.set(field.column.as_str(), value);
            }
        }

        let mut fresh_claim: Option<(String, String)> = None;
        for (field, old) in immutables.iter().zip(previous) {
            let new = value_token(field, record.value(&field.column))?;
            if field.indexed {
                match (&old, &new) {
                    (Some(o), Some(n)) if o == n => {}
                    _ => {
                        if let Some(o) = &old {
                            facade.delete_index(table, &field.column, o, &id);
                        }
                        if let Some(n) = &new {
                            facade.write_index(table, &field.column, n, &id);
                        }
                    }
                }
            }
            if field.unique {
                if let Some(n) = &new {
                    if !facade.write_unique(table, &field.column, n, &id)? {
                        return Err(Error::UniquenessConflict {
                            table: table.to_string(),
                            column: field.column.clone(),
                            value: n.clone(),
                        });
                    }
                    if old.as_ref() != Some(n) {
                        fresh_claim = Some((field.column.clone(), n.clone()));
                    }
                }
                if let Some(o) = &old {
                    if new.as_ref() != Some(o) {
                        facade.remove_unique(table, &field.column, o);
                    }
                }
            }
        }

        if schema.id_cache() {
            facade.add_id(table, &id);
        }

        if let Err(err) = facade.flush() {
            if let Some((column, token)) = fresh_claim {
                facade.reset();
                facade.remove_unique(table, &column, &token);
                if let Err(cleanup) = facade.flush() {
                    warn!(
                        target: "redmap::engine",
                        table,
                        id = %id,
                        error = %cleanup,
                        "could not release uniqueness claim after failed save"
                    );
                }
            }
            return Err(err);
        }
        debug!(target: "redmap::engine", table, id = %id, "record saved");
        Ok(Arc::new(stored))
    }

    // ========================================================================
    // Get
    // ========================================================================

    /// Load a record, from the cache when possible
    pub fn get(&self, table: &str, id: &str) -> Result<Option<Arc<Record>>> {
        let schema = self.schema_for("get", table)?;
        self.read();
        self.loading("get", &schema, |facade, fresh| {
            self.load(facade, &schema, id, fresh)
        })
    }

    /// Read one column of a record
    ///
    /// Served from a cached instance when there is one. `Ok(None)` when the
    /// record does not exist.
    pub fn get_field(&self, table: &str, id: &str, column: &str) -> Result<Option<Value>> {
        let schema = self.schema_for("get_field", table)?;
        let field = self.field_for("get_field", &schema, column)?;
        self.read();
        if let Some(cache) = self.active_cache(&schema) {
            if let Some(hit) = cache.get(table, id) {
                return Ok(Some(hit.value(column).clone()));
            }
        }
        self.guarded("get_field", table, |facade| {
            if !facade.exists(table, id)? {
                return Ok(None);
            }
            facade.read_field(table, id, field).map(Some)
        })
    }

    /// Whether a record exists in the store
    pub fn exists(&self, table: &str, id: &str) -> Result<bool> {
        let schema = self.schema_for("exists", table)?;
        self.read();
        self.guarded("exists", schema.table(), |facade| facade.exists(table, id))
    }

    // ========================================================================
    // Update
    // ========================================================================

    fn updatable_fields<'s>(
        &self,
        op: &'static str,
        schema: &'s EntitySchema,
        columns: &[&str],
    ) -> Result<Vec<&'s FieldDescriptor>> {
        let mut fields = Vec::with_capacity(columns.len());
        for column in columns {
            let field = self.field_for(op, schema, column)?;
            if field.is_immutable() {
                return self.fail(
                    op,
                    schema.table(),
                    Error::ImmutableField {
                        table: schema.table().to_string(),
                        column: field.column.clone(),
                    },
                );
            }
            fields.push(field);
        }
        Ok(fields)
    }

    fn rewrite(
        &self,
        op: &'static str,
        schema: &EntitySchema,
        record: &Record,
        fields: &[&FieldDescriptor],
    ) -> Result<()> {
        let table = schema.table();
        let Some(id) = record.id() else {
            return self.fail(
                op,
                table,
                Error::MissingId {
                    table: table.to_string(),
                },
            );
        };
        self.guarded(op, table, |facade| {
            if !facade.exists(table, id)? {
                return Err(Error::MissingRecord {
                    table: table.to_string(),
                    id: id.to_string(),
                });
            }
            for field in fields {
                facade.update(table, id, field, record.value(&field.column))?;
            }
            facade.flush()
        })?;
        self.wrote();
        if let Some(cache) = self.active_cache(schema) {
            cache.evict_other(record);
        }
        Ok(())
    }

    /// Rewrite the named columns of an existing record
    ///
    /// A cached instance other than `record` is evicted as stale.
    ///
    /// # Errors
    ///
    /// - `ImmutableField` for a unique or indexed column, before anything is
    ///   sent to the store
    /// - `MissingId` / `MissingRecord` when the record has no id or does not
    ///   exist
    pub fn update(&self, record: &Record, columns: &[&str]) -> Result<()> {
        let schema = self.schema_for("update", record.table())?;
        let fields = self.updatable_fields("update", &schema, columns)?;
        self.rewrite("update", &schema, record, &fields)
    }

    /// Rewrite every mutable column of an existing record
    pub fn update_all(&self, record: &Record) -> Result<()> {
        let schema = self.schema_for("update_all", record.table())?;
        let fields: Vec<&FieldDescriptor> = schema.mutable_fields().collect();
        self.rewrite("update_all", &schema, record, &fields)
    }

    /// Write one column of an existing record by id
    ///
    /// Any cached copy of the record is evicted.
    pub fn write_field(
        &self,
        table: &str,
        id: &str,
        column: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let schema = self.schema_for("write_field", table)?;
        let field = self.updatable_fields("write_field", &schema, &[column])?[0];
        let value = value.into();
        self.guarded("write_field", table, |facade| {
            if !facade.exists(table, id)? {
                return Err(Error::MissingRecord {
                    table: table.to_string(),
                    id: id.to_string(),
                });
            }
            facade.update(table, id, field, &value)?;
            facade.flush()
        })?;
        self.wrote();
        if let Some(cache) = self.active_cache(&schema) {
            cache.evict(table, id);
        }
        Ok(())
    }

    // ========================================================================
    // Delete
    // ========================================================================

    fn delete_with(
        &self,
        facade: &mut StoreFacade<C>,
        schema: &EntitySchema,
        id: &str,
    ) -> Result<bool> {
        let table = schema.table();
        if !facade.exists(table, id)? {
            return Ok(false);
        }
        let immutables = Self::immutable_fields(schema);
        let tokens = facade.read_tokens(table, id, &immutables)?;
        let tokens: Vec<(&FieldDescriptor, String)> = immutables
            .into_iter()
            .zip(tokens)
            .filter_map(|(field, token)| token.map(|t| (field, t)))
            .collect();

        for (field, token) in &tokens {
            if !field.unique {
                continue;
            }
            let holder = facade.unique(table, &field.column, token)?;
            if holder.as_deref() == Some(id) {
                facade.remove_unique(table, &field.column, token);
            }
        }
        for field in schema.fields() {
            facade.delete_field(table, id, field);
        }
        for (field, token) in &tokens {
            if field.indexed {
                facade.delete_index(table, &field.column, token, id);
            }
        }
        facade.delete_record(table, id);
        facade.delete_id(table, id);
        facade.flush()?;
        debug!(target: "redmap::engine", table, id, "record deleted");
        Ok(true)
    }

    fn delete_id_inner(&self, op: &'static str, schema: &EntitySchema, id: &str) -> Result<bool> {
        let deleted = self.guarded(op, schema.table(), |facade| {
            self.delete_with(facade, schema, id)
        })?;
        if deleted {
            self.wrote();
        }
        if let Some(cache) = self.active_cache(schema) {
            cache.evict(schema.table(), id);
        }
        Ok(deleted)
    }

    /// Delete a record and every structure derived from it
    ///
    /// Unique, indexed and sorted entries are located from the stored values.
    /// A record without an id is a no-op. Returns whether the record existed.
    pub fn delete(&self, record: &Record) -> Result<bool> {
        let schema = self.schema_for("delete", record.table())?;
        match record.id() {
            Some(id) => self.delete_id_inner("delete", &schema, id),
            None => Ok(false),
        }
    }

    /// Delete a record by id
    ///
    /// # Errors
    ///
    /// `MissingRecord` if no such record exists.
    pub fn delete_by_id(&self, table: &str, id: &str) -> Result<()> {
        let schema = self.schema_for("delete_by_id", table)?;
        if self.delete_id_inner("delete_by_id", &schema, id)? {
            Ok(())
        } else {
            self.fail(
                "delete_by_id",
                table,
                Error::MissingRecord {
                    table: table.to_string(),
                    id: id.to_string(),
                },
            )
        }
    }

    /// Delete every key of a table and drop its cached records
    ///
    /// Returns the number of store keys removed.
    pub fn delete_table(&self, table: &str) -> Result<u64> {
        let schema = self.schema_for("delete_table", table)?;
        let removed = self.guarded("delete_table", table, |facade| facade.delete_table(table))?;
        self.wrote();
        if let Some(cache) = &self.cache {
            cache.clear_table(schema.table());
        }
        info!(target: "redmap::engine", table, removed, "table deleted");
        Ok(removed)
    }

    // ========================================================================
    // Control
    // ========================================================================

    /// Send any queued writes
    pub fn flush(&self) -> Result<()> {
        self.guarded("flush", "*", |facade| facade.flush())
    }

    /// Number of queued, unsent store commands
    ///
    /// Zero between operations: every operation flushes or resets.
    pub fn pending_writes(&self) -> usize {
        self.facade.lock().pending_len()
    }

    /// Drop one record from the cache
    pub fn evict(&self, table: &str, id: &str) -> bool {
        self.cache
            .as_ref()
            .map(|c| c.evict(table, id))
            .unwrap_or(false)
    }

    /// Drop every cached record
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// Drop the cached records of one table
    pub fn clear_cache_table(&self, table: &str) {
        if let Some(cache) = &self.cache {
            cache.clear_table(table);
        }
    }

    /// Drain reclaimed cache entries now; returns the count
    pub fn drain_cache(&self) -> usize {
        self.cache
            .as_ref()
            .map(|c| c.drain_reclaimed())
            .unwrap_or(0)
    }

    /// Cache counters, `None` when the cache is disabled
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    /// Install the cache drain listener; ignored when the cache is disabled
    pub fn set_cacheout_listener(&self, listener: impl CacheoutListener + 'static) {
        if let Some(cache) = &self.cache {
            cache.set_listener(listener);
        }
    }

    /// The shared cache, if enabled
    pub fn cache(&self) -> Option<&Arc<ReclaimableCache>> {
        self.cache.as_ref()
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read and write counters
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

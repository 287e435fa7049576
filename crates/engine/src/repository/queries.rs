//! Rank, index, unique and timeline queries
//!
//! Each query resolves the column, asks the facade for ids and, for the
//! record-returning variants, rehydrates them through the cache-aware loader
//! under the same facade lock. Records read from the store are cached once
//! the lock is released. Ids whose record vanished between the query
//! and the load are skipped.

use super::{log_failure, PersistenceEngine};
use crate::clock::millis_to_datetime;
use crate::facade::{value_token, StoreFacade};
use chrono::{DateTime, Utc};
use redmap_core::{EntitySchema, Error, FieldDescriptor, Record, Result, Value};
use redmap_storage::Connection;
use std::sync::Arc;

impl<C: Connection> PersistenceEngine<C> {
    fn rehydrate(
        &self,
        facade: &mut StoreFacade<C>,
        schema: &EntitySchema,
        ids: Vec<String>,
        fresh: &mut Vec<Arc<Record>>,
    ) -> Result<Vec<Arc<Record>>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.load(facade, schema, &id, fresh)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn indexed_field<'s>(
        &self,
        op: &'static str,
        schema: &'s EntitySchema,
        column: &str,
    ) -> Result<&'s FieldDescriptor> {
        let field = self.field_for(op, schema, column)?;
        if field.indexed {
            Ok(field)
        } else {
            self.fail(
                op,
                schema.table(),
                Error::schema(format!("{}.{} is not indexed", schema.table(), column)),
            )
        }
    }

    fn unique_field<'s>(
        &self,
        op: &'static str,
        schema: &'s EntitySchema,
        column: &str,
    ) -> Result<&'s FieldDescriptor> {
        let field = self.field_for(op, schema, column)?;
        if field.unique {
            Ok(field)
        } else {
            self.fail(
                op,
                schema.table(),
                Error::schema(format!("{}.{} is not unique", schema.table(), column)),
            )
        }
    }

    fn lookup_token(
        &self,
        op: &'static str,
        schema: &EntitySchema,
        field: &FieldDescriptor,
        value: &Value,
    ) -> Result<Option<String>> {
        value_token(field, value).map_err(|err| {
            log_failure(op, schema.table(), &err);
            err
        })
    }

    // ========================================================================
    // Rank sets
    // ========================================================================

    /// Ids at rank positions `start..=stop` of a sorted column
    ///
    /// Negative positions count from the end, as in the store. Order follows
    /// the column: ascending score, or descending when `big_first`.
    pub fn range_ids(
        &self,
        table: &str,
        column: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>> {
        let schema = self.schema_for("range", table)?;
        let field = self.field_for("range", &schema, column)?;
        self.read();
        self.guarded("range", table, |facade| facade.range(table, field, start, stop))
    }

    /// Records at rank positions `start..=stop` of a sorted column
    pub fn range(
        &self,
        table: &str,
        column: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<Arc<Record>>> {
        let schema = self.schema_for("range", table)?;
        let field = self.field_for("range", &schema, column)?;
        self.read();
        self.loading("range", &schema, |facade, fresh| {
            let ids = facade.range(table, field, start, stop)?;
            self.rehydrate(facade, &schema, ids, fresh)
        })
    }

    /// Ids whose sorted-column value lies in `min..=max`
    pub fn score_range_ids(
        &self,
        table: &str,
        column: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>> {
        let schema = self.schema_for("score_range", table)?;
        let field = self.field_for("score_range", &schema, column)?;
        self.read();
        self.guarded("score_range", table, |facade| {
            facade.score_range(table, field, min, max)
        })
    }

    /// Records whose sorted-column value lies in `min..=max`
    pub fn score_range(
        &self,
        table: &str,
        column: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<Arc<Record>>> {
        let schema = self.schema_for("score_range", table)?;
        let field = self.field_for("score_range", &schema, column)?;
        self.read();
        self.loading("score_range", &schema, |facade, fresh| {
            let ids = facade.score_range(table, field, min, max)?;
            self.rehydrate(facade, &schema, ids, fresh)
        })
    }

    /// Zero-based rank of a record in a sorted column, `None` if unranked
    pub fn rank(&self, table: &str, column: &str, id: &str) -> Result<Option<u64>> {
        let schema = self.schema_for("rank", table)?;
        let field = self.field_for("rank", &schema, column)?;
        self.read();
        self.guarded("rank", table, |facade| facade.rank_of(table, field, id))
    }

    // ========================================================================
    // Secondary indexes
    // ========================================================================

    /// Ids indexed under `value`, oldest first, positions `start..=stop`
    ///
    /// A null value is never indexed and yields no ids.
    pub fn index_ids(
        &self,
        table: &str,
        column: &str,
        value: impl Into<Value>,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>> {
        let schema = self.schema_for("index", table)?;
        let field = self.indexed_field("index", &schema, column)?;
        let Some(token) = self.lookup_token("index", &schema, field, &value.into())? else {
            return Ok(Vec::new());
        };
        self.read();
        self.guarded("index", table, |facade| {
            facade.index(table, column, &token, start, stop)
        })
    }

    /// Records indexed under `value`, oldest first, positions `start..=stop`
    pub fn index(
        &self,
        table: &str,
        column: &str,
        value: impl Into<Value>,
        start: i64,
        stop: i64,
    ) -> Result<Vec<Arc<Record>>> {
        let schema = self.schema_for("index", table)?;
        let field = self.indexed_field("index", &schema, column)?;
        let Some(token) = self.lookup_token("index", &schema, field, &value.into())? else {
            return Ok(Vec::new());
        };
        self.read();
        self.loading("index", &schema, |facade, fresh| {
            let ids = facade.index(table, column, &token, start, stop)?;
            self.rehydrate(facade, &schema, ids, fresh)
        })
    }

    /// Number of ids indexed under `value`
    pub fn index_size(&self, table: &str, column: &str, value: impl Into<Value>) -> Result<u64> {
        let schema = self.schema_for("index_size", table)?;
        let field = self.indexed_field("index_size", &schema, column)?;
        let Some(token) = self.lookup_token("index_size", &schema, field, &value.into())? else {
            return Ok(0);
        };
        self.read();
        self.guarded("index_size", table, |facade| {
            facade.index_size(table, column, &token)
        })
    }

    // ========================================================================
    // Unique lookups
    // ========================================================================

    /// Record holding the unique `value`, if any
    pub fn unique(
        &self,
        table: &str,
        column: &str,
        value: impl Into<Value>,
    ) -> Result<Option<Arc<Record>>> {
        let schema = self.schema_for("unique", table)?;
        let field = self.unique_field("unique", &schema, column)?;
        let Some(token) = self.lookup_token("unique", &schema, field, &value.into())? else {
            return Ok(None);
        };
        self.read();
        self.loading("unique", &schema, |facade, fresh| {
            match facade.unique(table, column, &token)? {
                Some(id) => self.load(facade, &schema, &id, fresh),
                None => Ok(None),
            }
        })
    }

    /// Whether some record holds the unique `value`
    pub fn unique_exists(
        &self,
        table: &str,
        column: &str,
        value: impl Into<Value>,
    ) -> Result<bool> {
        let schema = self.schema_for("unique_exists", table)?;
        let field = self.unique_field("unique_exists", &schema, column)?;
        let Some(token) = self.lookup_token("unique_exists", &schema, field, &value.into())? else {
            return Ok(false);
        };
        self.read();
        self.guarded("unique_exists", table, |facade| {
            facade.unique_exists(table, column, &token)
        })
    }

    // ========================================================================
    // Timeline
    // ========================================================================

    /// Timeline ids at positions `start..=stop`, oldest first
    pub fn all_ids(&self, table: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.schema_for("all", table)?;
        self.read();
        self.guarded("all", table, |facade| facade.all(table, start, stop))
    }

    /// Timeline records at positions `start..=stop`, oldest first
    pub fn all(&self, table: &str, start: i64, stop: i64) -> Result<Vec<Arc<Record>>> {
        let schema = self.schema_for("all", table)?;
        self.read();
        self.loading("all", &schema, |facade, fresh| {
            let ids = facade.all(table, start, stop)?;
            self.rehydrate(facade, &schema, ids, fresh)
        })
    }

    /// Number of ids in the timeline
    pub fn all_size(&self, table: &str) -> Result<u64> {
        self.schema_for("all_size", table)?;
        self.read();
        self.guarded("all_size", table, |facade| facade.all_size(table))
    }

    /// Records created in `[start, end)`, oldest first
    pub fn created_between(
        &self,
        table: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Arc<Record>>> {
        let schema = self.schema_for("created_between", table)?;
        self.read();
        self.loading("created_between", &schema, |facade, fresh| {
            let ids = facade.all_between(table, start.timestamp_millis(), end.timestamp_millis())?;
            self.rehydrate(facade, &schema, ids, fresh)
        })
    }

    /// Number of records created in `[start, end)`
    pub fn created_between_size(
        &self,
        table: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        self.schema_for("created_between_size", table)?;
        self.read();
        self.guarded("created_between_size", table, |facade| {
            facade
                .all_between(table, start.timestamp_millis(), end.timestamp_millis())
                .map(|ids| ids.len() as u64)
        })
    }

    /// When a record entered the timeline
    pub fn create_time(&self, table: &str, id: &str) -> Result<Option<DateTime<Utc>>> {
        self.schema_for("create_time", table)?;
        self.read();
        let millis = self.guarded("create_time", table, |facade| facade.create_time(table, id))?;
        Ok(millis.and_then(millis_to_datetime))
    }
}

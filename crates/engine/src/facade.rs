//! Record-level store primitives
//!
//! `StoreFacade` turns field writes, deletes and queries into store commands.
//! Writes are queued on a [`Pipeline`] and sent by [`StoreFacade::flush`];
//! queries and the uniqueness claim go out immediately.
//!
//! ## Keyspace
//!
//! | Structure | Key | Command family |
//! |-----------|-----|----------------|
//! | record hash (scalars, blobs, existence marker) | `table:id:__all__` | HSET / HGET |
//! | list or set column | `table:id:column` | RPUSH / LRANGE |
//! | map column | `table:id:column` | HSET / HGETALL |
//! | rank set | `table:column:__sorted__` | ZADD / ZRANGE / ZRANK |
//! | unique claim | `table:column:value:__unique__` | SETNX / GET |
//! | secondary index | `table:column:value:__index__` | ZADD / ZRANGE |
//! | timeline | `table:__all_ids__` | ZADD NX / ZRANGEBYSCORE |
//!
//! ## Error recovery
//!
//! A failed call may leave half an operation queued. Callers invoke
//! [`StoreFacade::reset`] to drop it before the next operation.

use crate::clock::Clock;
use crate::id_gen::Counter;
use redmap_core::codec;
use redmap_core::keys;
use redmap_core::{Error, FieldDescriptor, FieldKind, Result, ScalarType, Value};
use redmap_storage::{Command, Connection, Pipeline, Reply, Slot};
use std::ops::Bound;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Record-level operations over one store connection
pub struct StoreFacade<C: Connection> {
    conn: C,
    pipe: Pipeline,
    clock: Arc<dyn Clock>,
}

/// Scalar type of a unique or indexed column
fn scalar_type(field: &FieldDescriptor) -> Result<ScalarType> {
    match field.kind {
        FieldKind::Scalar { ty } => Ok(ty),
        other => Err(Error::UnsupportedType(format!(
            "{} column '{}' has no canonical token",
            other.name(),
            field.column
        ))),
    }
}

/// Canonical token of a unique or indexed value, `None` for null
pub fn value_token(field: &FieldDescriptor, value: &Value) -> Result<Option<String>> {
    if value.is_null() {
        return Ok(None);
    }
    codec::token(scalar_type(field)?, value).map(Some)
}

fn dedup(values: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(values.len());
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

/// The value a later read of `field` decodes after `value` is written
///
/// Absent columns come back as zero values or empty collections unless the
/// field is nullable, set elements lose duplicates and map keys keep their
/// last value.
pub fn stored_form(field: &FieldDescriptor, value: &Value) -> Result<Value> {
    let element = |ty: ScalarType, v: &Value| {
        codec::decode_element(ty, &codec::encode_element(ty, v)?)
    };
    match field.kind {
        FieldKind::Scalar { ty } => {
            let raw = match value {
                Value::Null => None,
                present => Some(codec::encode_scalar(ty, present)?),
            };
            codec::decode_scalar(ty, raw.as_deref(), field.nullable)
        }
        FieldKind::Blob => {
            let raw = match value {
                Value::Null => None,
                present => Some(codec::encode_blob(present)?),
            };
            Ok(codec::decode_blob(raw.as_deref(), field.nullable))
        }
        FieldKind::List { element: ty } | FieldKind::Set { element: ty } => {
            let items = match value {
                Value::List(items) | Value::Set(items) => items
                    .iter()
                    .map(|v| element(ty, v))
                    .collect::<Result<Vec<_>>>()?,
                _ => Vec::new(),
            };
            if items.is_empty() && field.nullable {
                return Ok(Value::Null);
            }
            Ok(match field.kind {
                FieldKind::Set { .. } => Value::Set(dedup(items)),
                _ => Value::List(items),
            })
        }
        FieldKind::Map { key, value: value_ty } => {
            let mut entries: Vec<(Value, Value)> = Vec::new();
            if let Value::Map(pairs) = value {
                for (k, v) in pairs {
                    let (k, v) = (element(key, k)?, element(value_ty, v)?);
                    match entries.iter_mut().find(|(existing, _)| *existing == k) {
                        Some(slot) => slot.1 = v,
                        None => entries.push((k, v)),
                    }
                }
            }
            if entries.is_empty() && field.nullable {
                return Ok(Value::Null);
            }
            Ok(Value::Map(entries))
        }
    }
}

impl<C: Connection> StoreFacade<C> {
    /// Wrap a connection
    pub fn new(conn: C, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn,
            pipe: Pipeline::new(),
            clock,
        }
    }

    fn queue(&mut self, command: Command) -> Slot {
        self.pipe.queue(command)
    }

    fn now(&self) -> f64 {
        self.clock.now_millis() as f64
    }

    fn execute(&mut self, command: Command) -> Result<Reply> {
        self.conn.execute(command)?.into_result()
    }

    // ========================================================================
    // Writes (queued)
    // ========================================================================

    /// Mark the record as existing, independently of its columns
    pub fn mark_exists(&mut self, table: &str, id: &str) {
        self.queue(Command::HSet {
            key: keys::record_key(table, id),
            fields: vec![(
                keys::EXISTENCE_FIELD.as_bytes().to_vec(),
                id.as_bytes().to_vec(),
            )],
        });
    }

    /// Write any column, dispatching on its kind
    ///
    /// Every value is encoded before the first command is queued, so an
    /// encoding error leaves the pipeline untouched.
    pub fn write(
        &mut self,
        table: &str,
        id: &str,
        field: &FieldDescriptor,
        value: &Value,
    ) -> Result<()> {
        match field.kind {
            FieldKind::Scalar { .. } | FieldKind::Blob => {
                self.write_scalar(table, id, field, value)
            }
            FieldKind::List { .. } | FieldKind::Set { .. } => {
                self.write_collection(table, id, field, value)
            }
            FieldKind::Map { .. } => self.write_map(table, id, field, value),
        }
    }

    /// Set a scalar or blob column in the record hash
    ///
    /// Sorted columns are also scored into the rank set, which is then trimmed
    /// to `size_cap` keeping the top entries by the configured order. `Null`
    /// removes the column and its rank entry.
    pub fn write_scalar(
        &mut self,
        table: &str,
        id: &str,
        field: &FieldDescriptor,
        value: &Value,
    ) -> Result<()> {
        if value.is_null() {
            self.queue(Command::HDel {
                key: keys::record_key(table, id),
                fields: vec![field.column.as_bytes().to_vec()],
            });
            if field.sort {
                self.queue(Command::ZRem {
                    key: keys::rank_key(table, &field.column),
                    member: id.to_string(),
                });
            }
            return Ok(());
        }

        let encoded = match field.kind {
            FieldKind::Scalar { ty } => codec::encode_scalar(ty, value)?,
            FieldKind::Blob => codec::encode_blob(value)?,
            other => {
                return Err(Error::UnsupportedType(format!(
                    "{} column '{}' is not stored in the record hash",
                    other.name(),
                    field.column
                )))
            }
        };
        let score = if field.sort {
            let score = codec::to_score(value)?;
            if score.is_nan() {
                return Err(Error::InvalidValue(format!(
                    "NaN cannot rank column '{}'",
                    field.column
                )));
            }
            Some(score)
        } else {
            None
        };

        self.queue(Command::HSet {
            key: keys::record_key(table, id),
            fields: vec![(field.column.as_bytes().to_vec(), encoded)],
        });
        if let Some(score) = score {
            self.rank(table, id, field, score);
        }
        Ok(())
    }

    fn rank(&mut self, table: &str, id: &str, field: &FieldDescriptor, score: f64) {
        let key = keys::rank_key(table, &field.column);
        self.queue(Command::ZAdd {
            key: key.clone(),
            score,
            member: id.to_string(),
            nx: false,
        });
        if field.size_cap > 0 {
            let cap = field.size_cap as i64;
            let (start, stop) = if field.big_first {
                (0, -cap - 1)
            } else {
                (cap, -1)
            };
            self.queue(Command::ZRemRangeByRank { key, start, stop });
        }
    }

    /// Replace a list or set column
    ///
    /// The aux key is deleted first, so `Null` or an empty collection clears
    /// it. Null elements are written as the codec's null sentinel.
    pub fn write_collection(
        &mut self,
        table: &str,
        id: &str,
        field: &FieldDescriptor,
        value: &Value,
    ) -> Result<()> {
        let (element, expected) = match field.kind {
            FieldKind::List { element } => (element, "list"),
            FieldKind::Set { element } => (element, "set"),
            other => {
                return Err(Error::UnsupportedType(format!(
                    "{} column '{}' is not a collection",
                    other.name(),
                    field.column
                )))
            }
        };
        let elements = match (value, field.kind) {
            (Value::Null, _) => Vec::new(),
            (Value::List(items), FieldKind::List { .. }) => items.clone(),
            (Value::Set(items), FieldKind::Set { .. }) => dedup(items.clone()),
            (other, _) => {
                return Err(Error::TypeMismatch {
                    expected,
                    actual: other.type_name(),
                })
            }
        };
        let encoded = elements
            .iter()
            .map(|v| codec::encode_element(element, v))
            .collect::<Result<Vec<_>>>()?;

        let key = keys::field_key(table, id, &field.column);
        self.queue(Command::Del {
            keys: vec![key.clone()],
        });
        if !encoded.is_empty() {
            self.queue(Command::RPush {
                key,
                values: encoded,
            });
        }
        Ok(())
    }

    /// Replace a map column
    pub fn write_map(
        &mut self,
        table: &str,
        id: &str,
        field: &FieldDescriptor,
        value: &Value,
    ) -> Result<()> {
        let FieldKind::Map { key: key_ty, value: value_ty } = field.kind else {
            return Err(Error::UnsupportedType(format!(
                "{} column '{}' is not a map",
                field.kind.name(),
                field.column
            )));
        };
        let entries: &[(Value, Value)] = match value {
            Value::Null => &[],
            Value::Map(entries) => entries,
            other => {
                return Err(Error::TypeMismatch {
                    expected: "map",
                    actual: other.type_name(),
                })
            }
        };
        let encoded = entries
            .iter()
            .map(|(k, v)| {
                Ok((
                    codec::encode_element(key_ty, k)?,
                    codec::encode_element(value_ty, v)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let key = keys::field_key(table, id, &field.column);
        self.queue(Command::Del {
            keys: vec![key.clone()],
        });
        if !encoded.is_empty() {
            self.queue(Command::HSet {
                key,
                fields: encoded,
            });
        }
        Ok(())
    }

    /// Rewrite a mutable column; refuses unique and indexed columns
    ///
    /// Returns `Ok(false)` without queuing anything for a refused column.
    pub fn update(
        &mut self,
        table: &str,
        id: &str,
        field: &FieldDescriptor,
        value: &Value,
    ) -> Result<bool> {
        if field.is_immutable() {
            warn!(
                target: "redmap::facade",
                table,
                column = %field.column,
                "refusing in-place update"
            );
            return Ok(false);
        }
        self.write(table, id, field, value)?;
        Ok(true)
    }

    /// Add `id` to the secondary index of `token`, scored by the current time
    ///
    /// An id already in the index keeps its original position.
    pub fn write_index(&mut self, table: &str, column: &str, token: &str, id: &str) {
        let score = self.now();
        self.queue(Command::ZAdd {
            key: keys::index_key(table, column, token),
            score,
            member: id.to_string(),
            nx: true,
        });
    }

    /// Remove `id` from the secondary index of `token`
    pub fn delete_index(&mut self, table: &str, column: &str, token: &str, id: &str) {
        self.queue(Command::ZRem {
            key: keys::index_key(table, column, token),
            member: id.to_string(),
        });
    }

    /// Release a uniqueness claim
    pub fn remove_unique(&mut self, table: &str, column: &str, token: &str) {
        self.queue(Command::Del {
            keys: vec![keys::unique_key(table, column, token)],
        });
    }

    /// Remove a column's aux key and rank entry
    ///
    /// Scalars and blobs live in the record hash and go with it.
    pub fn delete_field(&mut self, table: &str, id: &str, field: &FieldDescriptor) {
        if field.kind.is_aux() {
            self.queue(Command::Del {
                keys: vec![keys::field_key(table, id, &field.column)],
            });
        }
        if field.sort {
            self.queue(Command::ZRem {
                key: keys::rank_key(table, &field.column),
                member: id.to_string(),
            });
        }
    }

    /// Remove the record hash
    pub fn delete_record(&mut self, table: &str, id: &str) {
        self.queue(Command::Del {
            keys: vec![keys::record_key(table, id)],
        });
    }

    /// Register `id` in the timeline; the first registration's time sticks
    pub fn add_id(&mut self, table: &str, id: &str) {
        let score = self.now();
        self.queue(Command::ZAdd {
            key: keys::timeline_key(table),
            score,
            member: id.to_string(),
            nx: true,
        });
    }

    /// Remove `id` from the timeline
    pub fn delete_id(&mut self, table: &str, id: &str) {
        self.queue(Command::ZRem {
            key: keys::timeline_key(table),
            member: id.to_string(),
        });
    }

    // ========================================================================
    // Uniqueness (immediate)
    // ========================================================================

    /// Claim `token` for `id` with an atomic set-if-absent
    ///
    /// Succeeds when the claim is new or already held by `id`.
    pub fn write_unique(
        &mut self,
        table: &str,
        column: &str,
        token: &str,
        id: &str,
    ) -> Result<bool> {
        let key = keys::unique_key(table, column, token);
        let claimed = self
            .execute(Command::SetNx {
                key,
                value: id.as_bytes().to_vec(),
            })?
            .into_bool()?;
        if claimed {
            return Ok(true);
        }
        let holder = self.unique(table, column, token)?;
        Ok(holder.as_deref() == Some(id))
    }

    /// Id holding the claim on `token`
    pub fn unique(&mut self, table: &str, column: &str, token: &str) -> Result<Option<String>> {
        self.execute(Command::Get {
            key: keys::unique_key(table, column, token),
        })?
        .into_string()
    }

    /// Whether `token` is claimed
    pub fn unique_exists(&mut self, table: &str, column: &str, token: &str) -> Result<bool> {
        self.execute(Command::Exists {
            key: keys::unique_key(table, column, token),
        })?
        .into_bool()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Whether the record hash exists
    pub fn exists(&mut self, table: &str, id: &str) -> Result<bool> {
        self.execute(Command::Exists {
            key: keys::record_key(table, id),
        })?
        .into_bool()
    }

    fn read_command(table: &str, id: &str, field: &FieldDescriptor) -> Command {
        match field.kind {
            FieldKind::Scalar { .. } | FieldKind::Blob => Command::HGet {
                key: keys::record_key(table, id),
                field: field.column.as_bytes().to_vec(),
            },
            FieldKind::List { .. } | FieldKind::Set { .. } => Command::LRange {
                key: keys::field_key(table, id, &field.column),
                start: 0,
                stop: -1,
            },
            FieldKind::Map { .. } => Command::HGetAll {
                key: keys::field_key(table, id, &field.column),
            },
        }
    }

    fn decode_reply(field: &FieldDescriptor, reply: Reply) -> Result<Value> {
        match field.kind {
            FieldKind::Scalar { ty } => {
                codec::decode_scalar(ty, reply.into_bytes()?.as_deref(), field.nullable)
            }
            FieldKind::Blob => Ok(codec::decode_blob(
                reply.into_bytes()?.as_deref(),
                field.nullable,
            )),
            FieldKind::List { element } | FieldKind::Set { element } => {
                let raw = reply.into_bytes_array()?;
                if raw.is_empty() && field.nullable {
                    return Ok(Value::Null);
                }
                let items = raw
                    .iter()
                    .map(|b| codec::decode_element(element, b))
                    .collect::<Result<Vec<_>>>()?;
                Ok(match field.kind {
                    FieldKind::Set { .. } => Value::Set(dedup(items)),
                    _ => Value::List(items),
                })
            }
            FieldKind::Map { key, value } => {
                let pairs = reply.into_pairs()?;
                if pairs.is_empty() && field.nullable {
                    return Ok(Value::Null);
                }
                pairs
                    .iter()
                    .map(|(k, v)| {
                        Ok((
                            codec::decode_element(key, k)?,
                            codec::decode_element(value, v)?,
                        ))
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Map)
            }
        }
    }

    /// Read a whole record in one round trip
    ///
    /// Queues an existence check plus one read per field, syncs once, then
    /// decodes. Returns `None` when the record hash does not exist.
    pub fn read_fields(
        &mut self,
        table: &str,
        id: &str,
        fields: &[FieldDescriptor],
    ) -> Result<Option<Vec<Value>>> {
        let mut batch = Pipeline::new();
        let exists = batch.queue(Command::Exists {
            key: keys::record_key(table, id),
        });
        let slots: Vec<Slot> = fields
            .iter()
            .map(|f| batch.queue(Self::read_command(table, id, f)))
            .collect();
        let mut replies = batch.sync(&mut self.conn)?;
        trace!(target: "redmap::facade", table, id, fields = fields.len(), "batched read");

        let mut take = |slot: Slot| {
            replies
                .get_mut(slot.index())
                .map(|r| std::mem::replace(r, Reply::Nil))
                .ok_or_else(|| Error::store("pipeline returned too few replies"))
        };
        if !take(exists)?.into_bool()? {
            return Ok(None);
        }
        let mut values = Vec::with_capacity(fields.len());
        for (field, slot) in fields.iter().zip(slots) {
            values.push(Self::decode_reply(field, take(slot)?)?);
        }
        Ok(Some(values))
    }

    /// Read one column
    pub fn read_field(&mut self, table: &str, id: &str, field: &FieldDescriptor) -> Result<Value> {
        let reply = self.execute(Self::read_command(table, id, field))?;
        Self::decode_reply(field, reply)
    }

    /// Stored tokens of unique or indexed columns, for cleanup on re-save
    pub fn read_tokens(
        &mut self,
        table: &str,
        id: &str,
        fields: &[&FieldDescriptor],
    ) -> Result<Vec<Option<String>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut batch = Pipeline::new();
        for field in fields {
            batch.queue(Command::HGet {
                key: keys::record_key(table, id),
                field: field.column.as_bytes().to_vec(),
            });
        }
        batch
            .sync(&mut self.conn)?
            .into_iter()
            .map(Reply::into_string)
            .collect()
    }

    // ========================================================================
    // Rank, index and timeline queries (immediate)
    // ========================================================================

    fn require_sorted(field: &FieldDescriptor) -> Result<()> {
        if field.sort {
            Ok(())
        } else {
            Err(Error::schema(format!("column '{}' is not sorted", field.column)))
        }
    }

    /// Ids at rank positions `start..=stop`, in the column's rank order
    pub fn range(
        &mut self,
        table: &str,
        field: &FieldDescriptor,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>> {
        Self::require_sorted(field)?;
        self.execute(Command::ZRange {
            key: keys::rank_key(table, &field.column),
            start,
            stop,
            rev: field.big_first,
        })?
        .into_string_array()
    }

    /// Ids whose score lies in `min..=max`, in the column's rank order
    pub fn score_range(
        &mut self,
        table: &str,
        field: &FieldDescriptor,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>> {
        Self::require_sorted(field)?;
        self.execute(Command::ZRangeByScore {
            key: keys::rank_key(table, &field.column),
            min: Bound::Included(min),
            max: Bound::Included(max),
            rev: field.big_first,
        })?
        .into_string_array()
    }

    /// Position of `id` in the column's rank order
    pub fn rank_of(
        &mut self,
        table: &str,
        field: &FieldDescriptor,
        id: &str,
    ) -> Result<Option<u64>> {
        Self::require_sorted(field)?;
        Ok(self
            .execute(Command::ZRank {
                key: keys::rank_key(table, &field.column),
                member: id.to_string(),
                rev: field.big_first,
            })?
            .into_optional_integer()?
            .map(|r| r as u64))
    }

    /// Ids indexed under `token`, oldest first
    pub fn index(
        &mut self,
        table: &str,
        column: &str,
        token: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>> {
        self.execute(Command::ZRange {
            key: keys::index_key(table, column, token),
            start,
            stop,
            rev: false,
        })?
        .into_string_array()
    }

    /// Number of ids indexed under `token`
    pub fn index_size(&mut self, table: &str, column: &str, token: &str) -> Result<u64> {
        Ok(self
            .execute(Command::ZCard {
                key: keys::index_key(table, column, token),
            })?
            .into_integer()? as u64)
    }

    /// Timeline ids at positions `start..=stop`, oldest first
    pub fn all(&mut self, table: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.execute(Command::ZRange {
            key: keys::timeline_key(table),
            start,
            stop,
            rev: false,
        })?
        .into_string_array()
    }

    /// Timeline ids created in `[start_ms, end_ms)`, oldest first
    pub fn all_between(&mut self, table: &str, start_ms: i64, end_ms: i64) -> Result<Vec<String>> {
        self.execute(Command::ZRangeByScore {
            key: keys::timeline_key(table),
            min: Bound::Included(start_ms as f64),
            max: Bound::Excluded(end_ms as f64),
            rev: false,
        })?
        .into_string_array()
    }

    /// Number of ids in the timeline
    pub fn all_size(&mut self, table: &str) -> Result<u64> {
        Ok(self
            .execute(Command::ZCard {
                key: keys::timeline_key(table),
            })?
            .into_integer()? as u64)
    }

    /// Timeline score of `id` in epoch milliseconds
    pub fn create_time(&mut self, table: &str, id: &str) -> Result<Option<i64>> {
        Ok(self
            .execute(Command::ZScore {
                key: keys::timeline_key(table),
                member: id.to_string(),
            })?
            .into_score()?
            .map(|s| s as i64))
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Delete every key of `table`; returns the number removed
    pub fn delete_table(&mut self, table: &str) -> Result<u64> {
        let doomed = self
            .execute(Command::Keys {
                pattern: keys::table_pattern(table),
            })?
            .into_string_array()?;
        if doomed.is_empty() {
            return Ok(0);
        }
        let removed = self.execute(Command::Del { keys: doomed })?.into_integer()?;
        debug!(target: "redmap::facade", table, removed, "table deleted");
        Ok(removed as u64)
    }

    /// Send queued writes and wait for every reply
    ///
    /// A command-level error reply fails the flush with `Error::Store`.
    pub fn flush(&mut self) -> Result<()> {
        let replies = self.pipe.sync(&mut self.conn)?;
        for reply in replies {
            reply.into_result()?;
        }
        Ok(())
    }

    /// Drop queued writes after a failure
    pub fn reset(&mut self) {
        let dropped = self.pipe.discard();
        if dropped > 0 {
            debug!(target: "redmap::facade", dropped, "pipeline reset");
        }
    }

    /// Number of queued, unsent commands
    pub fn pending_len(&self) -> usize {
        self.pipe.len()
    }
}

impl<C: Connection> Counter for StoreFacade<C> {
    fn incr(&mut self, key: &str) -> Result<i64> {
        self.execute(Command::Incr {
            key: key.to_string(),
        })?
        .into_integer()
    }
}

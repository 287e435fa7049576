//! redmap - schema-driven record persistence over a Redis-like store
//!
//! A record type is described once by an [`EntitySchema`]: table name, id
//! policy and an ordered list of typed fields. The [`PersistenceEngine`]
//! spreads each record over hashes, lists and sorted sets, and keeps the
//! derived structures (rank sets, secondary indexes, uniqueness claims and
//! the creation timeline) in step with every save and delete.
//!
//! # Quick Start
//!
//! ```
//! use redmap::{EntitySchema, FieldDescriptor, MemoryStore, PersistenceEngine, Record, ScalarType};
//!
//! let schema = EntitySchema::builder("user")
//!     .generated_ids()
//!     .field(FieldDescriptor::scalar("email", ScalarType::String).unique())
//!     .field(FieldDescriptor::scalar("karma", ScalarType::I64).sorted(100, true))
//!     .build()?;
//!
//! let engine = PersistenceEngine::builder(MemoryStore::new().connect())
//!     .schema(schema)
//!     .build()?;
//!
//! let saved = engine.save(Record::new("user").with("email", "a@x.io").with("karma", 7i64))?;
//! let loaded = engine.get("user", saved.id().unwrap_or_default())?;
//! assert_eq!(loaded.as_deref(), Some(&*saved));
//! # Ok::<(), redmap::Error>(())
//! ```
//!
//! # Architecture
//!
//! - `redmap-core`: values, schemas, records, the codec and the keyspace
//! - `redmap-storage`: the store contract (commands, replies, pipelines)
//!   and an in-process store with Redis semantics
//! - `redmap-engine`: the store facade, cache, id generators and engine

pub use redmap_core::{
    codec, keys, EntitySchema, EntitySchemaBuilder, Error, FieldDescriptor, FieldKind, Record,
    Result, ScalarType, Value,
};
pub use redmap_engine::{
    CacheConfig, CacheStats, CacheoutListener, Clock, EngineBuilder, EngineConfig, EngineStats,
    IdGenerator, IdGenerators, ManualClock, PersistenceEngine, ReclaimableCache, StoreFacade,
    SystemClock, CONFIG_FILE_NAME,
};
pub use redmap_storage::{Command, Connection, MemoryConnection, MemoryStore, Pipeline, Reply};

//! Persistence engine for redmap
//!
//! This crate maps schema-described records onto a Redis-like store:
//! - StoreFacade: record-level primitives over a pipelined connection
//! - PersistenceEngine: save/get/update/delete plus rank, index, unique and
//!   timeline queries
//! - ReclaimableCache: optional process cache of weakly held records
//! - IdGenerators: pluggable id assignment by name
//! - EngineConfig: `redmap.toml` settings
//!
//! The engine is the only component that knows about:
//! - How a record spreads over hashes, lists and sorted sets
//! - Cache coherence after writes and deletes
//! - Error recovery (pipeline reset) at the operation boundary

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod facade;
pub mod id_gen;
pub mod repository;
pub mod schemas;

pub use cache::{CacheStats, CacheoutListener, ReclaimableCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, EngineConfig, CONFIG_FILE_NAME};
pub use facade::StoreFacade;
pub use id_gen::{Counter, CounterGenerator, IdGenerator, IdGenerators, UuidGenerator};
pub use repository::{EngineBuilder, EngineStats, PersistenceEngine};
pub use schemas::SchemaRegistry;

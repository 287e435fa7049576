//! Store layer for redmap
//!
//! This crate defines the downstream contract the engine talks to:
//! - Command / Reply: a Redis-like command set as plain data
//! - Connection: one ordered command channel, single or pipelined
//! - Pipeline: queued commands flushed in one round trip, replies by Slot
//! - MemoryStore: in-process store with Redis semantics (strings, lists,
//!   hashes, sorted sets) used by tests and embedded deployments
//!
//! # Sorted sets
//!
//! `SortedSet` orders members by `(score, member)` with FxHashMap lookups by
//! member, so rank, score-range and trim operations match Redis.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod connection;
pub mod glob;
pub mod memory;
pub mod zset;

pub use command::{Command, Reply};
pub use connection::{Connection, Pipeline, Slot};
pub use glob::glob_match;
pub use memory::{MemoryConnection, MemoryStore};
pub use zset::SortedSet;

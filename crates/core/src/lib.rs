//! Core types for redmap
//!
//! This crate defines the foundational, store-independent pieces:
//! - Value / ScalarType: typed column values
//! - Schema: EntitySchema, FieldDescriptor, FieldKind (validated once)
//! - Record: one entity instance
//! - codec: value <-> store byte-string conversion, null sentinel
//! - keys: the frozen keyspace layout
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod keys;
pub mod record;
pub mod schema;
pub mod value;

pub use error::{Error, Result};
pub use record::Record;
pub use schema::{EntitySchema, EntitySchemaBuilder, FieldDescriptor, FieldKind};
pub use value::{ScalarType, Value};

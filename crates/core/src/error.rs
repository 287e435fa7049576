//! Error types for redmap
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## Taxonomy
//!
//! - `Schema`, `UnsupportedType`, `TypeMismatch`: fatal, the call is aborted
//!   before anything reaches the store.
//! - `UniquenessConflict`: the uniqueness claim is already held by another id.
//! - `MissingRecord`: an operation that requires an existing record found none.
//!   Plain lookups report absence as `Ok(None)` instead.
//! - `Store`: transport or protocol failure from the downstream store.

use thiserror::Error;

/// Result type alias for redmap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for redmap
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Malformed or missing entity schema
    #[error("Schema error: {0}")]
    Schema(String),

    /// The codec cannot handle the declared type of a field
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// A record value does not match the type its column declares
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Declared type name
        expected: &'static str,
        /// Type name of the offending value
        actual: &'static str,
    },

    /// Raw store data could not be decoded into the declared type
    #[error("Decode error: {0}")]
    Decode(String),

    /// A value is not acceptable for the operation
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// The record has no id and its schema does not generate one
    #[error("Record of '{table}' has no id")]
    MissingId {
        /// Table of the record
        table: String,
    },

    /// Another record already holds the unique value
    #[error("Unique value '{value}' of {table}.{column} is already claimed")]
    UniquenessConflict {
        /// Table of the record
        table: String,
        /// Unique column
        column: String,
        /// Canonical form of the contested value
        value: String,
    },

    /// The requested record does not exist
    #[error("Record {table}:{id} does not exist")]
    MissingRecord {
        /// Table of the record
        table: String,
        /// Requested id
        id: String,
    },

    /// Unique and indexed columns cannot be changed in place
    #[error("Column {table}.{column} is unique or indexed and cannot be updated")]
    ImmutableField {
        /// Table of the record
        table: String,
        /// Refused column
        column: String,
    },

    /// Downstream store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid engine configuration
    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Error::Schema(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }

    /// Whether the error is unrecoverable for the current call
    ///
    /// Fatal errors come from the schema or from values that can never be
    /// encoded; retrying the same call cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Schema(_) | Error::UnsupportedType(_) | Error::TypeMismatch { .. }
        )
    }

    /// Whether the error was raised by the downstream store
    pub fn is_store(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}

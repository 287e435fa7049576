//! Entity schemas
//!
//! An [`EntitySchema`] is the resolved storage shape of one record type: its
//! table, its identifier, how ids are generated, and the ordered list of
//! [`FieldDescriptor`]s. Schemas are produced outside the engine (by hand,
//! from a config file, or by a derive step) and are validated exactly once,
//! in [`EntitySchemaBuilder::build`]. Everything downstream assumes a
//! validated schema.
//!
//! ## Invariants
//!
//! - exactly one identifier column, distinct from every field column
//! - at most one `unique` field
//! - `sort` only on numeric scalars; `size_cap` only with `sort`
//! - `unique` and `indexed` only on scalars, never both on one field
//! - column names are non-empty, contain no `:` and do not start with `__`

use crate::error::{Error, Result};
use crate::value::ScalarType;
use serde::{Deserialize, Serialize};

/// Reserved column-name prefix for engine-owned hash fields
pub const RESERVED_COLUMN_PREFIX: &str = "__";

/// Characters a table name cannot contain: the key separator and the
/// `KEYS` glob metacharacters
pub const RESERVED_TABLE_CHARS: &[char] = &[':', '*', '?', '[', ']', '\\'];

/// Storage kind of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum FieldKind {
    /// Single scalar stored in the record hash
    Scalar {
        /// Scalar type
        ty: ScalarType,
    },
    /// Ordered list stored under its own key
    List {
        /// Element type
        element: ScalarType,
    },
    /// Set stored under its own key (as a list, deduplicated on read)
    Set {
        /// Element type
        element: ScalarType,
    },
    /// Map stored under its own key as a hash
    Map {
        /// Key type
        key: ScalarType,
        /// Value type
        value: ScalarType,
    },
    /// Raw bytes stored in the record hash
    Blob,
}

impl FieldKind {
    /// Whether the field lives outside the record hash
    pub fn is_aux(&self) -> bool {
        matches!(
            self,
            FieldKind::List { .. } | FieldKind::Set { .. } | FieldKind::Map { .. }
        )
    }

    /// Name used in errors and logs
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Scalar { .. } => "scalar",
            FieldKind::List { .. } => "list",
            FieldKind::Set { .. } => "set",
            FieldKind::Map { .. } => "map",
            FieldKind::Blob => "blob",
        }
    }
}

/// Storage description of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Column name
    pub column: String,
    /// Storage kind
    #[serde(flatten)]
    pub kind: FieldKind,
    /// Maintain a rank set scored by this field
    #[serde(default)]
    pub sort: bool,
    /// Rank descending (largest first) instead of ascending
    #[serde(default)]
    pub big_first: bool,
    /// Keep only the top `size_cap` ids in the rank set (0 = unbounded)
    #[serde(default)]
    pub size_cap: u64,
    /// Enforce uniqueness of this field's value across the table
    #[serde(default)]
    pub unique: bool,
    /// Maintain a secondary index on this field's value
    #[serde(default)]
    pub indexed: bool,
    /// Absent data decodes to `Null` instead of the zero value
    #[serde(default)]
    pub nullable: bool,
}

impl FieldDescriptor {
    fn with_kind(column: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            column: column.into(),
            kind,
            sort: false,
            big_first: false,
            size_cap: 0,
            unique: false,
            indexed: false,
            nullable: false,
        }
    }

    /// Scalar column
    pub fn scalar(column: impl Into<String>, ty: ScalarType) -> Self {
        Self::with_kind(column, FieldKind::Scalar { ty })
    }

    /// List column
    pub fn list(column: impl Into<String>, element: ScalarType) -> Self {
        Self::with_kind(column, FieldKind::List { element })
    }

    /// Set column
    pub fn set(column: impl Into<String>, element: ScalarType) -> Self {
        Self::with_kind(column, FieldKind::Set { element })
    }

    /// Map column
    pub fn map(column: impl Into<String>, key: ScalarType, value: ScalarType) -> Self {
        Self::with_kind(column, FieldKind::Map { key, value })
    }

    /// Blob column
    pub fn blob(column: impl Into<String>) -> Self {
        Self::with_kind(column, FieldKind::Blob)
    }

    /// Rank by this field, keeping at most `size_cap` ids (0 = all)
    pub fn sorted(mut self, size_cap: u64, big_first: bool) -> Self {
        self.sort = true;
        self.size_cap = size_cap;
        self.big_first = big_first;
        self
    }

    /// Mark as unique
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark as secondary-indexed
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Decode absent data as `Null`
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Whether the field may only change through delete + recreate
    pub fn is_immutable(&self) -> bool {
        self.unique || self.indexed
    }

    fn validate(&self, table: &str) -> Result<()> {
        validate_column_name(table, &self.column)?;
        let scalar = match self.kind {
            FieldKind::Scalar { ty } => Some(ty),
            _ => None,
        };
        if self.sort && !scalar.map(|t| t.is_numeric()).unwrap_or(false) {
            return Err(Error::schema(format!(
                "{}.{}: sort requires a numeric scalar, found {}",
                table,
                self.column,
                self.kind.name()
            )));
        }
        if !self.sort && (self.size_cap > 0 || self.big_first) {
            return Err(Error::schema(format!(
                "{}.{}: size_cap and big_first require sort",
                table, self.column
            )));
        }
        if (self.unique || self.indexed) && scalar.is_none() {
            return Err(Error::schema(format!(
                "{}.{}: unique/indexed require a scalar, found {}",
                table,
                self.column,
                self.kind.name()
            )));
        }
        if self.unique && self.indexed {
            return Err(Error::schema(format!(
                "{}.{}: a field cannot be both unique and indexed",
                table, self.column
            )));
        }
        Ok(())
    }
}

fn validate_column_name(table: &str, column: &str) -> Result<()> {
    if column.is_empty() {
        return Err(Error::schema(format!("{}: empty column name", table)));
    }
    if column.contains(':') {
        return Err(Error::schema(format!(
            "{}.{}: column names cannot contain ':'",
            table, column
        )));
    }
    if column.starts_with(RESERVED_COLUMN_PREFIX) {
        return Err(Error::schema(format!(
            "{}.{}: column prefix '{}' is reserved",
            table, column, RESERVED_COLUMN_PREFIX
        )));
    }
    Ok(())
}

/// Resolved, validated storage shape of a record type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    table: String,
    id_field: String,
    id_generator: Option<String>,
    #[serde(default)]
    auto_id: bool,
    id_cache: bool,
    cacheable: bool,
    fields: Vec<FieldDescriptor>,
}

impl EntitySchema {
    /// Start building a schema for `table`
    pub fn builder(table: impl Into<String>) -> EntitySchemaBuilder {
        EntitySchemaBuilder::new(table)
    }

    /// Table name; also the record type name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Name of the identifier attribute
    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Name of the id generator, when the schema names one
    pub fn id_generator(&self) -> Option<&str> {
        self.id_generator.as_deref()
    }

    /// Whether ids are assigned automatically
    ///
    /// An auto-id schema without a generator name uses the engine's default.
    pub fn is_auto_id(&self) -> bool {
        self.auto_id || self.id_generator.is_some()
    }

    /// Whether ids are registered in the all-ids timeline
    pub fn id_cache(&self) -> bool {
        self.id_cache
    }

    /// Whether records may enter the process cache
    pub fn cacheable(&self) -> bool {
        self.cacheable
    }

    /// Ordered field descriptors
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Descriptor of `column`
    pub fn field(&self, column: &str) -> Result<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.column == column)
            .ok_or_else(|| Error::schema(format!("{} has no column '{}'", self.table, column)))
    }

    /// The unique field, if one is declared
    pub fn unique_field(&self) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.unique)
    }

    /// Fields that may be rewritten in place
    pub fn mutable_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| !f.is_immutable())
    }

    /// Re-run validation, e.g. after deserializing a schema
    pub fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            return Err(Error::schema("empty table name"));
        }
        if let Some(c) = self.table.chars().find(|c| RESERVED_TABLE_CHARS.contains(c)) {
            return Err(Error::schema(format!(
                "table '{}' cannot contain '{}'",
                self.table, c
            )));
        }
        if self.id_field.is_empty() {
            return Err(Error::schema(format!("{}: missing id field", self.table)));
        }
        if let Some(generator) = &self.id_generator {
            if generator.is_empty() {
                return Err(Error::schema(format!(
                    "{}: empty id generator name",
                    self.table
                )));
            }
        }
        let mut unique_count = 0;
        for (i, field) in self.fields.iter().enumerate() {
            field.validate(&self.table)?;
            if field.column == self.id_field {
                return Err(Error::schema(format!(
                    "{}.{}: id field cannot also be a value field",
                    self.table, field.column
                )));
            }
            if self.fields[..i].iter().any(|f| f.column == field.column) {
                return Err(Error::schema(format!(
                    "{}.{}: duplicate column",
                    self.table, field.column
                )));
            }
            if field.unique {
                unique_count += 1;
            }
        }
        if unique_count > 1 {
            return Err(Error::schema(format!(
                "{}: at most one unique field is allowed, found {}",
                self.table, unique_count
            )));
        }
        Ok(())
    }
}

/// Builder for [`EntitySchema`]
///
/// # Example
///
/// ```
/// use redmap_core::schema::{EntitySchema, FieldDescriptor};
/// use redmap_core::ScalarType;
///
/// let schema = EntitySchema::builder("te")
///     .auto_id("default")
///     .field(FieldDescriptor::scalar("age", ScalarType::I32).sorted(5, false))
///     .build()
///     .unwrap();
/// assert_eq!(schema.table(), "te");
/// ```
#[derive(Debug, Clone)]
pub struct EntitySchemaBuilder {
    schema: EntitySchema,
}

impl EntitySchemaBuilder {
    /// Create a builder with id field `id`, manual ids, timeline on, cache on
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            schema: EntitySchema {
                table: table.into(),
                id_field: "id".to_string(),
                id_generator: None,
                auto_id: false,
                id_cache: true,
                cacheable: true,
                fields: Vec::new(),
            },
        }
    }

    /// Name of the identifier attribute
    pub fn id_field(mut self, name: impl Into<String>) -> Self {
        self.schema.id_field = name.into();
        self
    }

    /// Assign missing ids with the named generator
    pub fn auto_id(mut self, generator: impl Into<String>) -> Self {
        self.schema.id_generator = Some(generator.into());
        self.schema.auto_id = true;
        self
    }

    /// Assign missing ids with the engine's default generator
    pub fn generated_ids(mut self) -> Self {
        self.schema.auto_id = true;
        self
    }

    /// Register ids in the all-ids timeline
    pub fn id_cache(mut self, enabled: bool) -> Self {
        self.schema.id_cache = enabled;
        self
    }

    /// Allow records of this type into the process cache
    pub fn cacheable(mut self, enabled: bool) -> Self {
        self.schema.cacheable = enabled;
        self
    }

    /// Append a field
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.schema.fields.push(field);
        self
    }

    /// Validate and produce the schema
    pub fn build(self) -> Result<EntitySchema> {
        self.schema.validate()?;
        Ok(self.schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> EntitySchemaBuilder {
        EntitySchema::builder("person")
    }

    #[test]
    fn test_valid_schema() {
        let schema = base()
            .auto_id("default")
            .field(FieldDescriptor::scalar("name", ScalarType::String).unique())
            .field(FieldDescriptor::scalar("age", ScalarType::I32).sorted(10, true))
            .field(FieldDescriptor::scalar("city", ScalarType::String).indexed())
            .field(FieldDescriptor::list("tags", ScalarType::String))
            .field(FieldDescriptor::map("attrs", ScalarType::String, ScalarType::I64))
            .field(FieldDescriptor::blob("avatar"))
            .build()
            .unwrap();

        assert_eq!(schema.fields().len(), 6);
        assert!(schema.is_auto_id());
        assert_eq!(schema.unique_field().unwrap().column, "name");
        assert_eq!(schema.field("age").unwrap().size_cap, 10);
        assert!(schema.field("nope").is_err());
        let mutable: Vec<_> = schema.mutable_fields().map(|f| f.column.as_str()).collect();
        assert_eq!(mutable, vec!["age", "tags", "attrs", "avatar"]);
    }

    #[test]
    fn test_two_unique_fields_rejected() {
        let err = base()
            .field(FieldDescriptor::scalar("a", ScalarType::String).unique())
            .field(FieldDescriptor::scalar("b", ScalarType::String).unique())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn test_sort_requires_numeric_scalar() {
        assert!(base()
            .field(FieldDescriptor::scalar("name", ScalarType::String).sorted(0, false))
            .build()
            .is_err());
        assert!(base()
            .field(FieldDescriptor::list("xs", ScalarType::I32).sorted(0, false))
            .build()
            .is_err());
    }

    #[test]
    fn test_size_cap_requires_sort() {
        let mut field = FieldDescriptor::scalar("age", ScalarType::I32);
        field.size_cap = 5;
        assert!(base().field(field).build().is_err());
    }

    #[test]
    fn test_unique_requires_scalar() {
        assert!(base()
            .field(FieldDescriptor::blob("raw").unique())
            .build()
            .is_err());
    }

    #[test]
    fn test_unique_and_indexed_rejected() {
        assert!(base()
            .field(FieldDescriptor::scalar("x", ScalarType::I32).unique().indexed())
            .build()
            .is_err());
    }

    #[test]
    fn test_bad_column_names() {
        for name in ["", "a:b", "__id__"] {
            assert!(
                base()
                    .field(FieldDescriptor::scalar(name, ScalarType::I32))
                    .build()
                    .is_err(),
                "column {:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_duplicate_and_id_columns_rejected() {
        assert!(base()
            .field(FieldDescriptor::scalar("a", ScalarType::I32))
            .field(FieldDescriptor::scalar("a", ScalarType::I64))
            .build()
            .is_err());
        assert!(base()
            .field(FieldDescriptor::scalar("id", ScalarType::I64))
            .build()
            .is_err());
    }

    #[test]
    fn test_bad_table_names() {
        assert!(EntitySchema::builder("").build().is_err());
        assert!(EntitySchema::builder("a:b").build().is_err());
        assert!(EntitySchema::builder("t").id_field("").build().is_err());
        assert!(EntitySchema::builder("t").auto_id("").build().is_err());
    }

    #[test]
    fn test_glob_characters_in_table_rejected() {
        for table in ["u*", "a?", "[x]", "x]", "back\\slash"] {
            let result = EntitySchema::builder(table)
                .field(FieldDescriptor::scalar("age", ScalarType::I32))
                .build();
            assert!(matches!(result, Err(Error::Schema(_))), "{}", table);
        }
        assert!(EntitySchema::builder("user_accounts-2")
            .field(FieldDescriptor::scalar("age", ScalarType::I32))
            .build()
            .is_ok());
    }

    #[test]
    fn test_generated_ids_without_generator_name() {
        let schema = EntitySchema::builder("t").generated_ids().build().unwrap();
        assert!(schema.is_auto_id());
        assert_eq!(schema.id_generator(), None);
        assert!(!EntitySchema::builder("t").build().unwrap().is_auto_id());
    }

    #[test]
    fn test_schema_deserializes_and_validates() {
        let json = r#"{
            "table": "te",
            "id_field": "id",
            "id_generator": "default",
            "id_cache": true,
            "cacheable": false,
            "fields": [
                {"column": "age", "kind": "scalar", "ty": "i32", "sort": true, "size_cap": 5},
                {"column": "tags", "kind": "list", "element": "string"}
            ]
        }"#;
        let schema: EntitySchema = serde_json::from_str(json).unwrap();
        schema.validate().unwrap();
        assert_eq!(
            schema.field("age").unwrap().kind,
            FieldKind::Scalar {
                ty: ScalarType::I32
            }
        );
        assert!(schema.field("tags").unwrap().kind.is_aux());
    }
}

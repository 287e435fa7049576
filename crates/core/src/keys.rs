//! Keyspace layout
//!
//! Pure functions producing the canonical store key for every keyspace role.
//! The layout is part of the persisted format and is FROZEN:
//!
//! | Role | Key | Store type |
//! |------|-----|------------|
//! | record hash | `table:id:__all__` | hash |
//! | collection column | `table:id:column` | list / hash |
//! | rank set | `table:column:__sorted__` | sorted set |
//! | unique claim | `table:column:value:__unique__` | string |
//! | secondary index | `table:column:value:__index__` | sorted set |
//! | all-ids timeline | `table:__all_ids__` | sorted set |
//! | id counter | `table:__id__` | string (INCR) |
//!
//! No key depends on process state.

/// Suffix of the record hash key
pub const RECORD_SUFFIX: &str = "__all__";
/// Suffix of rank-set keys
pub const SORTED_SUFFIX: &str = "__sorted__";
/// Suffix of unique-claim keys
pub const UNIQUE_SUFFIX: &str = "__unique__";
/// Suffix of secondary-index keys
pub const INDEX_SUFFIX: &str = "__index__";
/// Suffix of the all-ids timeline key
pub const ALL_IDS_SUFFIX: &str = "__all_ids__";
/// Suffix of the default id counter key
pub const ID_COUNTER_SUFFIX: &str = "__id__";
/// Hash field of the record hash marking that the record exists
pub const EXISTENCE_FIELD: &str = "__id__";

/// `table:id:__all__`
pub fn record_key(table: &str, id: &str) -> String {
    format!("{}:{}:{}", table, id, RECORD_SUFFIX)
}

/// `table:id:column`
pub fn field_key(table: &str, id: &str, column: &str) -> String {
    format!("{}:{}:{}", table, id, column)
}

/// `table:column:__sorted__`
pub fn rank_key(table: &str, column: &str) -> String {
    format!("{}:{}:{}", table, column, SORTED_SUFFIX)
}

/// `table:column:value:__unique__`
pub fn unique_key(table: &str, column: &str, value: &str) -> String {
    format!("{}:{}:{}:{}", table, column, value, UNIQUE_SUFFIX)
}

/// `table:column:value:__index__`
pub fn index_key(table: &str, column: &str, value: &str) -> String {
    format!("{}:{}:{}:{}", table, column, value, INDEX_SUFFIX)
}

/// `table:__all_ids__`
pub fn timeline_key(table: &str) -> String {
    format!("{}:{}", table, ALL_IDS_SUFFIX)
}

/// `table:__id__`
pub fn id_counter_key(table: &str) -> String {
    format!("{}:{}", table, ID_COUNTER_SUFFIX)
}

/// Glob matching every key of `table`
pub fn table_pattern(table: &str) -> String {
    format!("{}:*", table)
}

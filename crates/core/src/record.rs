//! Records
//!
//! A [`Record`] is one entity instance: its type (the schema table), an
//! optional id and a column -> [`Value`] mapping. Absent columns read as
//! `Null`. Records are plain data; the engine shares persisted records as
//! `Arc<Record>` so the process cache can hold them weakly.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One persisted entity instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    table: String,
    id: Option<String>,
    values: BTreeMap<String, Value>,
}

impl Record {
    /// Create an empty record of type `table` without an id
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id: None,
            values: BTreeMap::new(),
        }
    }

    /// Create an empty record with a known id
    pub fn with_id(table: impl Into<String>, id: impl Into<String>) -> Self {
        let mut record = Self::new(table);
        record.id = Some(id.into());
        record
    }

    /// Record type (schema table)
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Assigned id; `None` and the empty string both mean "no id"
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Assign the id
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    /// Value of `column`, `None` when never set
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Value of `column`, treating absent as `Null`
    pub fn value(&self, column: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.values.get(column).unwrap_or(&NULL)
    }

    /// Set `column`
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.values.insert(column.into(), value.into());
        self
    }

    /// Builder-style [`Record::set`]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Remove `column`, returning its previous value
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.values.remove(column)
    }

    /// Iterate columns in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of set columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no column is set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_id_is_no_id() {
        let mut r = Record::new("te");
        assert_eq!(r.id(), None);
        r.set_id("");
        assert_eq!(r.id(), None);
        r.set_id("7");
        assert_eq!(r.id(), Some("7"));
    }

    #[test]
    fn test_values() {
        let r = Record::with_id("te", "1").with("age", 3).with("name", "bob");
        assert_eq!(r.get("age"), Some(&Value::I32(3)));
        assert_eq!(r.value("missing"), &Value::Null);
        assert_eq!(r.len(), 2);
        let cols: Vec<_> = r.iter().map(|(c, _)| c).collect();
        assert_eq!(cols, vec!["age", "name"]);
    }
}

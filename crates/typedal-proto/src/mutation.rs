//! Write statements.
//!
//! Values carried by these statements are already in backend-native form.

use serde::{Deserialize, Serialize};

use crate::query::Query;
use crate::result::RawRow;
use crate::value::Value;

/// Insert one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertStatement {
    /// Table to insert into.
    pub table: String,
    /// Primary key field; the backend assigns it when absent from `values`.
    pub primary_key: String,
    /// Field values keyed by bare field name.
    pub values: RawRow,
}

impl InsertStatement {
    /// Create an insert statement.
    pub fn new(table: impl Into<String>, primary_key: impl Into<String>, values: RawRow) -> Self {
        Self {
            table: table.into(),
            primary_key: primary_key.into(),
            values,
        }
    }
}

/// A field name and value pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Field name.
    pub field: String,
    /// New value.
    pub value: Value,
}

impl Assignment {
    /// Create a new assignment.
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Update the root-table rows matched by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStatement {
    /// Selects the rows to update. Only the root table is written.
    pub query: Query,
    /// Fields to change.
    pub assignments: Vec<Assignment>,
}

/// Delete the root-table rows matched by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteStatement {
    /// Selects the rows to delete.
    pub query: Query,
}

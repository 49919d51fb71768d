//! Materialized rows.

use std::sync::Arc;

use typedal_proto::Value;

use crate::catalog::TableMetadata;
use crate::error::Error;
use crate::model::FromValue;

static NULL: Value = Value::Null;

/// Rows attached to a parent row through a join.
#[derive(Debug, Clone)]
pub enum Related {
    /// Belongs-to join: at most one row.
    One(Option<Box<Row>>),
    /// Has-many join: every distinct related row in backend order.
    Many(Vec<Row>),
}

impl Related {
    /// The single related row, if this is a belongs-to attachment.
    pub fn as_one(&self) -> Option<&Row> {
        match self {
            Related::One(row) => row.as_deref(),
            Related::Many(_) => None,
        }
    }

    /// The related rows; a belongs-to attachment yields zero or one.
    pub fn as_slice(&self) -> &[Row] {
        match self {
            Related::One(Some(row)) => std::slice::from_ref(row.as_ref()),
            Related::One(None) => &[],
            Related::Many(rows) => rows,
        }
    }
}

/// A decoded row bound to one table.
///
/// Values are in application form (dates, booleans and json are decoded).
/// Joined rows hang off the attribute name the join was declared with.
#[derive(Debug, Clone)]
pub struct Row {
    table: Arc<TableMetadata>,
    values: Vec<(String, Value)>,
    related: Vec<(String, Related)>,
    extras: Vec<(String, Value)>,
}

impl Row {
    /// Create a row from decoded field values.
    pub fn new(table: Arc<TableMetadata>, values: Vec<(String, Value)>) -> Self {
        Self {
            table,
            values,
            related: Vec::new(),
            extras: Vec::new(),
        }
    }

    pub(crate) fn with_related(mut self, attribute: impl Into<String>, related: Related) -> Self {
        self.related.push((attribute.into(), related));
        self
    }

    pub(crate) fn with_extras(mut self, extras: Vec<(String, Value)>) -> Self {
        self.extras = extras;
        self
    }

    /// Table metadata this row belongs to.
    pub fn table(&self) -> &Arc<TableMetadata> {
        &self.table
    }

    /// Table name.
    pub fn table_name(&self) -> &str {
        self.table.name()
    }

    /// Value of a field, if it was selected.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, v)| v)
    }

    /// Value of a field converted to a Rust type.
    ///
    /// Fields that exist on the table but were not selected read as null.
    pub fn get_as<T: FromValue>(&self, field: &str) -> Result<T, Error> {
        self.table.require_field(field)?;
        let value = self.get(field).unwrap_or(&NULL);
        T::from_value(value).ok_or_else(|| Error::TypeMismatch {
            table: self.table.name().to_string(),
            field: field.to_string(),
            expected: T::EXPECTED.to_string(),
            value: value.to_string(),
        })
    }

    /// Primary key value, or null if it was not selected.
    pub fn key(&self) -> &Value {
        self.get(self.table.primary_key()).unwrap_or(&NULL)
    }

    /// Field values in column order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Rows attached under an attribute.
    pub fn related(&self, attribute: &str) -> Option<&Related> {
        self.related
            .iter()
            .find(|(name, _)| name == attribute)
            .map(|(_, r)| r)
    }

    /// The single row attached under a belongs-to attribute.
    pub fn related_one(&self, attribute: &str) -> Option<&Row> {
        self.related(attribute).and_then(Related::as_one)
    }

    /// Rows attached under an attribute; empty if nothing is attached.
    pub fn related_many(&self, attribute: &str) -> &[Row] {
        self.related(attribute)
            .map(Related::as_slice)
            .unwrap_or(&[])
    }

    /// Attribute names with attached rows, in join order.
    pub fn related_attributes(&self) -> impl Iterator<Item = &str> {
        self.related.iter().map(|(name, _)| name.as_str())
    }

    /// Computed value such as an aggregate, by its alias.
    pub fn extra(&self, name: &str) -> Option<&Value> {
        self.extras
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

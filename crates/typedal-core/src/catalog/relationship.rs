//! Named relationships declared on a model.

use std::collections::HashSet;

use typedal_proto::{JoinCardinality, JoinKind, Predicate};

use crate::error::Error;
use crate::model::Model;

use super::field::FieldDescriptor;

/// A join a table declares once and queries use by name.
///
/// Without a condition the relationship joins its target through the
/// reference graph, narrowed by `via`. A condition qualifies the declaring
/// table's columns by its table name and the target's columns by the
/// relationship name:
///
/// ```ignore
/// Relationship::new("drafts", "book")
///     .with_on(col("author", "id").eq_column(&col("drafts", "author"))
///         .and(col("drafts", "published").eq(false)))
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    /// Name the joined rows are attached under.
    pub name: String,
    /// Target table.
    pub target: String,
    /// Reference field the path must use.
    pub via: Option<String>,
    /// Explicit join condition.
    pub on: Option<Predicate>,
    /// Join kind; defaults like any other join.
    pub kind: Option<JoinKind>,
    /// Cardinality override.
    pub cardinality: Option<JoinCardinality>,
}

impl Relationship {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            via: None,
            on: None,
            kind: None,
            cardinality: None,
        }
    }

    /// A relationship to a model's table.
    pub fn to<M: Model>(name: impl Into<String>) -> Self {
        Self::new(name, M::table_name())
    }

    pub fn with_via(mut self, field: impl Into<String>) -> Self {
        self.via = Some(field.into());
        self
    }

    pub fn with_on(mut self, predicate: Predicate) -> Self {
        self.on = Some(predicate);
        self
    }

    pub fn with_kind(mut self, kind: JoinKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_cardinality(mut self, cardinality: JoinCardinality) -> Self {
        self.cardinality = Some(cardinality);
        self
    }
}

/// Check a table's relationships against its own name and fields.
///
/// Targets may be registered later, so only what the declaring table knows
/// is checked here; the rest fails when a query joins the relationship.
pub(crate) fn check_relationships(
    table: &str,
    fields: &[FieldDescriptor],
    relationships: &[Relationship],
) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for relationship in relationships {
        let invalid = |reason: String| Error::InvalidRelationship {
            table: table.to_string(),
            name: relationship.name.clone(),
            reason,
        };
        if relationship.name == table {
            return Err(invalid("the name is the declaring table's own name".into()));
        }
        if fields.iter().any(|f| f.name == relationship.name) {
            return Err(invalid("the name is already a field".into()));
        }
        if !seen.insert(relationship.name.as_str()) {
            return Err(invalid("declared twice".into()));
        }
        if relationship.on.is_some() && relationship.via.is_some() {
            return Err(invalid("a condition and a via field exclude each other".into()));
        }
        if let Some(on) = &relationship.on {
            let aliases = on.aliases();
            if !aliases.contains(&relationship.name) {
                return Err(invalid("the condition does not reference the target".into()));
            }
            if let Some(other) = aliases
                .iter()
                .find(|a| **a != relationship.name && a.as_str() != table)
            {
                return Err(invalid(format!("the condition names unknown alias '{other}'")));
            }
        }
    }
    Ok(())
}

//! Join options.

use typedal_proto::{JoinCardinality, JoinKind, Predicate};

use crate::relation::Direction;

/// How a join call picks its path, alias and shape.
///
/// Every option is optional. Without `on` the path is resolved through the
/// relationship graph, narrowed by `via` and `direction`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinOptions {
    /// Reference field the path must use, as `field` or `table.field`.
    pub via: Option<String>,
    /// Alias for the joined table; required when it is already in scope.
    pub alias: Option<String>,
    /// Join kind; defaults per edge.
    pub kind: Option<JoinKind>,
    /// Alias to join from; defaults to the root.
    pub from: Option<String>,
    /// Only walk edges in this direction.
    pub direction: Option<Direction>,
    /// Explicit join condition instead of a resolved path.
    pub on: Option<Predicate>,
    /// Override the cardinality of the final hop.
    pub cardinality: Option<JoinCardinality>,
    /// Attribute the joined rows are attached under.
    pub attribute: Option<String>,
}

impl JoinOptions {
    /// Options with every setting left to its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the path to go through a reference field.
    pub fn with_via(mut self, field: impl Into<String>) -> Self {
        self.via = Some(field.into());
        self
    }

    /// Set the alias of the joined table.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Set the join kind.
    pub fn with_kind(mut self, kind: JoinKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Join from an alias other than the root.
    pub fn with_from(mut self, alias: impl Into<String>) -> Self {
        self.from = Some(alias.into());
        self
    }

    /// Restrict the path to one edge direction.
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Join on an explicit condition.
    pub fn with_on(mut self, predicate: Predicate) -> Self {
        self.on = Some(predicate);
        self
    }

    /// Override the cardinality.
    pub fn with_cardinality(mut self, cardinality: JoinCardinality) -> Self {
        self.cardinality = Some(cardinality);
        self
    }

    /// Attach joined rows under a custom attribute name.
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }
}

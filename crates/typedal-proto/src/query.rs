//! Query AST types.
//!
//! A [`Query`] is an immutable description of one read against a root table.
//! Each clause sits behind an `Arc`, so deriving a new query from an existing
//! one only copies the clause being changed; every other clause is shared.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::predicate::{ColumnRef, Predicate};

/// Aggregate function types for computed selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    /// Count of rows or non-null values.
    Count,
    /// Sum of numeric values.
    Sum,
    /// Average of numeric values.
    Avg,
    /// Minimum value.
    Min,
    /// Maximum value.
    Max,
}

impl AggregateFunction {
    /// Lowercase function name.
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }
}

/// A computed selection such as `count(book.id) AS books`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateExpr {
    /// The aggregation function to apply.
    pub function: AggregateFunction,
    /// Column to aggregate (None for COUNT(*)).
    pub column: Option<ColumnRef>,
    /// Name of the result column.
    pub alias: String,
}

impl AggregateExpr {
    /// Create a COUNT(*) expression.
    pub fn count_all(alias: impl Into<String>) -> Self {
        Self {
            function: AggregateFunction::Count,
            column: None,
            alias: alias.into(),
        }
    }

    /// Create an aggregate over a column.
    pub fn new(function: AggregateFunction, column: ColumnRef, alias: impl Into<String>) -> Self {
        Self {
            function,
            column: Some(column),
            alias: alias.into(),
        }
    }
}

/// One entry of a selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectItem {
    /// A plain field of some table occurrence.
    Column(ColumnRef),
    /// A computed expression.
    Aggregate(AggregateExpr),
}

impl SelectItem {
    /// Name of the raw column this item produces.
    pub fn output_name(&self) -> String {
        match self {
            SelectItem::Column(c) => c.qualified(),
            SelectItem::Aggregate(a) => a.alias.clone(),
        }
    }
}

/// A table occurrence: the table name and the alias it is known by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Registered table name.
    pub table: String,
    /// Alias used by column references.
    pub alias: String,
}

impl TableRef {
    /// A table occurrence aliased by its own name.
    pub fn new(table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            alias: table.clone(),
            table,
        }
    }

    /// A table occurrence with an explicit alias.
    pub fn aliased(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: alias.into(),
        }
    }
}

/// Join kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinKind {
    /// Only rows with a match on both sides.
    Inner,
    /// Every parent row, with nulls for missing children.
    Left,
}

/// How many joined rows each parent row can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinCardinality {
    /// At most one (belongs-to).
    One,
    /// Any number (has-many).
    Many,
}

/// The condition a join matches on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JoinCondition {
    /// `left = right`, where `left` belongs to an earlier alias and `right`
    /// to the joined alias. Produced for relationship edges.
    Columns { left: ColumnRef, right: ColumnRef },
    /// An arbitrary predicate supplied by the caller.
    Predicate(Arc<Predicate>),
}

/// A join clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    /// The joined table occurrence.
    pub target: TableRef,
    /// Alias of the occurrence this join hangs off.
    pub parent_alias: String,
    /// Name under which joined rows are attached to the parent row.
    pub attribute: String,
    /// Join kind.
    pub kind: JoinKind,
    /// Belongs-to or has-many.
    pub cardinality: JoinCardinality,
    /// Match condition.
    pub on: JoinCondition,
}

impl Join {
    /// Alias of the joined occurrence.
    pub fn alias(&self) -> &str {
        &self.target.alias
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

/// Ordering specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Column to order by.
    pub column: ColumnRef,
    /// Sort direction.
    pub direction: OrderDirection,
}

impl OrderSpec {
    /// Create an ascending order spec.
    pub fn asc(column: ColumnRef) -> Self {
        Self {
            column,
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending order spec.
    pub fn desc(column: ColumnRef) -> Self {
        Self {
            column,
            direction: OrderDirection::Desc,
        }
    }
}

/// Pagination parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of results to return.
    pub limit: u64,
    /// Number of results to skip.
    pub offset: u64,
}

impl Pagination {
    /// Create pagination with limit and offset.
    pub fn new(limit: u64, offset: u64) -> Self {
        Self { limit, offset }
    }

    /// Create pagination with just a limit.
    pub fn limit(limit: u64) -> Self {
        Self { limit, offset: 0 }
    }

    /// Pagination for a 1-based page number.
    pub fn page(limit: u64, page: u64) -> Self {
        Self {
            limit,
            offset: limit.saturating_mul(page.saturating_sub(1)),
        }
    }
}

/// A read query against one root table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Root table occurrence.
    pub root: TableRef,
    /// Selected columns and expressions. Empty means every field of every
    /// table occurrence.
    pub selection: Arc<Vec<SelectItem>>,
    /// Filter over the joined row.
    pub predicate: Option<Arc<Predicate>>,
    /// Joins, in the order they were added.
    pub joins: Arc<Vec<Join>>,
    /// Grouping columns.
    pub group_by: Arc<Vec<ColumnRef>>,
    /// Ordering specification.
    pub order_by: Arc<Vec<OrderSpec>>,
    /// Pagination parameters.
    pub pagination: Option<Pagination>,
}

impl Query {
    /// Create a new query over a table, aliased by its own name.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            root: TableRef::new(table),
            selection: Arc::new(Vec::new()),
            predicate: None,
            joins: Arc::new(Vec::new()),
            group_by: Arc::new(Vec::new()),
            order_by: Arc::new(Vec::new()),
            pagination: None,
        }
    }

    /// Set the root alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.root.alias = alias.into();
        self
    }

    /// Replace the selection.
    pub fn with_selection(mut self, selection: Vec<SelectItem>) -> Self {
        self.selection = Arc::new(selection);
        self
    }

    /// Append items to the selection.
    pub fn extend_selection(mut self, items: impl IntoIterator<Item = SelectItem>) -> Self {
        Arc::make_mut(&mut self.selection).extend(items);
        self
    }

    /// AND a predicate onto the existing filter.
    pub fn and_where(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => Arc::new(Predicate::And(existing, Arc::new(predicate))),
            None => Arc::new(predicate),
        });
        self
    }

    /// Drop the filter.
    pub fn without_where(mut self) -> Self {
        self.predicate = None;
        self
    }

    /// Add a join.
    pub fn with_join(mut self, join: Join) -> Self {
        Arc::make_mut(&mut self.joins).push(join);
        self
    }

    /// Drop every join.
    pub fn without_joins(mut self) -> Self {
        self.joins = Arc::new(Vec::new());
        self
    }

    /// Add a grouping column.
    pub fn with_group_by(mut self, column: ColumnRef) -> Self {
        Arc::make_mut(&mut self.group_by).push(column);
        self
    }

    /// Add an ordering.
    pub fn with_order(mut self, order: OrderSpec) -> Self {
        Arc::make_mut(&mut self.order_by).push(order);
        self
    }

    /// Drop every ordering.
    pub fn without_order(mut self) -> Self {
        self.order_by = Arc::new(Vec::new());
        self
    }

    /// Set pagination.
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Drop pagination.
    pub fn without_pagination(mut self) -> Self {
        self.pagination = None;
        self
    }

    /// Every alias in scope, root first, then joins in order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.root.alias.as_str()).chain(self.joins.iter().map(|j| j.alias()))
    }

    /// Whether an alias is already in scope.
    pub fn has_alias(&self, alias: &str) -> bool {
        self.aliases().any(|a| a == alias)
    }

    /// Table name an alias refers to.
    pub fn table_of(&self, alias: &str) -> Option<&str> {
        if self.root.alias == alias {
            return Some(&self.root.table);
        }
        self.join(alias).map(|j| j.target.table.as_str())
    }

    /// Join clause for an alias.
    pub fn join(&self, alias: &str) -> Option<&Join> {
        self.joins.iter().find(|j| j.alias() == alias)
    }

    /// Whether any join can multiply root rows.
    pub fn has_many_joins(&self) -> bool {
        self.joins
            .iter()
            .any(|j| j.cardinality == JoinCardinality::Many)
    }

    /// Whether the selection contains computed expressions.
    pub fn is_aggregate(&self) -> bool {
        !self.group_by.is_empty()
            || self
                .selection
                .iter()
                .any(|s| matches!(s, SelectItem::Aggregate(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::col;

    fn belongs_to_author() -> Join {
        Join {
            target: TableRef::new("author"),
            parent_alias: "book".into(),
            attribute: "author".into(),
            kind: JoinKind::Inner,
            cardinality: JoinCardinality::One,
            on: JoinCondition::Columns {
                left: col("book", "author"),
                right: col("author", "id"),
            },
        }
    }

    #[test]
    fn test_and_where_conjoins() {
        let base = Query::new("book").and_where(col("book", "id").gt(1));
        let narrowed = base.clone().and_where(col("book", "id").lt(9));

        assert_eq!(
            base.predicate.as_deref().map(ToString::to_string).as_deref(),
            Some("book.id > 1")
        );
        assert_eq!(
            narrowed.predicate.as_deref().map(ToString::to_string).as_deref(),
            Some("(book.id > 1 AND book.id < 9)")
        );
    }

    #[test]
    fn test_derived_query_shares_unchanged_clauses() {
        let base = Query::new("book")
            .with_order(OrderSpec::asc(col("book", "id")))
            .and_where(col("book", "id").gt(1));
        let derived = base.clone().with_join(belongs_to_author());

        assert!(Arc::ptr_eq(&base.order_by, &derived.order_by));
        assert!(Arc::ptr_eq(
            base.predicate.as_ref().unwrap(),
            derived.predicate.as_ref().unwrap()
        ));
        assert!(base.joins.is_empty());
        assert_eq!(derived.joins.len(), 1);
    }

    #[test]
    fn test_alias_lookup() {
        let query = Query::new("book").with_join(belongs_to_author());

        assert_eq!(query.aliases().collect::<Vec<_>>(), vec!["book", "author"]);
        assert_eq!(query.table_of("author"), Some("author"));
        assert_eq!(query.table_of("missing"), None);
        assert!(!query.has_many_joins());
    }

    #[test]
    fn test_page_offsets() {
        assert_eq!(Pagination::page(10, 1), Pagination::new(10, 0));
        assert_eq!(Pagination::page(10, 3), Pagination::new(10, 20));
        assert_eq!(Pagination::page(10, 0), Pagination::new(10, 0));
    }

    #[test]
    fn test_aggregate_detection() {
        let plain = Query::new("book");
        assert!(!plain.is_aggregate());

        let counted = plain.with_selection(vec![SelectItem::Aggregate(AggregateExpr::count_all(
            "n",
        ))]);
        assert!(counted.is_aggregate());
        assert_eq!(counted.selection[0].output_name(), "n");
    }
}

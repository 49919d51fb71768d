//! Predicate expression trees.
//!
//! Predicates are built with explicit combinators on [`ColumnRef`] rather than
//! by overloading comparison operators on field values. Compound nodes share
//! their children through `Arc`, so conjoining a new condition onto an
//! existing predicate never copies or mutates the old tree.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::query::Query;
use crate::value::Value;

/// A reference to a field of a table occurrence in a query.
///
/// `alias` is the table's name for the root and for joins without an explicit
/// alias, otherwise the alias given to the join.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Table alias the field belongs to.
    pub alias: String,
    /// Field name.
    pub field: String,
}

/// Shorthand for [`ColumnRef::new`].
pub fn col(alias: impl Into<String>, field: impl Into<String>) -> ColumnRef {
    ColumnRef::new(alias, field)
}

impl ColumnRef {
    /// Create a column reference.
    pub fn new(alias: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            field: field.into(),
        }
    }

    /// Parse a qualified `alias.field` identifier.
    pub fn parse(qualified: &str) -> Result<Self, Error> {
        match qualified.split_once('.') {
            Some((alias, field)) if !alias.is_empty() && !field.is_empty() => {
                Ok(Self::new(alias, field))
            }
            _ => Err(Error::InvalidColumn(qualified.to_string())),
        }
    }

    /// The `alias.field` identifier backends use to name result columns.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.alias, self.field)
    }

    fn compare(&self, op: CompareOp, value: impl Into<Value>) -> Predicate {
        Predicate::Compare {
            column: self.clone(),
            op,
            operand: Operand::Value(value.into()),
        }
    }

    /// `column = value`
    pub fn eq(&self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Eq, value)
    }

    /// `column != value`
    pub fn ne(&self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ne, value)
    }

    /// `column < value`
    pub fn lt(&self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Lt, value)
    }

    /// `column <= value`
    pub fn le(&self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Le, value)
    }

    /// `column > value`
    pub fn gt(&self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Gt, value)
    }

    /// `column >= value`
    pub fn ge(&self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ge, value)
    }

    /// Compare against another column, e.g. in explicit join conditions.
    pub fn eq_column(&self, other: &ColumnRef) -> Predicate {
        Predicate::Compare {
            column: self.clone(),
            op: CompareOp::Eq,
            operand: Operand::Column(other.clone()),
        }
    }

    /// `column IN (values...)`
    pub fn is_in<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> Predicate {
        Predicate::In {
            column: self.clone(),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    /// `column NOT IN (values...)`
    pub fn not_in<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> Predicate {
        Predicate::In {
            column: self.clone(),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    /// `column IN (subquery)`. The subquery must select exactly one column.
    pub fn in_query(&self, query: Query) -> Predicate {
        Predicate::InSubquery {
            column: self.clone(),
            query: Box::new(query),
            negated: false,
        }
    }

    /// `column IS NULL`
    pub fn is_null(&self) -> Predicate {
        Predicate::IsNull {
            column: self.clone(),
            negated: false,
        }
    }

    /// `column IS NOT NULL`
    pub fn is_not_null(&self) -> Predicate {
        Predicate::IsNull {
            column: self.clone(),
            negated: true,
        }
    }

    /// `column LIKE pattern` (`%` and `_` wildcards, `\` escapes).
    pub fn like(&self, pattern: impl Into<String>) -> Predicate {
        Predicate::Like {
            column: self.clone(),
            pattern: pattern.into(),
            negated: false,
        }
    }

    /// `column NOT LIKE pattern`
    pub fn not_like(&self, pattern: impl Into<String>) -> Predicate {
        Predicate::Like {
            column: self.clone(),
            pattern: pattern.into(),
            negated: true,
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// SQL spelling of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// A literal value.
    Value(Value),
    /// Another column.
    Column(ColumnRef),
}

/// Boolean expression over column comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// `column <op> operand`
    Compare {
        column: ColumnRef,
        op: CompareOp,
        operand: Operand,
    },
    /// `column [NOT] IN (values...)`
    In {
        column: ColumnRef,
        values: Vec<Value>,
        negated: bool,
    },
    /// `column [NOT] IN (subquery)`
    InSubquery {
        column: ColumnRef,
        query: Box<Query>,
        negated: bool,
    },
    /// `column IS [NOT] NULL`
    IsNull { column: ColumnRef, negated: bool },
    /// `column [NOT] LIKE pattern`
    Like {
        column: ColumnRef,
        pattern: String,
        negated: bool,
    },
    /// Both sides must hold.
    And(Arc<Predicate>, Arc<Predicate>),
    /// At least one side must hold.
    Or(Arc<Predicate>, Arc<Predicate>),
    /// Negation.
    Not(Arc<Predicate>),
}

impl Predicate {
    /// Conjoin two predicates.
    pub fn and(self, other: Predicate) -> Predicate {
        Predicate::And(Arc::new(self), Arc::new(other))
    }

    /// Disjoin two predicates.
    pub fn or(self, other: Predicate) -> Predicate {
        Predicate::Or(Arc::new(self), Arc::new(other))
    }

    /// Negate this predicate.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Predicate {
        Predicate::Not(Arc::new(self))
    }

    /// Fold a list of alternatives into one OR tree. Returns `None` when empty.
    pub fn any(predicates: impl IntoIterator<Item = Predicate>) -> Option<Predicate> {
        predicates.into_iter().reduce(Predicate::or)
    }

    /// Fold a list of conditions into one AND tree. Returns `None` when empty.
    pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Option<Predicate> {
        predicates.into_iter().reduce(Predicate::and)
    }

    /// Every column referenced by this predicate, excluding columns that only
    /// appear inside subqueries (those belong to the subquery's own scope).
    pub fn columns(&self) -> BTreeSet<ColumnRef> {
        let mut columns = BTreeSet::new();
        self.collect_columns(&mut columns);
        columns
    }

    fn collect_columns(&self, columns: &mut BTreeSet<ColumnRef>) {
        match self {
            Predicate::Compare {
                column, operand, ..
            } => {
                columns.insert(column.clone());
                if let Operand::Column(other) = operand {
                    columns.insert(other.clone());
                }
            }
            Predicate::In { column, .. }
            | Predicate::InSubquery { column, .. }
            | Predicate::IsNull { column, .. }
            | Predicate::Like { column, .. } => {
                columns.insert(column.clone());
            }
            Predicate::And(a, b) | Predicate::Or(a, b) => {
                a.collect_columns(columns);
                b.collect_columns(columns);
            }
            Predicate::Not(inner) => inner.collect_columns(columns),
        }
    }

    /// Aliases referenced by this predicate.
    pub fn aliases(&self) -> BTreeSet<String> {
        self.columns().into_iter().map(|c| c.alias).collect()
    }

    /// Rebuild the tree with every literal passed through `f` together with the
    /// column it is compared against. Column operands and subqueries are kept
    /// as they are.
    pub fn try_map_values<E, F>(&self, f: &mut F) -> Result<Predicate, E>
    where
        F: FnMut(&ColumnRef, &Value) -> Result<Value, E>,
    {
        Ok(match self {
            Predicate::Compare {
                column,
                op,
                operand,
            } => Predicate::Compare {
                column: column.clone(),
                op: *op,
                operand: match operand {
                    Operand::Value(v) => Operand::Value(f(column, v)?),
                    Operand::Column(c) => Operand::Column(c.clone()),
                },
            },
            Predicate::In {
                column,
                values,
                negated,
            } => Predicate::In {
                column: column.clone(),
                values: values
                    .iter()
                    .map(|v| f(column, v))
                    .collect::<Result<_, _>>()?,
                negated: *negated,
            },
            Predicate::InSubquery { .. } | Predicate::IsNull { .. } | Predicate::Like { .. } => {
                self.clone()
            }
            Predicate::And(a, b) => Predicate::And(
                Arc::new(a.try_map_values(f)?),
                Arc::new(b.try_map_values(f)?),
            ),
            Predicate::Or(a, b) => Predicate::Or(
                Arc::new(a.try_map_values(f)?),
                Arc::new(b.try_map_values(f)?),
            ),
            Predicate::Not(inner) => Predicate::Not(Arc::new(inner.try_map_values(f)?)),
        })
    }

    /// Rebuild the tree with every column of alias `from` moved to alias `to`.
    /// Subqueries keep their own scope.
    pub fn rename_alias(&self, from: &str, to: &str) -> Predicate {
        let rename = |c: &ColumnRef| {
            if c.alias == from {
                ColumnRef::new(to, &c.field)
            } else {
                c.clone()
            }
        };
        match self {
            Predicate::Compare {
                column,
                op,
                operand,
            } => Predicate::Compare {
                column: rename(column),
                op: *op,
                operand: match operand {
                    Operand::Column(c) => Operand::Column(rename(c)),
                    Operand::Value(v) => Operand::Value(v.clone()),
                },
            },
            Predicate::In {
                column,
                values,
                negated,
            } => Predicate::In {
                column: rename(column),
                values: values.clone(),
                negated: *negated,
            },
            Predicate::InSubquery {
                column,
                query,
                negated,
            } => Predicate::InSubquery {
                column: rename(column),
                query: query.clone(),
                negated: *negated,
            },
            Predicate::IsNull { column, negated } => Predicate::IsNull {
                column: rename(column),
                negated: *negated,
            },
            Predicate::Like {
                column,
                pattern,
                negated,
            } => Predicate::Like {
                column: rename(column),
                pattern: pattern.clone(),
                negated: *negated,
            },
            Predicate::And(a, b) => Predicate::And(
                Arc::new(a.rename_alias(from, to)),
                Arc::new(b.rename_alias(from, to)),
            ),
            Predicate::Or(a, b) => Predicate::Or(
                Arc::new(a.rename_alias(from, to)),
                Arc::new(b.rename_alias(from, to)),
            ),
            Predicate::Not(inner) => Predicate::Not(Arc::new(inner.rename_alias(from, to))),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.alias, self.field)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let not = |negated: &bool| if *negated { "NOT " } else { "" };
        match self {
            Predicate::Compare {
                column,
                op,
                operand,
            } => match operand {
                Operand::Value(v) => write!(f, "{column} {} {v}", op.symbol()),
                Operand::Column(c) => write!(f, "{column} {} {c}", op.symbol()),
            },
            Predicate::In {
                column,
                values,
                negated,
            } => {
                let list: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{column} {}IN ({})", not(negated), list.join(", "))
            }
            Predicate::InSubquery {
                column,
                query,
                negated,
            } => write!(f, "{column} {}IN (<subquery on {}>)", not(negated), query.root.table),
            Predicate::IsNull { column, negated } => {
                write!(f, "{column} IS {}NULL", not(negated))
            }
            Predicate::Like {
                column,
                pattern,
                negated,
            } => write!(f, "{column} {}LIKE '{pattern}'", not(negated)),
            Predicate::And(a, b) => write!(f, "({a} AND {b})"),
            Predicate::Or(a, b) => write!(f, "({a} OR {b})"),
            Predicate::Not(inner) => write!(f, "NOT ({inner})"),
        }
    }
}

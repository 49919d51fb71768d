//! In-memory backend that evaluates the query AST directly.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;
use typedal_proto::{
    AggregateExpr, AggregateFunction, ColumnRef, CompareOp, DeleteStatement, InsertStatement,
    JoinCondition, JoinKind, Operand, OrderDirection, Predicate, Query, RawRow, SelectItem,
    UpdateStatement, Value, ValueKey,
};

use crate::error::Error;

use super::Backend;

static NULL: Value = Value::Null;

/// Errors raised by [`MemoryBackend`].
#[derive(Debug, Error)]
pub enum MemoryError {
    /// A column names an alias that is not part of the query.
    #[error("unknown alias '{0}'")]
    UnknownAlias(String),

    /// An insert reused an existing primary key.
    #[error("duplicate primary key {key} in table '{table}'")]
    DuplicateKey { table: String, key: String },

    /// An aggregate needs numbers but saw something else.
    #[error("{function} over non-numeric value {value}")]
    NonNumeric { function: String, value: String },

    /// A subquery must select exactly one column.
    #[error("subquery must select exactly one column, got {0}")]
    SubqueryShape(usize),
}

impl From<MemoryError> for Error {
    fn from(err: MemoryError) -> Self {
        Error::backend(err)
    }
}

#[derive(Debug, Default)]
struct MemoryTable {
    rows: Vec<RawRow>,
    next_id: i64,
}

/// A backend that keeps tables in memory.
///
/// Tables are created on first insert and store rows keyed by bare field
/// names. Reads snapshot the rows they touch, so they never block each other;
/// writes serialize on one mutex.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: DashMap<String, MemoryTable>,
    write_lock: Mutex<()>,
    executions: AtomicU64,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of read queries run so far, counts included.
    pub fn executions(&self) -> u64 {
        self.executions.load(AtomicOrdering::Relaxed)
    }

    /// Number of rows stored in a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |t| t.rows.len())
    }

    /// Stored rows of a table, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<RawRow> {
        self.tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Store a row as is, bypassing key assignment. Useful to load fixtures
    /// that a validated write would reject.
    pub fn load_raw(&self, table: &str, row: RawRow) {
        let _guard = self.write_lock.lock();
        self.tables
            .entry(table.to_string())
            .or_default()
            .rows
            .push(row);
    }

    fn snapshot(&self, table: &str) -> Vec<RawRow> {
        self.rows(table)
    }

    /// Joined, filtered, ordered and paginated tuples of a non-aggregate query.
    fn select(&self, query: &Query) -> Result<(Scope, Vec<Tuple>), Error> {
        let scope = Scope::new(self, query);
        let predicate = match &query.predicate {
            Some(p) => Some(self.resolve_subqueries(p)?),
            None => None,
        };

        let mut tuples = scope.join(query)?;
        if let Some(predicate) = &predicate {
            let mut kept = Vec::with_capacity(tuples.len());
            for tuple in tuples {
                if scope.eval(predicate, &tuple)? {
                    kept.push(tuple);
                }
            }
            tuples = kept;
        }

        if !query.is_aggregate() {
            scope.sort(&mut tuples, query)?;
            tuples = paginate(tuples, query);
        }
        Ok((scope, tuples))
    }

    fn resolve_subqueries(&self, predicate: &Predicate) -> Result<Predicate, Error> {
        Ok(match predicate {
            Predicate::InSubquery {
                column,
                query,
                negated,
            } => {
                let rows = self.execute(query)?;
                let mut values = Vec::with_capacity(rows.len());
                for row in rows {
                    if row.len() != 1 {
                        return Err(MemoryError::SubqueryShape(row.len()).into());
                    }
                    values.extend(row.columns.into_iter().map(|(_, v)| v));
                }
                Predicate::In {
                    column: column.clone(),
                    values,
                    negated: *negated,
                }
            }
            Predicate::And(a, b) => Predicate::And(
                Arc::new(self.resolve_subqueries(a)?),
                Arc::new(self.resolve_subqueries(b)?),
            ),
            Predicate::Or(a, b) => Predicate::Or(
                Arc::new(self.resolve_subqueries(a)?),
                Arc::new(self.resolve_subqueries(b)?),
            ),
            Predicate::Not(inner) => Predicate::Not(Arc::new(self.resolve_subqueries(inner)?)),
            other => other.clone(),
        })
    }

    fn matching_root_rows(&self, query: &Query) -> Result<Vec<usize>, Error> {
        let (_, tuples) = self.select(query)?;
        let mut indices: Vec<usize> = tuples.iter().filter_map(|t| t[0]).collect();
        indices.sort_unstable();
        indices.dedup();
        Ok(indices)
    }
}

impl Backend for MemoryBackend {
    fn execute(&self, query: &Query) -> Result<Vec<RawRow>, Error> {
        self.executions.fetch_add(1, AtomicOrdering::Relaxed);
        let (scope, tuples) = self.select(query)?;

        let rows = if query.is_aggregate() {
            let mut rows = scope.aggregate(&tuples, query)?;
            sort_rows(&mut rows, query);
            paginate(rows, query)
        } else {
            tuples.iter().map(|t| scope.project(t, query)).collect()
        };

        trace!(table = %query.root.table, rows = rows.len(), "memory backend executed query");
        Ok(rows)
    }

    fn execute_count(&self, query: &Query) -> Result<u64, Error> {
        if query.is_aggregate() {
            return Ok(self.execute(query)?.len() as u64);
        }
        self.executions.fetch_add(1, AtomicOrdering::Relaxed);
        let (_, tuples) = self.select(query)?;
        Ok(tuples.len() as u64)
    }

    fn insert(&self, statement: &InsertStatement) -> Result<Value, Error> {
        let _guard = self.write_lock.lock();
        let mut table = self.tables.entry(statement.table.clone()).or_default();

        let mut row = statement.values.clone();
        let key = match row.get(&statement.primary_key) {
            Some(value) if !value.is_null() => value.clone(),
            _ => {
                table.next_id += 1;
                let key = Value::Int(table.next_id);
                row.columns
                    .retain(|(name, _)| name != &statement.primary_key);
                row.columns
                    .insert(0, (statement.primary_key.clone(), key.clone()));
                key
            }
        };

        let taken = table.rows.iter().any(|existing| {
            existing
                .get(&statement.primary_key)
                .is_some_and(|k| values_equal(k, &key))
        });
        if taken {
            return Err(MemoryError::DuplicateKey {
                table: statement.table.clone(),
                key: key.to_string(),
            }
            .into());
        }

        if let Value::Int(k) = key {
            table.next_id = table.next_id.max(k);
        }
        table.rows.push(row);
        Ok(key)
    }

    fn update(&self, statement: &UpdateStatement) -> Result<u64, Error> {
        let _guard = self.write_lock.lock();
        let indices = self.matching_root_rows(&statement.query)?;

        if let Some(mut table) = self.tables.get_mut(&statement.query.root.table) {
            for &i in &indices {
                let row = &mut table.rows[i];
                for assignment in &statement.assignments {
                    match row.columns.iter_mut().find(|(n, _)| n == &assignment.field) {
                        Some((_, value)) => *value = assignment.value.clone(),
                        None => row.push(assignment.field.clone(), assignment.value.clone()),
                    }
                }
            }
        }
        Ok(indices.len() as u64)
    }

    fn delete(&self, statement: &DeleteStatement) -> Result<u64, Error> {
        let _guard = self.write_lock.lock();
        let indices = self.matching_root_rows(&statement.query)?;

        if let Some(mut table) = self.tables.get_mut(&statement.query.root.table) {
            for &i in indices.iter().rev() {
                table.rows.remove(i);
            }
        }
        Ok(indices.len() as u64)
    }
}

/// Row index per table occurrence; `None` for an unmatched outer join.
type Tuple = Vec<Option<usize>>;

/// Rows of every table occurrence of one query.
struct Scope {
    aliases: Vec<String>,
    rows: Vec<Vec<RawRow>>,
}

impl Scope {
    fn new(backend: &MemoryBackend, query: &Query) -> Self {
        let mut aliases = vec![query.root.alias.clone()];
        let mut rows = vec![backend.snapshot(&query.root.table)];
        for join in query.joins.iter() {
            aliases.push(join.alias().to_string());
            rows.push(backend.snapshot(&join.target.table));
        }
        Self { aliases, rows }
    }

    fn occurrence(&self, alias: &str) -> Result<usize, Error> {
        self.aliases
            .iter()
            .position(|a| a == alias)
            .ok_or_else(|| MemoryError::UnknownAlias(alias.to_string()).into())
    }

    fn value<'a>(&'a self, tuple: &[Option<usize>], column: &ColumnRef) -> Result<&'a Value, Error> {
        let occurrence = self.occurrence(&column.alias)?;
        Ok(match tuple.get(occurrence).copied().flatten() {
            Some(i) => self.rows[occurrence][i].get(&column.field).unwrap_or(&NULL),
            None => &NULL,
        })
    }

    fn join(&self, query: &Query) -> Result<Vec<Tuple>, Error> {
        let mut tuples: Vec<Tuple> = (0..self.rows[0].len()).map(|i| vec![Some(i)]).collect();

        for (j, join) in query.joins.iter().enumerate() {
            let occurrence = j + 1;
            let mut next = Vec::with_capacity(tuples.len());
            for tuple in tuples {
                let mut matched = false;
                for i in 0..self.rows[occurrence].len() {
                    let mut candidate = tuple.clone();
                    candidate.push(Some(i));
                    let holds = match &join.on {
                        JoinCondition::Columns { left, right } => {
                            let l = self.value(&candidate, left)?;
                            let r = self.value(&candidate, right)?;
                            !l.is_null() && values_equal(l, r)
                        }
                        JoinCondition::Predicate(p) => self.eval(p, &candidate)?,
                    };
                    if holds {
                        matched = true;
                        next.push(candidate);
                    }
                }
                if !matched && join.kind == JoinKind::Left {
                    let mut candidate = tuple;
                    candidate.push(None);
                    next.push(candidate);
                }
            }
            tuples = next;
        }

        Ok(tuples)
    }

    fn eval(&self, predicate: &Predicate, tuple: &[Option<usize>]) -> Result<bool, Error> {
        Ok(match predicate {
            Predicate::Compare {
                column,
                op,
                operand,
            } => {
                let left = self.value(tuple, column)?;
                let right = match operand {
                    Operand::Value(v) => v,
                    Operand::Column(c) => self.value(tuple, c)?,
                };
                if left.is_null() || right.is_null() {
                    return Ok(false);
                }
                match op {
                    CompareOp::Eq => values_equal(left, right),
                    CompareOp::Ne => !values_equal(left, right),
                    CompareOp::Lt => compare_values(left, right).is_some_and(Ordering::is_lt),
                    CompareOp::Le => compare_values(left, right).is_some_and(Ordering::is_le),
                    CompareOp::Gt => compare_values(left, right).is_some_and(Ordering::is_gt),
                    CompareOp::Ge => compare_values(left, right).is_some_and(Ordering::is_ge),
                }
            }
            Predicate::In {
                column,
                values,
                negated,
            } => {
                let value = self.value(tuple, column)?;
                if value.is_null() {
                    return Ok(false);
                }
                values.iter().any(|v| values_equal(value, v)) != *negated
            }
            Predicate::InSubquery { .. } => {
                // Resolved into `In` before evaluation.
                false
            }
            Predicate::IsNull { column, negated } => {
                self.value(tuple, column)?.is_null() != *negated
            }
            Predicate::Like {
                column,
                pattern,
                negated,
            } => match self.value(tuple, column)? {
                Value::Text(s) => like_match(s, pattern) != *negated,
                _ => false,
            },
            Predicate::And(a, b) => self.eval(a, tuple)? && self.eval(b, tuple)?,
            Predicate::Or(a, b) => self.eval(a, tuple)? || self.eval(b, tuple)?,
            Predicate::Not(inner) => !self.eval(inner, tuple)?,
        })
    }

    fn sort(&self, tuples: &mut [Tuple], query: &Query) -> Result<(), Error> {
        if query.order_by.is_empty() {
            return Ok(());
        }
        for order in query.order_by.iter() {
            self.occurrence(&order.column.alias)?;
        }
        tuples.sort_by(|a, b| {
            for order in query.order_by.iter() {
                let left = self.value(a, &order.column).unwrap_or(&NULL);
                let right = self.value(b, &order.column).unwrap_or(&NULL);
                let ordering = order_nulls_first(left, right);
                let ordering = match order.direction {
                    OrderDirection::Asc => ordering,
                    OrderDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        Ok(())
    }

    fn project(&self, tuple: &[Option<usize>], query: &Query) -> RawRow {
        let mut row = RawRow::new();
        if query.selection.is_empty() {
            for (occurrence, alias) in self.aliases.iter().enumerate() {
                if let Some(i) = tuple.get(occurrence).copied().flatten() {
                    for (name, value) in self.rows[occurrence][i].iter() {
                        row.push(format!("{alias}.{name}"), value.clone());
                    }
                }
            }
            return row;
        }
        for item in query.selection.iter() {
            if let SelectItem::Column(column) = item {
                let value = self.value(tuple, column).unwrap_or(&NULL);
                row.push(column.qualified(), value.clone());
            }
        }
        row
    }

    fn aggregate(&self, tuples: &[Tuple], query: &Query) -> Result<Vec<RawRow>, Error> {
        let mut groups: Vec<Vec<&Tuple>> = Vec::new();
        if query.group_by.is_empty() {
            groups.push(tuples.iter().collect());
        } else {
            let mut index: HashMap<Vec<ValueKey>, usize> = HashMap::new();
            for tuple in tuples {
                let key = query
                    .group_by
                    .iter()
                    .map(|c| self.value(tuple, c).map(Value::key))
                    .collect::<Result<Vec<_>, _>>()?;
                let slot = *index.entry(key).or_insert_with(|| {
                    groups.push(Vec::new());
                    groups.len() - 1
                });
                groups[slot].push(tuple);
            }
        }

        let mut rows = Vec::with_capacity(groups.len());
        for group in groups {
            let mut row = RawRow::new();
            for item in query.selection.iter() {
                match item {
                    SelectItem::Column(column) => {
                        let value = match group.first() {
                            Some(tuple) => self.value(tuple, column)?.clone(),
                            None => Value::Null,
                        };
                        row.push(column.qualified(), value);
                    }
                    SelectItem::Aggregate(agg) => {
                        row.push(agg.alias.clone(), self.compute(agg, &group)?);
                    }
                }
            }
            rows.push(row);
        }
        Ok(rows)
    }

    fn compute(&self, agg: &AggregateExpr, group: &[&Tuple]) -> Result<Value, Error> {
        let Some(column) = &agg.column else {
            return Ok(Value::Int(group.len() as i64));
        };
        let mut values = Vec::with_capacity(group.len());
        for tuple in group {
            let value = self.value(tuple, column)?;
            if !value.is_null() {
                values.push(value);
            }
        }

        let numeric = |function: AggregateFunction| -> Result<Vec<f64>, Error> {
            values
                .iter()
                .map(|v| {
                    v.as_f64().ok_or_else(|| {
                        Error::from(MemoryError::NonNumeric {
                            function: function.name().to_string(),
                            value: v.to_string(),
                        })
                    })
                })
                .collect()
        };

        Ok(match agg.function {
            AggregateFunction::Count => Value::Int(values.len() as i64),
            AggregateFunction::Sum => {
                let numbers = numeric(AggregateFunction::Sum)?;
                if numbers.is_empty() {
                    Value::Null
                } else if values.iter().all(|v| matches!(v, Value::Int(_))) {
                    Value::Int(values.iter().filter_map(|v| v.as_i64()).sum::<i64>())
                } else {
                    Value::Float(numbers.iter().sum())
                }
            }
            AggregateFunction::Avg => {
                let numbers = numeric(AggregateFunction::Avg)?;
                if numbers.is_empty() {
                    Value::Null
                } else {
                    Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
                }
            }
            AggregateFunction::Min => extreme(&values, Ordering::Less),
            AggregateFunction::Max => extreme(&values, Ordering::Greater),
        })
    }
}

fn extreme(values: &[&Value], wanted: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for &value in values {
        best = match best {
            Some(current) if compare_values(value, current) != Some(wanted) => Some(current),
            _ => Some(value),
        };
    }
    best.cloned().unwrap_or(Value::Null)
}

fn sort_rows(rows: &mut [RawRow], query: &Query) {
    if query.order_by.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for order in query.order_by.iter() {
            let name = order.column.qualified();
            let left = a.get(&name).unwrap_or(&NULL);
            let right = b.get(&name).unwrap_or(&NULL);
            let ordering = match order.direction {
                OrderDirection::Asc => order_nulls_first(left, right),
                OrderDirection::Desc => order_nulls_first(left, right).reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn paginate<T>(items: Vec<T>, query: &Query) -> Vec<T> {
    match query.pagination {
        Some(page) => items
            .into_iter()
            .skip(usize::try_from(page.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(page.limit).unwrap_or(usize::MAX))
            .collect(),
        None => items,
    }
}

fn order_nulls_first(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

/// Check if two values are equal. Integers and floats compare numerically.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
        (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Text(a), Value::Text(b)) => a == b,
        (Value::Bytes(a), Value::Bytes(b)) => a == b,
        _ => false,
    }
}

/// Compare two values, returning their ordering if comparable.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Match a string against a LIKE pattern.
///
/// `%` matches any run of characters, `_` exactly one, and a backslash
/// escapes the next pattern character.
fn like_match(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_from(&value, &pattern)
}

fn like_from(value: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
        None => value.is_empty(),
        Some(('%', rest)) => {
            if rest.is_empty() {
                return true;
            }
            (0..=value.len()).any(|skip| like_from(&value[skip..], rest))
        }
        Some(('_', rest)) => !value.is_empty() && like_from(&value[1..], rest),
        Some(('\\', rest)) => match (rest.split_first(), value.split_first()) {
            (Some((p, rest)), Some((c, tail))) if p == c => like_from(tail, rest),
            _ => false,
        },
        Some((p, rest)) => match value.split_first() {
            Some((c, tail)) if c == p => like_from(tail, rest),
            _ => false,
        },
    }
}

//! Typed result sets.

use std::cmp::Ordering;

use typedal_proto::{Pagination, Query, Value, ValueKey};

use crate::error::Error;
use crate::model::FromRow;
use crate::query::QueryBuilder;

use super::row::Row;

/// The rows a query produced, in backend order, each paired with its typed
/// model.
///
/// A result set remembers the builder that produced it, so a paginated
/// result can fetch the following page.
#[derive(Debug, Clone)]
pub struct TypedRows<M = Row> {
    rows: Vec<Row>,
    models: Vec<M>,
    query: Query,
    more: bool,
    source: QueryBuilder<M>,
}

impl<M> TypedRows<M> {
    pub(crate) fn new(
        rows: Vec<Row>,
        models: Vec<M>,
        query: Query,
        more: bool,
        source: QueryBuilder<M>,
    ) -> Self {
        Self {
            rows,
            models,
            query,
            more,
            source,
        }
    }

    /// Iterate over the typed models.
    pub fn iter(&self) -> std::slice::Iter<'_, M> {
        self.models.iter()
    }

    /// The untyped rows, including nested related rows and extras.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn first(&self) -> Option<&M> {
        self.models.first()
    }

    pub fn last(&self) -> Option<&M> {
        self.models.last()
    }

    pub fn get(&self, index: usize) -> Option<&M> {
        self.models.get(index)
    }

    /// The query that ran, with the pagination it was asked for.
    pub fn query(&self) -> &Query {
        &self.query
    }

    fn position_of(&self, key: &Value) -> Option<usize> {
        let key = key.key();
        self.rows.iter().position(|row| row.key().key() == key)
    }

    /// The model whose primary key equals `key`.
    pub fn get_by_key(&self, key: impl Into<Value>) -> Option<&M> {
        self.position_of(&key.into())
            .and_then(|i| self.models.get(i))
    }

    pub fn contains_key(&self, key: impl Into<Value>) -> bool {
        self.position_of(&key.into()).is_some()
    }

    /// Keep only the models matching `predicate`.
    pub fn find(self, mut predicate: impl FnMut(&M) -> bool) -> Self {
        let (rows, models) = self
            .rows
            .into_iter()
            .zip(self.models)
            .filter(|(_, model)| predicate(model))
            .unzip();
        Self {
            rows,
            models,
            query: self.query,
            more: self.more,
            source: self.source,
        }
    }

    /// Remove the models matching `predicate` and return them.
    pub fn exclude(&mut self, mut predicate: impl FnMut(&M) -> bool) -> Vec<M> {
        let mut kept_rows = Vec::with_capacity(self.rows.len());
        let mut kept_models = Vec::with_capacity(self.models.len());
        let mut removed = Vec::new();
        for (row, model) in self.rows.drain(..).zip(self.models.drain(..)) {
            if predicate(&model) {
                removed.push(model);
            } else {
                kept_rows.push(row);
                kept_models.push(model);
            }
        }
        self.rows = kept_rows;
        self.models = kept_models;
        removed
    }

    /// Reorder the models with a comparator. The sort is stable.
    pub fn sorted_by(self, mut compare: impl FnMut(&M, &M) -> Ordering) -> Self {
        let mut pairs: Vec<(Row, M)> = self.rows.into_iter().zip(self.models).collect();
        pairs.sort_by(|a, b| compare(&a.1, &b.1));
        let (rows, models) = pairs.into_iter().unzip();
        Self {
            rows,
            models,
            query: self.query,
            more: self.more,
            source: self.source,
        }
    }

    /// One field of every row; unselected fields come back null.
    pub fn column(&self, field: &str) -> Result<Vec<Value>, Error> {
        self.rows
            .iter()
            .map(|row| {
                row.table().require_field(field)?;
                Ok(row.get(field).cloned().unwrap_or(Value::Null))
            })
            .collect()
    }

    /// Group models by the value of one field, in first-seen order.
    pub fn group_by_value(&self, field: &str) -> Result<Vec<(Value, Vec<&M>)>, Error> {
        let mut groups: Vec<(Value, Vec<&M>)> = Vec::new();
        let mut index: Vec<ValueKey> = Vec::new();
        for (value, model) in self.column(field)?.into_iter().zip(&self.models) {
            let key = value.key();
            match index.iter().position(|k| *k == key) {
                Some(i) => groups[i].1.push(model),
                None => {
                    index.push(key);
                    groups.push((value, vec![model]));
                }
            }
        }
        Ok(groups)
    }

    pub fn into_vec(self) -> Vec<M> {
        self.models
    }

    /// Pagination the query ran with.
    pub fn pagination(&self) -> Option<Pagination> {
        self.query.pagination
    }

    /// 1-based page number, when the query was paginated.
    pub fn page(&self) -> Option<u64> {
        self.query
            .pagination
            .filter(|p| p.limit > 0)
            .map(|p| p.offset / p.limit + 1)
    }

    /// Whether rows follow this page. Paginated queries fetch one row past
    /// the page to know.
    pub fn has_next_page(&self) -> bool {
        self.more
    }
}

impl<M: FromRow> TypedRows<M> {
    /// Fetch the following page, or `None` when this was the last one.
    pub fn next_page(&self) -> Result<Option<TypedRows<M>>, Error> {
        let Some(pagination) = self.query.pagination.filter(|_| self.more) else {
            return Ok(None);
        };
        let next = self
            .source
            .limit(pagination.limit, Some(pagination.offset + pagination.limit))
            .collect()?;
        Ok((!next.is_empty()).then_some(next))
    }
}

impl<M> IntoIterator for TypedRows<M> {
    type Item = M;
    type IntoIter = std::vec::IntoIter<M>;

    fn into_iter(self) -> Self::IntoIter {
        self.models.into_iter()
    }
}

impl<'a, M> IntoIterator for &'a TypedRows<M> {
    type Item = &'a M;
    type IntoIter = std::slice::Iter<'a, M>;

    fn into_iter(self) -> Self::IntoIter {
        self.models.iter()
    }
}

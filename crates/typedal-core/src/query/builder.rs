//! The query builder.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, trace};
use typedal_proto::{
    col, AggregateExpr, ColumnRef, DeleteStatement, Join, JoinCardinality, JoinCondition,
    JoinKind, OrderDirection, OrderSpec, Pagination, Predicate, Query, RawRow, SelectItem,
    TableRef, UpdateStatement, Value,
};

use crate::catalog::{Snapshot, TableMetadata};
use crate::database::Context;
use crate::error::Error;
use crate::mapper;
use crate::materialize::{materialize, Row, TypedRows};
use crate::model::{FromRow, Model};
use crate::relation::{Direction, PathHint, RelationshipEdge};

use super::column::IntoColumn;
use super::options::JoinOptions;

/// An immutable builder over a [`Query`], scoped to one root table.
///
/// Every method validates its input against the registry right away and
/// returns a new builder; the receiver is left untouched and stays usable.
/// Literal values are encoded for the backend as they are added, so the AST
/// only carries backend-native values. Nothing reaches the backend until a
/// terminal operation (`collect`, `first`, `count`, `update`, `delete`)
/// runs.
pub struct QueryBuilder<M = Row> {
    ctx: Arc<Context>,
    table: Arc<TableMetadata>,
    query: Query,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for QueryBuilder<M> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            table: self.table.clone(),
            query: self.query.clone(),
            _model: PhantomData,
        }
    }
}

impl<M> fmt::Debug for QueryBuilder<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("table", &self.table.name())
            .field("query", &self.query)
            .finish()
    }
}

impl<M> QueryBuilder<M> {
    pub(crate) fn new(ctx: Arc<Context>, table: Arc<TableMetadata>) -> Self {
        Self {
            query: Query::new(table.name()),
            ctx,
            table,
            _model: PhantomData,
        }
    }

    fn with_query(&self, query: Query) -> Self {
        Self {
            ctx: self.ctx.clone(),
            table: self.table.clone(),
            query,
            _model: PhantomData,
        }
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.ctx.registry.snapshot()
    }

    fn column(&self, column: impl IntoColumn) -> Result<ColumnRef, Error> {
        let column = column.into_column(&self.query.root.alias)?;
        resolve(&self.snapshot(), &self.query, &column)?;
        Ok(column)
    }

    /// The query built so far.
    pub fn to_query(&self) -> &Query {
        &self.query
    }

    /// Metadata of the root table.
    pub fn table(&self) -> &Arc<TableMetadata> {
        &self.table
    }

    /// Reference a field of any table occurrence in scope.
    pub fn col(&self, column: impl IntoColumn) -> Result<ColumnRef, Error> {
        self.column(column)
    }

    /// Alias the root table.
    pub fn aliased(&self, alias: impl Into<String>) -> Result<Self, Error> {
        let q = &self.query;
        if !(q.joins.is_empty()
            && q.predicate.is_none()
            && q.selection.is_empty()
            && q.order_by.is_empty()
            && q.group_by.is_empty())
        {
            return Err(Error::InvalidQuery(
                "the root alias must be set before anything refers to the root".into(),
            ));
        }
        Ok(self.with_query(self.query.clone().with_alias(alias)))
    }

    /// Add columns to the selection.
    pub fn select<C: IntoColumn>(&self, columns: impl IntoIterator<Item = C>) -> Result<Self, Error> {
        let items = columns
            .into_iter()
            .map(|c| self.column(c).map(SelectItem::Column))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.with_query(self.query.clone().extend_selection(items)))
    }

    /// Add an aggregate expression to the selection.
    pub fn select_expr(&self, expr: AggregateExpr) -> Result<Self, Error> {
        if let Some(column) = &expr.column {
            resolve(&self.snapshot(), &self.query, column)?;
        }
        let clash = self.query.selection.iter().any(|item| item.output_name() == expr.alias);
        if clash || expr.alias.contains('.') {
            return Err(Error::InvalidQuery(format!(
                "aggregate alias '{}' is not a free output name",
                expr.alias
            )));
        }
        Ok(self.with_query(
            self.query
                .clone()
                .extend_selection([SelectItem::Aggregate(expr)]),
        ))
    }

    /// AND a predicate onto the filter.
    pub fn where_(&self, predicate: Predicate) -> Result<Self, Error> {
        let lowered = lower(&self.snapshot(), &self.query, &predicate)?;
        Ok(self.with_query(self.query.clone().and_where(lowered)))
    }

    /// AND the disjunction of several alternatives onto the filter.
    pub fn or_where(&self, alternatives: impl IntoIterator<Item = Predicate>) -> Result<Self, Error> {
        let predicate = Predicate::any(alternatives)
            .ok_or_else(|| Error::InvalidQuery("or_where needs at least one alternative".into()))?;
        self.where_(predicate)
    }

    /// AND `column = value` onto the filter.
    pub fn where_eq(&self, column: impl IntoColumn, value: impl Into<Value>) -> Result<Self, Error> {
        let column = self.column(column)?;
        self.where_(column.eq(value))
    }

    /// Join a model's table through the relationship graph.
    pub fn join<T: Model>(&self) -> Result<Self, Error> {
        self.join_with(&T::table_name(), JoinOptions::new())
    }

    /// Join a table by name through the relationship graph.
    pub fn join_table(&self, table: &str) -> Result<Self, Error> {
        self.join_with(table, JoinOptions::new())
    }

    /// Join a table through a specific reference field.
    pub fn join_via(&self, table: &str, via: impl Into<String>) -> Result<Self, Error> {
        self.join_with(table, JoinOptions::new().with_via(via))
    }

    /// Join a table under an explicit alias.
    pub fn join_as(&self, table: &str, alias: impl Into<String>) -> Result<Self, Error> {
        self.join_with(table, JoinOptions::new().with_alias(alias))
    }

    /// Join a table with an explicit join kind.
    pub fn join_kind(&self, table: &str, kind: JoinKind) -> Result<Self, Error> {
        self.join_with(table, JoinOptions::new().with_kind(kind))
    }

    /// Join a table on an explicit condition. The joined rows are treated as
    /// a has-many collection unless the options say otherwise.
    pub fn join_on(&self, table: &str, on: Predicate) -> Result<Self, Error> {
        self.join_with(table, JoinOptions::new().with_on(on))
    }

    /// Join a table with full control over path, alias and shape.
    ///
    /// Intermediate tables of a multi-hop path are joined too, reusing an
    /// identical join already in the query. A table that is already in scope
    /// needs an explicit alias.
    pub fn join_with(&self, table: &str, options: JoinOptions) -> Result<Self, Error> {
        let snapshot = self.snapshot();
        snapshot.lookup(table)?;

        let from = options
            .from
            .clone()
            .unwrap_or_else(|| self.query.root.alias.clone());
        let from_table = self
            .query
            .table_of(&from)
            .ok_or_else(|| Error::UnknownAlias(from.clone()))?
            .to_string();

        let alias = options.alias.clone().unwrap_or_else(|| table.to_string());
        check_alias_free(&self.query, &alias, table, &options)?;

        let query = match &options.on {
            Some(on) => self.join_explicit(&snapshot, table, &from, alias, on, &options)?,
            None => self.join_resolved(&snapshot, table, &from, &from_table, alias, &options)?,
        };

        debug!(
            root = %self.query.root.table,
            table,
            joins = query.joins.len(),
            "added join"
        );
        Ok(self.with_query(query))
    }

    /// Join a relationship declared on the root table. The joined rows are
    /// attached under the relationship name.
    pub fn join_relationship(&self, name: &str) -> Result<Self, Error> {
        self.join_relationship_with(name, JoinOptions::new())
    }

    /// Join a declared relationship of the `from` table (the root by
    /// default). Options set here override the declared ones; a declared
    /// condition always wins over `via`.
    pub fn join_relationship_with(&self, name: &str, options: JoinOptions) -> Result<Self, Error> {
        let from = options
            .from
            .clone()
            .unwrap_or_else(|| self.query.root.alias.clone());
        let owner = self
            .query
            .table_of(&from)
            .ok_or_else(|| Error::UnknownAlias(from.clone()))?
            .to_string();
        let snapshot = self.snapshot();
        let table = snapshot.lookup(&owner)?;
        let relationship = table
            .relationship(name)
            .ok_or_else(|| Error::UnknownRelationship {
                table: owner.clone(),
                name: name.to_string(),
            })?;

        let alias = options
            .alias
            .clone()
            .unwrap_or_else(|| relationship.name.clone());
        let on = relationship.on.as_ref().map(|on| {
            on.rename_alias(&relationship.name, &alias)
                .rename_alias(&owner, &from)
        });
        let resolved = JoinOptions {
            via: if on.is_some() {
                None
            } else {
                options.via.or_else(|| relationship.via.clone())
            },
            alias: Some(alias),
            kind: options.kind.or(relationship.kind),
            from: Some(from),
            direction: options.direction,
            on,
            cardinality: options.cardinality.or(relationship.cardinality),
            attribute: options
                .attribute
                .or_else(|| Some(relationship.name.clone())),
        };
        trace!(table = %owner, relationship = name, "joining declared relationship");
        self.join_with(&relationship.target, resolved)
    }

    /// Join every relationship declared on the root table, in declaration
    /// order.
    pub fn join_all(&self) -> Result<Self, Error> {
        let snapshot = self.snapshot();
        let table = snapshot.lookup(&self.query.root.table)?;
        table
            .relationships()
            .iter()
            .try_fold(self.clone(), |builder, r| builder.join_relationship(&r.name))
    }

    fn join_resolved(
        &self,
        snapshot: &Snapshot,
        table: &str,
        from: &str,
        from_table: &str,
        alias: String,
        options: &JoinOptions,
    ) -> Result<Query, Error> {
        let hint = PathHint {
            via: options.via.clone(),
            direction: options.direction,
        };
        let path = snapshot
            .graph()
            .find_path(from_table, table, &hint, self.ctx.config.max_join_depth)?;
        let Some((last, hops)) = path.split_last() else {
            return Err(Error::NoRelationshipPath {
                from: from_table.to_string(),
                to: table.to_string(),
            });
        };

        let mut query = self.query.clone();
        let mut parent = from.to_string();
        for edge in hops {
            let existing = query
                .joins
                .iter()
                .find(|j| {
                    j.parent_alias == parent
                        && j.target.table == edge.target_table
                        && j.attribute == edge.attribute()
                })
                .map(|j| j.alias().to_string());
            parent = match existing {
                Some(alias) => alias,
                None => {
                    let hop_alias = edge.target_table.clone();
                    if query.has_alias(&hop_alias) {
                        return Err(Error::AliasRequired {
                            table: hop_alias,
                        });
                    }
                    let attribute = edge.attribute().to_string();
                    query = query.with_join(self.edge_join(
                        edge,
                        &parent,
                        hop_alias.clone(),
                        attribute,
                        options,
                    ));
                    hop_alias
                }
            };
        }

        check_alias_free(&query, &alias, table, options)?;
        let attribute = options
            .attribute
            .clone()
            .or_else(|| options.alias.clone())
            .unwrap_or_else(|| last.attribute().to_string());
        let join = self.edge_join(last, &parent, alias, attribute, options);
        trace!(path = ?path.iter().map(ToString::to_string).collect::<Vec<_>>(), "resolved join path");
        Ok(query.with_join(join))
    }

    fn edge_join(
        &self,
        edge: &RelationshipEdge,
        parent: &str,
        alias: String,
        attribute: String,
        options: &JoinOptions,
    ) -> Join {
        let kind = options
            .kind
            .or(self.ctx.config.default_join)
            .unwrap_or(if edge.direction == Direction::HasMany || edge.optional {
                JoinKind::Left
            } else {
                JoinKind::Inner
            });
        Join {
            target: TableRef::aliased(&edge.target_table, &alias),
            parent_alias: parent.to_string(),
            attribute,
            kind,
            cardinality: options.cardinality.unwrap_or(edge.cardinality()),
            on: JoinCondition::Columns {
                left: col(parent, &edge.source_field),
                right: col(alias, &edge.target_field),
            },
        }
    }

    fn join_explicit(
        &self,
        snapshot: &Snapshot,
        table: &str,
        from: &str,
        alias: String,
        on: &Predicate,
        options: &JoinOptions,
    ) -> Result<Query, Error> {
        if !on.aliases().contains(&alias) {
            return Err(Error::InvalidQuery(format!(
                "join condition for '{alias}' does not reference it"
            )));
        }
        let join = Join {
            target: TableRef::aliased(table, &alias),
            parent_alias: from.to_string(),
            attribute: options.attribute.clone().unwrap_or_else(|| alias.clone()),
            kind: options
                .kind
                .or(self.ctx.config.default_join)
                .unwrap_or(JoinKind::Left),
            cardinality: options.cardinality.unwrap_or(JoinCardinality::Many),
            on: JoinCondition::Predicate(Arc::new(on.clone())),
        };
        let scoped = self.query.clone().with_join(join.clone());
        let lowered = lower(snapshot, &scoped, on)?;
        Ok(self.query.clone().with_join(Join {
            on: JoinCondition::Predicate(Arc::new(lowered)),
            ..join
        }))
    }

    /// Add an ordering.
    pub fn order_by(&self, column: impl IntoColumn, direction: OrderDirection) -> Result<Self, Error> {
        let column = self.column(column)?;
        let order = match direction {
            OrderDirection::Asc => OrderSpec::asc(column),
            OrderDirection::Desc => OrderSpec::desc(column),
        };
        Ok(self.with_query(self.query.clone().with_order(order)))
    }

    /// Add a grouping column.
    pub fn group_by(&self, column: impl IntoColumn) -> Result<Self, Error> {
        let column = self.column(column)?;
        Ok(self.with_query(self.query.clone().with_group_by(column)))
    }

    /// Limit the number of root rows, optionally skipping some first.
    pub fn limit(&self, limit: u64, offset: Option<u64>) -> Self {
        self.with_query(
            self.query
                .clone()
                .with_pagination(Pagination::new(limit, offset.unwrap_or(0))),
        )
    }

    /// Limit to one page of root rows. Pages count from 1.
    pub fn paginate(&self, limit: u64, page: u64) -> Result<Self, Error> {
        if limit == 0 || page == 0 {
            return Err(typedal_proto::Error::InvalidPagination(format!(
                "limit {limit} and page {page} must both be positive"
            ))
            .into());
        }
        Ok(self.with_query(
            self.query
                .clone()
                .with_pagination(Pagination::page(limit, page)),
        ))
    }

    /// This query as a subquery selecting one field, for use with
    /// [`ColumnRef::in_query`].
    pub fn as_subquery(&self, field: impl IntoColumn) -> Result<Query, Error> {
        let column = self.column(field)?;
        Ok(self
            .query
            .clone()
            .with_selection(vec![SelectItem::Column(column)]))
    }

    /// The query that actually runs: every table occurrence contributes its
    /// primary key when the selection is explicit, so rows can be grouped.
    fn expanded(&self, snapshot: &Snapshot) -> Result<Query, Error> {
        if self.query.selection.is_empty() || self.query.is_aggregate() {
            return Ok(self.query.clone());
        }
        let mut missing = Vec::new();
        for alias in self.query.aliases() {
            let table = self
                .query
                .table_of(alias)
                .ok_or_else(|| Error::UnknownAlias(alias.to_string()))?;
            let key = SelectItem::Column(col(alias, snapshot.lookup(table)?.primary_key()));
            if !self.query.selection.contains(&key) {
                missing.push(key);
            }
        }
        Ok(self.query.clone().extend_selection(missing))
    }

    fn root_key(&self) -> ColumnRef {
        col(&self.query.root.alias, self.table.primary_key())
    }

    /// Run a paginated query with has-many joins: page over root keys
    /// first, then fetch the joined rows for those keys only.
    ///
    /// Asks for one key more than the page holds; the flag says whether it
    /// came back.
    fn fetch_page(&self, query: &Query, lookahead: bool) -> Result<(Vec<RawRow>, bool), Error> {
        let root = &query.root;
        let key = self.root_key();

        let mut ids = Query::new(&root.table)
            .with_alias(&root.alias)
            .with_selection(vec![SelectItem::Column(key.clone())]);

        // Inner joins and filters on joined tables decide which roots match,
        // so those must be applied before the page is cut.
        let root_only = query.joins.iter().all(|j| j.kind == JoinKind::Left)
            && query
                .predicate
                .as_ref()
                .map_or(true, |p| p.aliases().iter().all(|a| a == &root.alias));
        if root_only {
            if let Some(predicate) = &query.predicate {
                ids = ids.and_where(predicate.as_ref().clone());
            }
        } else {
            let matching = query
                .clone()
                .without_pagination()
                .without_order()
                .with_selection(vec![SelectItem::Column(key.clone())]);
            ids = ids.and_where(key.in_query(matching));
        }

        for order in query.order_by.iter().filter(|o| o.column.alias == root.alias) {
            ids = ids.with_order(order.clone());
        }
        let limit = query.pagination.map(|p| p.limit);
        if let Some(pagination) = query.pagination {
            ids = ids.with_pagination(with_lookahead(pagination, lookahead));
        }

        let qualified = key.qualified();
        let mut keys: Vec<Value> = self
            .ctx
            .backend
            .execute(&ids)?
            .iter()
            .filter_map(|row| row.get(&qualified).or_else(|| row.get(&key.field)).cloned())
            .collect();
        let more = match limit {
            Some(limit) if lookahead && keys.len() as u64 > limit => {
                keys.truncate(limit as usize);
                true
            }
            _ => false,
        };
        trace!(table = %root.table, keys = keys.len(), more, "fetched page keys");
        if keys.is_empty() {
            return Ok((Vec::new(), more));
        }

        let page = query.clone().without_pagination().and_where(key.is_in(keys));
        Ok((self.ctx.backend.execute(&page)?, more))
    }

    /// Root-table scope for writes and counts: the plain filter when the
    /// query has no joins or pagination, otherwise `key IN (subquery)`.
    fn root_scope(&self, keep_pagination: bool) -> Query {
        let paginated = keep_pagination && self.query.pagination.is_some();
        if self.query.joins.is_empty() && !paginated {
            return self
                .query
                .clone()
                .without_order()
                .without_pagination()
                .with_selection(Vec::new());
        }
        let key = self.root_key();
        let mut matching = self
            .query
            .clone()
            .with_selection(vec![SelectItem::Column(key.clone())]);
        if !paginated {
            matching = matching.without_order().without_pagination();
        }
        Query::new(&self.query.root.table)
            .with_alias(&self.query.root.alias)
            .and_where(key.in_query(matching))
    }

    /// Count the root rows the query matches, ignoring ordering, pagination
    /// and selection.
    pub fn count(&self) -> Result<u64, Error> {
        let query = if self.query.group_by.is_empty() {
            self.root_scope(false)
        } else {
            self.query
                .clone()
                .without_order()
                .without_pagination()
                .with_selection(Vec::new())
        };
        let count = self.ctx.backend.execute_count(&query)?;
        debug!(table = %self.query.root.table, count, "counted rows");
        Ok(count)
    }

    /// Update the matched root rows and return how many changed.
    pub fn update<K, V>(&self, assignments: impl IntoIterator<Item = (K, V)>) -> Result<u64, Error>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let assignments = mapper::prepare_update(
            &self.snapshot(),
            &self.table,
            assignments.into_iter().map(|(k, v)| (k, v.into())),
        )?;
        if assignments.is_empty() {
            return Err(Error::InvalidQuery("update needs at least one assignment".into()));
        }
        let statement = UpdateStatement {
            query: self.root_scope(true),
            assignments,
        };
        let changed = self.ctx.backend.update(&statement)?;
        debug!(table = %self.query.root.table, changed, "updated rows");
        Ok(changed)
    }

    /// Delete the matched root rows and return how many were removed.
    pub fn delete(&self) -> Result<u64, Error> {
        let statement = DeleteStatement {
            query: self.root_scope(true),
        };
        let removed = self.ctx.backend.delete(&statement)?;
        debug!(table = %self.query.root.table, removed, "deleted rows");
        Ok(removed)
    }
}

impl<M: FromRow> QueryBuilder<M> {
    /// Run the query and materialize every matching root row.
    pub fn collect(&self) -> Result<TypedRows<M>, Error> {
        self.run(true)
    }

    fn run(&self, lookahead: bool) -> Result<TypedRows<M>, Error> {
        let snapshot = self.snapshot();
        let query = self.expanded(&snapshot)?;
        let lookahead = lookahead && query.pagination.is_some_and(|p| p.limit > 0);
        debug!(
            table = %query.root.table,
            joins = query.joins.len(),
            paginated = query.pagination.is_some(),
            "collecting rows"
        );

        let (raw, mut more) =
            if query.pagination.is_some() && query.has_many_joins() && !query.is_aggregate() {
                self.fetch_page(&query, lookahead)?
            } else {
                let sent = match query.pagination {
                    Some(p) => query.clone().with_pagination(with_lookahead(p, lookahead)),
                    None => query.clone(),
                };
                (self.ctx.backend.execute(&sent)?, false)
            };

        // Without has-many joins every raw row is one root row.
        let mut rows = materialize(&query, &snapshot, raw)?;
        if let Some(p) = query.pagination.filter(|_| lookahead) {
            if rows.len() as u64 > p.limit {
                rows.truncate(p.limit as usize);
                more = true;
            }
        }

        let models = rows.iter().map(M::from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(TypedRows::new(rows, models, query, more, self.clone()))
    }

    /// Like [`collect`](Self::collect), but an empty result is `NotFound`.
    pub fn collect_or_fail(&self) -> Result<TypedRows<M>, Error> {
        let rows = self.collect()?;
        if rows.is_empty() {
            return Err(self.not_found());
        }
        Ok(rows)
    }

    /// Run the query for one root row.
    ///
    /// Returns `Ok(None)` when nothing matches, or `NotFound` when the
    /// database is configured with `strict_first`.
    pub fn first(&self) -> Result<Option<M>, Error> {
        let offset = self.query.pagination.map_or(0, |p| p.offset);
        let found = self
            .limit(1, Some(offset))
            .run(false)?
            .into_vec()
            .into_iter()
            .next();
        if found.is_none() && self.ctx.config.strict_first {
            return Err(self.not_found());
        }
        Ok(found)
    }

    /// Run the query for one root row; nothing matching is `NotFound`.
    pub fn first_or_fail(&self) -> Result<M, Error> {
        self.first()?.ok_or_else(|| self.not_found())
    }

    fn not_found(&self) -> Error {
        Error::NotFound {
            table: self.query.root.table.clone(),
        }
    }
}

/// Pagination asking for one row more than the page holds.
fn with_lookahead(pagination: Pagination, lookahead: bool) -> Pagination {
    if lookahead {
        Pagination::new(pagination.limit.saturating_add(1), pagination.offset)
    } else {
        pagination
    }
}

fn check_alias_free(
    query: &Query,
    alias: &str,
    table: &str,
    options: &JoinOptions,
) -> Result<(), Error> {
    if !query.has_alias(alias) {
        return Ok(());
    }
    Err(match options.alias {
        Some(_) => Error::DuplicateAlias(alias.to_string()),
        None => Error::AliasRequired {
            table: table.to_string(),
        },
    })
}

/// Table metadata for a column in scope, checking that the field exists.
fn resolve(snapshot: &Snapshot, query: &Query, column: &ColumnRef) -> Result<Arc<TableMetadata>, Error> {
    let table = query
        .table_of(&column.alias)
        .ok_or_else(|| Error::UnknownAlias(column.alias.clone()))?;
    let table = snapshot.lookup(table)?.clone();
    table.require_field(&column.field)?;
    Ok(table)
}

/// Validate every column of a predicate and encode its literals.
fn lower(snapshot: &Snapshot, query: &Query, predicate: &Predicate) -> Result<Predicate, Error> {
    for column in predicate.columns() {
        resolve(snapshot, query, &column)?;
    }
    predicate.try_map_values(&mut |column: &ColumnRef, value: &Value| {
        let table = resolve(snapshot, query, column)?;
        let field = mapper::storage_field(table.require_field(&column.field)?, snapshot);
        mapper::to_backend_literal(value, &field, table.name())
    })
}
